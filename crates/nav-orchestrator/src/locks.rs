//! 다운로드 락 테이블.
//!
//! (작업 유형, 테넌트, 환경, 범위)를 키로 하는 프로세스 로컬 배타 락입니다.
//! 같은 키에 대한 두 번째 트리거는 큐잉되지 않고 기존 작업 id를 돌려받습니다.
//! 락은 내구성이 없으며 프로세스 재시작 시 사라집니다.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use nav_core::{Environment, JobType};
use uuid::Uuid;

/// 락 키.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    /// 작업 유형
    pub job_type: JobType,
    /// 테넌트 id
    pub tenant_id: Uuid,
    /// 실행 환경
    pub environment: Environment,
    /// 범위 식별자
    pub scope: String,
}

impl LockKey {
    /// 테넌트 전체 범위 키 (daily/weekly).
    pub fn tenant_wide(job_type: JobType, tenant_id: Uuid, environment: Environment) -> Self {
        Self {
            job_type,
            tenant_id,
            environment,
            scope: "all".to_string(),
        }
    }

    /// 스킴 집합 범위 키 (historical).
    ///
    /// 정렬 후 연결하므로 같은 집합은 순서와 무관하게 같은 키가 됩니다.
    pub fn for_schemes(
        job_type: JobType,
        tenant_id: Uuid,
        environment: Environment,
        scheme_codes: &[String],
    ) -> Self {
        let mut sorted: Vec<&str> = scheme_codes.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        Self {
            job_type,
            tenant_id,
            environment,
            scope: sorted.join(","),
        }
    }
}

/// 락 보유 정보.
#[derive(Debug, Clone)]
struct LockEntry {
    job_id: Uuid,
    acquired_at: DateTime<Utc>,
}

/// 프로세스 로컬 락 테이블.
///
/// 생성자 주입으로 소유권이 명시되며, 모듈 전역 싱글톤이 아닙니다.
/// 잠금 구간에서 await하지 않으므로 std Mutex로 충분합니다.
pub struct DownloadLockTable {
    locks: Mutex<HashMap<LockKey, LockEntry>>,
}

impl Default for DownloadLockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadLockTable {
    /// 빈 락 테이블 생성.
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 락 획득 시도.
    ///
    /// 이미 점유 중이면 보유 작업 id를 `Err`로 반환합니다.
    pub fn try_acquire(&self, key: LockKey, job_id: Uuid) -> Result<(), Uuid> {
        let mut locks = self.locks.lock().expect("락 테이블 mutex poisoned");
        if let Some(entry) = locks.get(&key) {
            return Err(entry.job_id);
        }
        locks.insert(
            key,
            LockEntry {
                job_id,
                acquired_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// 키의 현재 보유 작업 id.
    pub fn holder(&self, key: &LockKey) -> Option<Uuid> {
        let locks = self.locks.lock().expect("락 테이블 mutex poisoned");
        locks.get(key).map(|entry| entry.job_id)
    }

    /// 지정 작업이 보유한 모든 락을 해제합니다.
    ///
    /// 작업 종결/취소 경로 양쪽에서 호출되며, 이미 해제된 경우에도 안전합니다.
    pub fn release_job(&self, job_id: Uuid) {
        let mut locks = self.locks.lock().expect("락 테이블 mutex poisoned");
        locks.retain(|_, entry| entry.job_id != job_id);
    }

    /// 현재 점유 중인 락 수.
    pub fn active_count(&self) -> usize {
        let locks = self.locks.lock().expect("락 테이블 mutex poisoned");
        locks.len()
    }

    /// 가장 오래된 락의 획득 시각 (관측용).
    pub fn oldest_acquired_at(&self) -> Option<DateTime<Utc>> {
        let locks = self.locks.lock().expect("락 테이블 mutex poisoned");
        locks.values().map(|entry| entry.acquired_at).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(scope: &str) -> LockKey {
        LockKey {
            job_type: JobType::Daily,
            tenant_id: Uuid::nil(),
            environment: Environment::Live,
            scope: scope.to_string(),
        }
    }

    #[test]
    fn test_second_acquire_returns_holder_id() {
        let table = DownloadLockTable::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert!(table.try_acquire(key("all"), first).is_ok());
        assert!(table.oldest_acquired_at().is_some());
        assert_eq!(table.try_acquire(key("all"), second), Err(first));

        // 다른 키는 독립적으로 획득 가능
        assert!(table.try_acquire(key("other"), second).is_ok());
    }

    #[test]
    fn test_release_job_frees_key() {
        let table = DownloadLockTable::new();
        let job_id = Uuid::new_v4();

        table.try_acquire(key("all"), job_id).unwrap();
        table.release_job(job_id);
        // 중복 해제도 안전
        table.release_job(job_id);

        assert!(table.try_acquire(key("all"), Uuid::new_v4()).is_ok());
    }

    #[test]
    fn test_scheme_scope_is_order_independent() {
        let a = LockKey::for_schemes(
            JobType::Historical,
            Uuid::nil(),
            Environment::Live,
            &["2".to_string(), "1".to_string()],
        );
        let b = LockKey::for_schemes(
            JobType::Historical,
            Uuid::nil(),
            Environment::Live,
            &["1".to_string(), "2".to_string()],
        );
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_has_single_winner() {
        let table = Arc::new(DownloadLockTable::new());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let table = table.clone();
            handles.push(tokio::spawn(async move {
                table.try_acquire(key("all"), Uuid::new_v4()).is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(table.active_count(), 1);
    }
}
