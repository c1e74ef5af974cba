//! 다운로드 오케스트레이션 통합 테스트.
//!
//! 인메모리 JobStore와 스크립트된 제공자를 주입해 트리거 → 백그라운드
//! 실행 → 종결까지의 흐름을 검증합니다.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal_macros::dec;
use tokio::sync::Semaphore;
use uuid::Uuid;

use nav_core::{
    DownloadJob, Environment, FetchErrorKind, FetchFailure, FetchOptions, FetchResult, JobFilter,
    JobStatus, JobStore, JobUpdate, NavDataProvider, NavRecord, NavResult, NavSnapshot,
    NewDownloadJob, OrchestratorConfig, SchemeError, UpsertStats,
};
use nav_orchestrator::{DownloadLockTable, DownloadService, ProgressTracker};

// =============================================================================
// 테스트 더블
// =============================================================================

/// 인메모리 작업 저장소.
///
/// PostgreSQL 구현과 같은 계약을 지킵니다: 종결 상태의 작업은 갱신을
/// 무시하고 기존 레코드를 반환합니다.
#[derive(Default)]
struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, DownloadJob>>,
    prices: Mutex<HashMap<(String, NaiveDate), rust_decimal::Decimal>>,
    tracked: Vec<String>,
    backfilled: Mutex<HashSet<String>>,
    fail_upserts_for: HashSet<String>,
}

impl MemoryJobStore {
    fn with_tracked(tracked: &[&str]) -> Self {
        Self {
            tracked: tracked.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn price_count(&self) -> usize {
        self.prices.lock().unwrap().len()
    }

    fn is_backfilled(&self, code: &str) -> bool {
        self.backfilled.lock().unwrap().contains(code)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, new_job: NewDownloadJob) -> NavResult<DownloadJob> {
        let job = DownloadJob {
            id: Uuid::new_v4(),
            tenant_id: new_job.tenant_id,
            user_id: new_job.user_id,
            environment: new_job.environment,
            job_type: new_job.job_type,
            scheme_codes: new_job.scheme_codes,
            status: JobStatus::Pending,
            start_date: new_job.start_date,
            end_date: new_job.end_date,
            parent_job_id: new_job.parent_job_id,
            chunk_number: new_job.chunk_number,
            total_chunks: new_job.total_chunks,
            result_summary: None,
            error_details: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(job)
    }

    async fn update_job(&self, job_id: Uuid, update: JobUpdate) -> NavResult<DownloadJob> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| nav_core::NavError::NotFound(format!("작업 없음: {}", job_id)))?;

        // 종결 상태는 전이하지 않는다
        if job.status.is_terminal() {
            return Ok(job.clone());
        }

        if let Some(status) = update.status {
            job.status = status;
            if status == JobStatus::Running && job.started_at.is_none() {
                job.started_at = Some(Utc::now());
            }
            if status.is_terminal() && job.completed_at.is_none() {
                job.completed_at = Some(Utc::now());
            }
        }
        if let Some(summary) = update.result_summary {
            job.result_summary = Some(summary);
        }
        if let Some(details) = update.error_details {
            job.error_details = Some(details);
        }
        Ok(job.clone())
    }

    async fn get_job(&self, job_id: Uuid) -> NavResult<Option<DownloadJob>> {
        Ok(self.jobs.lock().unwrap().get(&job_id).cloned())
    }

    async fn list_jobs(&self, filter: JobFilter) -> NavResult<Vec<DownloadJob>> {
        let jobs = self.jobs.lock().unwrap();
        let mut result: Vec<DownloadJob> = jobs
            .values()
            .filter(|job| {
                filter
                    .parent_job_id
                    .map(|parent| job.parent_job_id == Some(parent))
                    .unwrap_or(true)
                    && filter.status.map(|s| job.status == s).unwrap_or(true)
            })
            .cloned()
            .collect();
        result.sort_by_key(|job| (job.chunk_number, job.created_at));
        Ok(result)
    }

    async fn exists_for_date(
        &self,
        _tenant_id: Uuid,
        _environment: Environment,
        scheme_codes: &[String],
        date: NaiveDate,
    ) -> NavResult<HashMap<String, bool>> {
        let prices = self.prices.lock().unwrap();
        Ok(scheme_codes
            .iter()
            .map(|code| (code.clone(), prices.contains_key(&(code.clone(), date))))
            .collect())
    }

    async fn upsert_nav_prices(
        &self,
        _tenant_id: Uuid,
        _environment: Environment,
        records: &[NavRecord],
    ) -> NavResult<UpsertStats> {
        let mut prices = self.prices.lock().unwrap();
        let mut stats = UpsertStats::default();
        for record in records {
            if self.fail_upserts_for.contains(&record.scheme_code) {
                stats.failed += 1;
                stats.errors.push(SchemeError {
                    scheme_code: record.scheme_code.clone(),
                    message: "upsert 실패 (테스트)".to_string(),
                });
                continue;
            }
            let key = (record.scheme_code.clone(), record.date);
            if prices.insert(key, record.nav).is_none() {
                stats.inserted += 1;
            } else {
                stats.updated += 1;
            }
        }
        Ok(stats)
    }

    async fn tracked_scheme_codes(
        &self,
        _tenant_id: Uuid,
        _environment: Environment,
    ) -> NavResult<Vec<String>> {
        Ok(self.tracked.clone())
    }

    async fn backfill_completed(
        &self,
        _tenant_id: Uuid,
        _environment: Environment,
        scheme_codes: &[String],
    ) -> NavResult<HashMap<String, bool>> {
        let backfilled = self.backfilled.lock().unwrap();
        Ok(scheme_codes
            .iter()
            .map(|code| (code.clone(), backfilled.contains(code)))
            .collect())
    }

    async fn mark_backfill_complete(
        &self,
        _tenant_id: Uuid,
        _environment: Environment,
        scheme_codes: &[String],
    ) -> NavResult<()> {
        let mut backfilled = self.backfilled.lock().unwrap();
        for code in scheme_codes {
            backfilled.insert(code.clone());
        }
        Ok(())
    }
}

/// 스크립트된 데이터 제공자.
struct ScriptedProvider {
    daily_records: Vec<NavRecord>,
    daily_calls: AtomicUsize,
    historical_calls: Mutex<Vec<(NaiveDate, NaiveDate)>>,
    /// 이 시작일로 들어온 기간 조회는 실패한다
    fail_starts: HashSet<NaiveDate>,
    /// 설정 시 daily 조회가 permit을 받을 때까지 대기한다
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedProvider {
    fn new(daily_records: Vec<NavRecord>) -> Self {
        Self {
            daily_records,
            daily_calls: AtomicUsize::new(0),
            historical_calls: Mutex::new(Vec::new()),
            fail_starts: HashSet::new(),
            gate: None,
        }
    }

    fn gated(daily_records: Vec<NavRecord>, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(daily_records)
        }
    }

    fn failing_chunk(mut self, start: NaiveDate) -> Self {
        self.fail_starts.insert(start);
        self
    }

    fn snapshot(records: Vec<NavRecord>) -> NavSnapshot {
        NavSnapshot {
            records,
            invalid_rows: 0,
            source: "scripted".to_string(),
            request_id: Uuid::new_v4(),
            fetched_at: Utc::now(),
            elapsed_ms: 1,
        }
    }
}

#[async_trait]
impl NavDataProvider for ScriptedProvider {
    async fn fetch_daily(&self, _options: &FetchOptions) -> FetchResult {
        self.daily_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let permit = gate.acquire().await.expect("gate closed");
            permit.forget();
        }
        Ok(Self::snapshot(self.daily_records.clone()))
    }

    async fn fetch_historical(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        _options: &FetchOptions,
    ) -> FetchResult {
        self.historical_calls.lock().unwrap().push((start, end));
        if self.fail_starts.contains(&start) {
            return Err(FetchFailure::new(
                FetchErrorKind::Network,
                "scripted",
                "연결 실패 (테스트)",
            ));
        }
        // 구간 시작일 하루치 레코드를 돌려준다
        let records = self
            .daily_records
            .iter()
            .map(|r| NavRecord {
                date: start,
                ..r.clone()
            })
            .collect();
        Ok(Self::snapshot(records))
    }

    async fn fetch_for_scheme(&self, scheme_code: &str, options: &FetchOptions) -> FetchResult {
        let snapshot = self.fetch_daily(options).await?;
        let records = snapshot.filter_schemes(&[scheme_code.to_string()]);
        Ok(NavSnapshot { records, ..snapshot })
    }
}

// =============================================================================
// 헬퍼
// =============================================================================

fn record(code: &str, date: NaiveDate) -> NavRecord {
    NavRecord {
        scheme_code: code.to_string(),
        scheme_name: format!("스킴 {}", code),
        isin_growth: None,
        isin_div_reinvestment: None,
        nav: dec!(10.5),
        date,
    }
}

fn build_service(
    store: Arc<MemoryJobStore>,
    provider: Arc<ScriptedProvider>,
) -> (DownloadService, Arc<DownloadLockTable>) {
    let locks = Arc::new(DownloadLockTable::new());
    let progress = Arc::new(ProgressTracker::new(Duration::from_secs(60)));
    let service = DownloadService::new(
        store,
        provider,
        locks.clone(),
        progress,
        OrchestratorConfig::default(),
    );
    (service, locks)
}

/// 작업이 종결 상태가 될 때까지 폴링합니다.
async fn wait_for_terminal(store: &MemoryJobStore, job_id: Uuid) -> DownloadJob {
    for _ in 0..1000 {
        if let Some(job) = store.get_job(job_id).await.unwrap() {
            if job.status.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("작업이 종결되지 않음: {}", job_id);
}

fn tenant() -> Uuid {
    Uuid::new_v4()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// =============================================================================
// 시나리오
// =============================================================================

#[tokio::test]
async fn test_daily_download_filters_and_upserts_tracked_schemes() {
    let today = date(2024, 1, 15);
    let store = Arc::new(MemoryJobStore::with_tracked(&["100001", "100002"]));
    // 추적하지 않는 100003은 제외되어야 한다
    let provider = Arc::new(ScriptedProvider::new(vec![
        record("100001", today),
        record("100002", today),
        record("100003", today),
    ]));
    let (service, locks) = build_service(store.clone(), provider.clone());

    let outcome = service
        .trigger_daily(tenant(), None, Environment::Live)
        .await
        .unwrap();
    assert!(!outcome.already_in_progress);
    assert!(outcome.chunk_plan.is_none());

    let job = wait_for_terminal(&store, outcome.job_id).await;
    assert_eq!(job.status, JobStatus::Completed);

    let summary = job.result_summary.unwrap();
    assert_eq!(summary.total_records, 2);
    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.failed, 0);

    assert_eq!(store.price_count(), 2);
    assert_eq!(locks.active_count(), 0);

    // 저장된 날짜에 대한 존재 여부 조회
    let exists = store
        .exists_for_date(
            job.tenant_id,
            Environment::Live,
            &["100001".to_string(), "100003".to_string()],
            today,
        )
        .await
        .unwrap();
    assert_eq!(exists["100001"], true);
    assert_eq!(exists["100003"], false);

    let progress = service.get_progress(job.id).unwrap();
    assert_eq!(progress.status, JobStatus::Completed);
    assert_eq!(progress.percentage, 100);
}

#[tokio::test]
async fn test_duplicate_trigger_returns_first_job_id() {
    let today = date(2024, 1, 15);
    let gate = Arc::new(Semaphore::new(0));
    let store = Arc::new(MemoryJobStore::with_tracked(&["100001"]));
    let provider = Arc::new(ScriptedProvider::gated(
        vec![record("100001", today)],
        gate.clone(),
    ));
    let (service, _locks) = build_service(store.clone(), provider.clone());

    let tenant_id = tenant();
    let first = service
        .trigger_daily(tenant_id, None, Environment::Live)
        .await
        .unwrap();

    // 같은 락 키의 두 번째 트리거는 새 작업을 만들지 않는다
    let second = service
        .trigger_daily(tenant_id, None, Environment::Live)
        .await
        .unwrap();
    assert!(second.already_in_progress);
    assert_eq!(second.job_id, first.job_id);

    // 다른 환경은 다른 락 키이므로 동시 실행 가능
    let other_env = service
        .trigger_daily(tenant_id, None, Environment::Test)
        .await
        .unwrap();
    assert!(!other_env.already_in_progress);
    assert_ne!(other_env.job_id, first.job_id);

    gate.add_permits(2);
    let job = wait_for_terminal(&store, first.job_id).await;
    assert_eq!(job.status, JobStatus::Completed);

    // 종결 후에는 락이 풀려 새 작업이 생성된다
    gate.add_permits(1);
    let third = service
        .trigger_daily(tenant_id, None, Environment::Live)
        .await
        .unwrap();
    assert!(!third.already_in_progress);
    assert_ne!(third.job_id, first.job_id);
}

#[tokio::test]
async fn test_200_day_backfill_continues_past_failed_chunk() {
    let start = date(2023, 1, 1);
    // 양 끝 포함 200일
    let end = start + chrono::Duration::days(199);
    let chunk2_start = start + chrono::Duration::days(90);

    let store = Arc::new(MemoryJobStore::with_tracked(&["100001"]));
    let provider = Arc::new(
        ScriptedProvider::new(vec![record("100001", start)]).failing_chunk(chunk2_start),
    );
    let (service, locks) = build_service(store.clone(), provider.clone());

    let outcome = service
        .trigger_historical(
            tenant(),
            None,
            Environment::Live,
            vec!["100001".to_string()],
            start,
            end,
        )
        .await
        .unwrap();

    // 분할 계획이 즉시 반환된다: 90 / 90 / 20일
    let plan = outcome.chunk_plan.clone().unwrap();
    assert_eq!(plan.len(), 3);
    assert_eq!(plan[0].days(), 90);
    assert_eq!(plan[1].days(), 90);
    assert_eq!(plan[2].days(), 20);

    let parent = wait_for_terminal(&store, outcome.job_id).await;
    // 청크 2 실패는 부모를 failed로 만들지 않고 부분 실패로 기록된다
    assert_eq!(parent.status, JobStatus::CompletedWithErrors);

    let children = store
        .list_jobs(JobFilter {
            parent_job_id: Some(parent.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(children.len(), 3);
    assert_eq!(children[0].status, JobStatus::Completed);
    assert_eq!(children[1].status, JobStatus::Failed);
    // 청크 2가 실패해도 청크 3은 실행된다
    assert_eq!(children[2].status, JobStatus::Completed);

    // 저장된 청크 구간이 분할 계획과 일치한다 (round-trip)
    for (child, chunk) in children.iter().zip(plan.iter()) {
        assert_eq!(child.chunk_number, Some(chunk.number));
        assert_eq!(child.start_date, Some(chunk.start));
        assert_eq!(child.end_date, Some(chunk.end));
    }

    // 청크는 순서대로 실행되었다
    let calls = provider.historical_calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0], (plan[0].start, plan[0].end));
    assert_eq!(calls[1], (plan[1].start, plan[1].end));
    assert_eq!(calls[2], (plan[2].start, plan[2].end));

    let sequential = service.get_sequential_progress(parent.id).unwrap();
    assert_eq!(sequential.total_chunks, 3);
    assert_eq!(sequential.completed_chunks, 3);
    assert_eq!(sequential.chunk_errors.len(), 1);
    assert_eq!(sequential.chunk_errors[0].chunk_number, 2);

    assert!(store.is_backfilled("100001"));
    assert_eq!(locks.active_count(), 0);
}

#[tokio::test]
async fn test_short_backfill_runs_as_single_job() {
    let start = date(2023, 6, 1);
    let end = start + chrono::Duration::days(29);

    let store = Arc::new(MemoryJobStore::with_tracked(&["100001"]));
    let provider = Arc::new(ScriptedProvider::new(vec![record("100001", start)]));
    let (service, _locks) = build_service(store.clone(), provider.clone());

    let outcome = service
        .trigger_historical(
            tenant(),
            None,
            Environment::Live,
            vec!["100001".to_string()],
            start,
            end,
        )
        .await
        .unwrap();

    // 90일 이하는 부모/청크 구조 없이 단일 작업
    assert!(outcome.chunk_plan.is_none());

    let job = wait_for_terminal(&store, outcome.job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.parent_job_id.is_none());
    assert!(job.total_chunks.is_none());
    assert!(store.is_backfilled("100001"));
}

#[tokio::test]
async fn test_backfilled_schemes_conflict() {
    let store = Arc::new(MemoryJobStore::with_tracked(&["100001"]));
    store
        .mark_backfill_complete(Uuid::nil(), Environment::Live, &["100001".to_string()])
        .await
        .unwrap();
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let (service, _locks) = build_service(store.clone(), provider);

    let result = service
        .trigger_historical(
            tenant(),
            None,
            Environment::Live,
            vec!["100001".to_string()],
            date(2023, 1, 1),
            date(2023, 1, 31),
        )
        .await;

    assert!(matches!(result, Err(nav_core::NavError::Conflict(_))));
}

#[tokio::test]
async fn test_validation_errors_return_synchronously() {
    let store = Arc::new(MemoryJobStore::with_tracked(&["100001"]));
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let (service, _locks) = build_service(store.clone(), provider);

    // 시작일 > 종료일
    let inverted = service
        .trigger_historical(
            tenant(),
            None,
            Environment::Live,
            vec!["100001".to_string()],
            date(2023, 2, 1),
            date(2023, 1, 1),
        )
        .await;
    assert!(matches!(inverted, Err(nav_core::NavError::Validation(_))));

    // 빈 스킴 목록
    let empty = service
        .trigger_historical(
            tenant(),
            None,
            Environment::Live,
            vec![],
            date(2023, 1, 1),
            date(2023, 1, 31),
        )
        .await;
    assert!(matches!(empty, Err(nav_core::NavError::Validation(_))));
}

#[tokio::test]
async fn test_cancel_while_running_discards_fetch_result() {
    let today = date(2024, 1, 15);
    let gate = Arc::new(Semaphore::new(0));
    let store = Arc::new(MemoryJobStore::with_tracked(&["100001"]));
    let provider = Arc::new(ScriptedProvider::gated(
        vec![record("100001", today)],
        gate.clone(),
    ));
    let (service, locks) = build_service(store.clone(), provider.clone());

    let outcome = service
        .trigger_daily(tenant(), None, Environment::Live)
        .await
        .unwrap();

    // 조회가 시작될 때까지 대기
    for _ in 0..1000 {
        if provider.daily_calls.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let cancelled = service.cancel_download(outcome.job_id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    // 락은 취소 시점에 즉시 해제된다
    assert_eq!(locks.active_count(), 0);

    // 진행 조회도 취소를 보고한다
    let progress = service.get_progress(outcome.job_id).unwrap();
    assert_eq!(progress.status, JobStatus::Cancelled);

    // 진행 중이던 조회를 끝까지 진행시킨다. 결과는 버려져야 한다.
    gate.add_permits(1);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let job = store.get_job(outcome.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(store.price_count(), 0);

    // 중복 취소는 충돌 에러
    let again = service.cancel_download(outcome.job_id).await;
    assert!(matches!(again, Err(nav_core::NavError::Conflict(_))));
}

#[tokio::test]
async fn test_upsert_errors_surface_as_completed_with_errors() {
    let today = date(2024, 1, 15);
    let store = Arc::new(MemoryJobStore {
        tracked: vec!["100001".to_string(), "100002".to_string()],
        fail_upserts_for: ["100002".to_string()].into_iter().collect(),
        ..Default::default()
    });
    let provider = Arc::new(ScriptedProvider::new(vec![
        record("100001", today),
        record("100002", today),
    ]));
    let (service, _locks) = build_service(store.clone(), provider);

    let outcome = service
        .trigger_daily(tenant(), None, Environment::Live)
        .await
        .unwrap();
    let job = wait_for_terminal(&store, outcome.job_id).await;

    assert_eq!(job.status, JobStatus::CompletedWithErrors);
    let summary = job.result_summary.unwrap();
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.scheme_errors.len(), 1);
    assert_eq!(summary.scheme_errors[0].scheme_code, "100002");
}
