//! 작업 저장소 추상화.
//!
//! 오케스트레이터가 소비하는 영속 저장소 계약입니다. 운영 구현은
//! nav-data의 PostgreSQL 저장소이며, 테스트에서는 인메모리 구현을
//! 주입할 수 있습니다.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{DownloadJob, JobFilter, JobUpdate, NewDownloadJob, SchemeError};
use super::nav::{Environment, NavRecord};
use crate::error::NavResult;

/// NAV upsert 통계.
///
/// (테넌트, 스킴, 기준일, 환경) 키 기준 삽입/갱신/실패를 구분합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpsertStats {
    /// 삽입된 레코드 수
    pub inserted: usize,
    /// 갱신된 레코드 수
    pub updated: usize,
    /// 실패한 레코드 수
    pub failed: usize,
    /// 스킴 단위 오류
    pub errors: Vec<SchemeError>,
}

impl UpsertStats {
    /// 처리된 총 레코드 수.
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.failed
    }
}

/// 작업 저장소 trait.
///
/// 작업 레코드와 그 종결 결과, NAV 가격 테이블, 스킴 백필 플래그에 대한
/// 연산을 제공합니다. 상태 갱신은 단방향 전이 불변식을 지켜야 하며,
/// 종결 상태의 작업을 다시 전이시키는 갱신은 무시되어야 합니다.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// 새 작업 생성 (상태 pending).
    async fn create_job(&self, new_job: NewDownloadJob) -> NavResult<DownloadJob>;

    /// 작업 갱신. 종결 상태에 대한 전이 시도는 기존 레코드를 그대로 반환합니다.
    async fn update_job(&self, job_id: Uuid, update: JobUpdate) -> NavResult<DownloadJob>;

    /// 작업 단건 조회.
    async fn get_job(&self, job_id: Uuid) -> NavResult<Option<DownloadJob>>;

    /// 작업 목록 조회.
    async fn list_jobs(&self, filter: JobFilter) -> NavResult<Vec<DownloadJob>>;

    /// 지정 날짜의 가격 레코드 존재 여부를 스킴별로 반환합니다.
    async fn exists_for_date(
        &self,
        tenant_id: Uuid,
        environment: Environment,
        scheme_codes: &[String],
        date: NaiveDate,
    ) -> NavResult<HashMap<String, bool>>;

    /// NAV 레코드 upsert. 레코드 단위로 삽입/갱신/실패를 집계합니다.
    async fn upsert_nav_prices(
        &self,
        tenant_id: Uuid,
        environment: Environment,
        records: &[NavRecord],
    ) -> NavResult<UpsertStats>;

    /// 테넌트가 추적 중인 스킴 코드 목록.
    async fn tracked_scheme_codes(
        &self,
        tenant_id: Uuid,
        environment: Environment,
    ) -> NavResult<Vec<String>>;

    /// 과거 데이터 백필이 완료된 스킴 여부를 스킴별로 반환합니다.
    async fn backfill_completed(
        &self,
        tenant_id: Uuid,
        environment: Environment,
        scheme_codes: &[String],
    ) -> NavResult<HashMap<String, bool>>;

    /// 스킴들의 백필 완료 플래그를 설정합니다.
    async fn mark_backfill_complete(
        &self,
        tenant_id: Uuid,
        environment: Environment,
        scheme_codes: &[String],
    ) -> NavResult<()>;
}
