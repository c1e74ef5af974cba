//! 다운로드 트리거 서비스.
//!
//! 트리거 연산의 공개 표면입니다. 모든 트리거는 락 획득과 작업 생성까지만
//! 동기적으로 수행하고, 실행은 분리 태스크에 맡긴 뒤 즉시 작업 id를
//! 반환합니다. 실패는 이후 진행 상태 폴링으로만 관측됩니다.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use nav_core::{
    DownloadJob, Environment, JobFilter, JobStatus, JobStore, JobType, JobUpdate,
    NavDataProvider, NavError, NavResult, NewDownloadJob, OrchestratorConfig,
};
use serde::Serialize;
use uuid::Uuid;

use crate::chunking::{split_date_range, DateChunk};
use crate::locks::{DownloadLockTable, LockKey};
use crate::pipeline::{self, JobContext};
use crate::progress::{ProgressSnapshot, ProgressTracker, SequentialProgress};

/// 트리거 호출 결과.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerOutcome {
    /// 생성된(또는 이미 실행 중인) 작업 id
    pub job_id: Uuid,
    /// 같은 락 키의 작업이 이미 실행 중이어서 기존 id를 반환했는지 여부
    pub already_in_progress: bool,
    /// 청크 분할 계획 (분할된 historical 요청에서만, UI 미리보기용)
    pub chunk_plan: Option<Vec<DateChunk>>,
}

impl TriggerOutcome {
    fn new_job(job_id: Uuid) -> Self {
        Self {
            job_id,
            already_in_progress: false,
            chunk_plan: None,
        }
    }

    fn duplicate(job_id: Uuid) -> Self {
        Self {
            job_id,
            already_in_progress: true,
            chunk_plan: None,
        }
    }
}

/// 다운로드 오케스트레이션 서비스.
///
/// 락 테이블과 진행 추적기는 생성자에서 주입되는 명시적 소유 상태입니다.
pub struct DownloadService {
    store: Arc<dyn JobStore>,
    provider: Arc<dyn NavDataProvider>,
    locks: Arc<DownloadLockTable>,
    progress: Arc<ProgressTracker>,
    config: OrchestratorConfig,
}

impl DownloadService {
    /// 새 서비스 생성.
    pub fn new(
        store: Arc<dyn JobStore>,
        provider: Arc<dyn NavDataProvider>,
        locks: Arc<DownloadLockTable>,
        progress: Arc<ProgressTracker>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            provider,
            locks,
            progress,
            config,
        }
    }

    fn job_context(&self) -> JobContext {
        JobContext {
            store: self.store.clone(),
            provider: self.provider.clone(),
            locks: self.locks.clone(),
            progress: self.progress.clone(),
        }
    }

    /// 일일 다운로드 트리거.
    ///
    /// 대상 스킴은 테넌트가 추적 중인 스킴 전체입니다.
    pub async fn trigger_daily(
        &self,
        tenant_id: Uuid,
        user_id: Option<Uuid>,
        environment: Environment,
    ) -> NavResult<TriggerOutcome> {
        let scheme_codes = self
            .store
            .tracked_scheme_codes(tenant_id, environment)
            .await?;
        self.trigger_snapshot_job(JobType::Daily, tenant_id, user_id, environment, scheme_codes)
            .await
    }

    /// 주간 다운로드 트리거 (일일 스냅샷 재사용).
    pub async fn trigger_weekly(
        &self,
        tenant_id: Uuid,
        environment: Environment,
    ) -> NavResult<TriggerOutcome> {
        let scheme_codes = self
            .store
            .tracked_scheme_codes(tenant_id, environment)
            .await?;
        self.trigger_snapshot_job(JobType::Weekly, tenant_id, None, environment, scheme_codes)
            .await
    }

    /// daily/weekly 공통 경로.
    async fn trigger_snapshot_job(
        &self,
        job_type: JobType,
        tenant_id: Uuid,
        user_id: Option<Uuid>,
        environment: Environment,
        scheme_codes: Vec<String>,
    ) -> NavResult<TriggerOutcome> {
        let key = LockKey::tenant_wide(job_type, tenant_id, environment);
        if let Some(holder) = self.locks.holder(&key) {
            tracing::info!(job_type = %job_type, tenant_id = %tenant_id, holder = %holder,
                "이미 실행 중인 작업, 기존 id 반환");
            return Ok(TriggerOutcome::duplicate(holder));
        }

        let job = self
            .store
            .create_job(NewDownloadJob::simple(
                tenant_id,
                user_id,
                environment,
                job_type,
                scheme_codes,
            ))
            .await?;

        if let Err(holder) = self.locks.try_acquire(key, job.id) {
            // 생성과 획득 사이에 경쟁자가 락을 가져간 경우
            let _ = self
                .store
                .update_job(job.id, JobUpdate::status(JobStatus::Cancelled))
                .await;
            return Ok(TriggerOutcome::duplicate(holder));
        }

        self.progress.start_job(job.id);
        tracing::info!(job_id = %job.id, job_type = %job_type, tenant_id = %tenant_id,
            "다운로드 작업 시작");
        pipeline::spawn_single(self.job_context(), job.clone());

        Ok(TriggerOutcome::new_job(job.id))
    }

    /// 기간 백필 다운로드 트리거.
    ///
    /// 90일을 넘는 범위는 청크로 분할되어 부모 작업 아래 순차 실행되며,
    /// 분할 계획이 즉시 반환됩니다.
    pub async fn trigger_historical(
        &self,
        tenant_id: Uuid,
        user_id: Option<Uuid>,
        environment: Environment,
        scheme_codes: Vec<String>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> NavResult<TriggerOutcome> {
        // 동기 검증: 트리거 호출에서 바로 반환되는 에러들
        if scheme_codes.is_empty() {
            return Err(NavError::Validation(
                "대상 스킴이 지정되지 않았습니다".to_string(),
            ));
        }
        if start > end {
            return Err(NavError::Validation(format!(
                "시작일({})이 종료일({})보다 늦습니다",
                start, end
            )));
        }
        if end > Utc::now().date_naive() {
            return Err(NavError::Validation(format!("종료일({})이 미래입니다", end)));
        }

        // 이미 백필이 끝난 스킴은 대상에서 제외한다
        let completed = self
            .store
            .backfill_completed(tenant_id, environment, &scheme_codes)
            .await?;
        let targets: Vec<String> = scheme_codes
            .into_iter()
            .filter(|code| !completed.get(code).copied().unwrap_or(false))
            .collect();
        if targets.is_empty() {
            return Err(NavError::Conflict(
                "요청한 모든 스킴의 과거 데이터 백필이 이미 완료되었습니다".to_string(),
            ));
        }

        let key = LockKey::for_schemes(JobType::Historical, tenant_id, environment, &targets);
        if let Some(holder) = self.locks.holder(&key) {
            tracing::info!(tenant_id = %tenant_id, holder = %holder,
                "이미 실행 중인 백필, 기존 id 반환");
            return Ok(TriggerOutcome::duplicate(holder));
        }

        let chunks = split_date_range(start, end, self.config.max_chunk_days);

        if chunks.len() <= 1 {
            // 단일 구간: 부모/청크 간접 구조 없이 바로 실행
            let job = self
                .store
                .create_job(NewDownloadJob {
                    tenant_id,
                    user_id,
                    environment,
                    job_type: JobType::Historical,
                    scheme_codes: targets,
                    start_date: Some(start),
                    end_date: Some(end),
                    parent_job_id: None,
                    chunk_number: None,
                    total_chunks: None,
                })
                .await?;

            if let Err(holder) = self.locks.try_acquire(key, job.id) {
                let _ = self
                    .store
                    .update_job(job.id, JobUpdate::status(JobStatus::Cancelled))
                    .await;
                return Ok(TriggerOutcome::duplicate(holder));
            }

            self.progress.start_job(job.id);
            tracing::info!(job_id = %job.id, start = %start, end = %end, "백필 작업 시작");
            pipeline::spawn_single(self.job_context(), job.clone());

            return Ok(TriggerOutcome::new_job(job.id));
        }

        // 분할 경로: 부모 + 청크별 자식 작업
        let total_chunks = chunks.len() as i32;
        let parent = self
            .store
            .create_job(NewDownloadJob {
                tenant_id,
                user_id,
                environment,
                job_type: JobType::Historical,
                scheme_codes: targets.clone(),
                start_date: Some(start),
                end_date: Some(end),
                parent_job_id: None,
                chunk_number: None,
                total_chunks: Some(total_chunks),
            })
            .await?;

        if let Err(holder) = self.locks.try_acquire(key, parent.id) {
            let _ = self
                .store
                .update_job(parent.id, JobUpdate::status(JobStatus::Cancelled))
                .await;
            return Ok(TriggerOutcome::duplicate(holder));
        }

        let mut children = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let child = self
                .store
                .create_job(NewDownloadJob {
                    tenant_id,
                    user_id,
                    environment,
                    job_type: JobType::Historical,
                    scheme_codes: targets.clone(),
                    start_date: Some(chunk.start),
                    end_date: Some(chunk.end),
                    parent_job_id: Some(parent.id),
                    chunk_number: Some(chunk.number),
                    total_chunks: Some(total_chunks),
                })
                .await?;
            children.push(child);
        }

        self.progress.start_job(parent.id);
        self.progress.start_sequential(parent.id, chunks.len());
        tracing::info!(
            job_id = %parent.id,
            chunks = chunks.len(),
            start = %start,
            end = %end,
            "분할 백필 작업 시작"
        );
        pipeline::spawn_sequential(self.job_context(), parent.clone(), children);

        Ok(TriggerOutcome {
            job_id: parent.id,
            already_in_progress: false,
            chunk_plan: Some(chunks),
        })
    }

    /// 다운로드 취소.
    ///
    /// 협조적 취소입니다: 상태를 cancelled로 전이시키고 락을 해제하며,
    /// 진행 중이던 외부 조회는 다음 체크포인트에서 결과가 버려집니다.
    pub async fn cancel_download(&self, job_id: Uuid) -> NavResult<DownloadJob> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| NavError::NotFound(format!("작업 없음: {}", job_id)))?;

        if job.status.is_terminal() {
            return Err(NavError::Conflict(format!(
                "이미 종결된 작업입니다: {} ({})",
                job_id, job.status
            )));
        }

        let cancelled = self
            .store
            .update_job(job_id, JobUpdate::status(JobStatus::Cancelled))
            .await?;

        // 부모 취소 시 대기 중인 청크도 함께 취소한다
        if cancelled.total_chunks.is_some() && cancelled.parent_job_id.is_none() {
            let children = self
                .store
                .list_jobs(JobFilter {
                    parent_job_id: Some(job_id),
                    ..Default::default()
                })
                .await?;
            for child in children {
                if !child.status.is_terminal() {
                    let _ = self
                        .store
                        .update_job(child.id, JobUpdate::status(JobStatus::Cancelled))
                        .await;
                    self.progress.request_cancel(child.id);
                }
            }
        }

        self.progress.request_cancel(job_id);
        self.locks.release_job(job_id);
        self.progress.clone().schedule_cleanup(job_id);

        tracing::info!(job_id = %job_id, "다운로드 취소 처리");
        Ok(cancelled)
    }

    /// 진행 스냅샷 조회.
    pub fn get_progress(&self, job_id: Uuid) -> Option<ProgressSnapshot> {
        self.progress.get(job_id)
    }

    /// 실행 중인 모든 다운로드.
    pub fn get_active_downloads(&self) -> Vec<ProgressSnapshot> {
        self.progress.active()
    }

    /// 부모 작업의 청크 단위 진행.
    pub fn get_sequential_progress(&self, parent_job_id: Uuid) -> Option<SequentialProgress> {
        self.progress.get_sequential(parent_job_id)
    }

    /// 작업 단건 조회.
    pub async fn get_job(&self, job_id: Uuid) -> NavResult<Option<DownloadJob>> {
        self.store.get_job(job_id).await
    }

    /// 작업 목록 조회.
    pub async fn list_jobs(&self, filter: JobFilter) -> NavResult<Vec<DownloadJob>> {
        self.store.list_jobs(filter).await
    }
}
