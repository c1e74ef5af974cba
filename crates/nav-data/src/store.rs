//! nav-core 저장소 trait의 PostgreSQL 구현.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use nav_core::{
    DownloadJob, Environment, ExecutionStatus, JobFilter, JobStore, JobUpdate, NavError,
    NavRecord, NavResult, NewDownloadJob, NewSchedulerConfig, ScheduleExecution, SchedulerConfig,
    SchedulerStore, TriggerSource, UpsertStats,
};

use crate::storage::{
    NavJobRepository, NavPriceRepository, ScheduleExecutionRepository, SchedulerConfigRepository,
    SchemeRepository,
};

/// PostgreSQL 기반 작업 저장소.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// 새 저장소 생성.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self, new_job: NewDownloadJob) -> NavResult<DownloadJob> {
        let row = NavJobRepository::create(&self.pool, &new_job).await?;
        row.into_domain().map_err(NavError::Internal)
    }

    async fn update_job(&self, job_id: Uuid, update: JobUpdate) -> NavResult<DownloadJob> {
        match NavJobRepository::update(&self.pool, job_id, &update).await? {
            Some(row) => row.into_domain().map_err(NavError::Internal),
            // 종결 상태였거나 없는 작업. 기존 row를 그대로 반환.
            None => match NavJobRepository::get(&self.pool, job_id).await? {
                Some(row) => row.into_domain().map_err(NavError::Internal),
                None => Err(NavError::NotFound(format!("작업 없음: {}", job_id))),
            },
        }
    }

    async fn get_job(&self, job_id: Uuid) -> NavResult<Option<DownloadJob>> {
        match NavJobRepository::get(&self.pool, job_id).await? {
            Some(row) => Ok(Some(row.into_domain().map_err(NavError::Internal)?)),
            None => Ok(None),
        }
    }

    async fn list_jobs(&self, filter: JobFilter) -> NavResult<Vec<DownloadJob>> {
        let rows = NavJobRepository::list(&self.pool, &filter).await?;
        rows.into_iter()
            .map(|row| row.into_domain().map_err(NavError::Internal))
            .collect()
    }

    async fn exists_for_date(
        &self,
        tenant_id: Uuid,
        environment: Environment,
        scheme_codes: &[String],
        date: NaiveDate,
    ) -> NavResult<HashMap<String, bool>> {
        Ok(NavPriceRepository::exists_for_date(
            &self.pool,
            tenant_id,
            environment,
            scheme_codes,
            date,
        )
        .await?)
    }

    async fn upsert_nav_prices(
        &self,
        tenant_id: Uuid,
        environment: Environment,
        records: &[NavRecord],
    ) -> NavResult<UpsertStats> {
        Ok(NavPriceRepository::upsert_batch(&self.pool, tenant_id, environment, records).await)
    }

    async fn tracked_scheme_codes(
        &self,
        tenant_id: Uuid,
        environment: Environment,
    ) -> NavResult<Vec<String>> {
        Ok(SchemeRepository::tracked_codes(&self.pool, tenant_id, environment).await?)
    }

    async fn backfill_completed(
        &self,
        tenant_id: Uuid,
        environment: Environment,
        scheme_codes: &[String],
    ) -> NavResult<HashMap<String, bool>> {
        Ok(SchemeRepository::backfill_completed(
            &self.pool,
            tenant_id,
            environment,
            scheme_codes,
        )
        .await?)
    }

    async fn mark_backfill_complete(
        &self,
        tenant_id: Uuid,
        environment: Environment,
        scheme_codes: &[String],
    ) -> NavResult<()> {
        Ok(SchemeRepository::mark_backfill_complete(
            &self.pool,
            tenant_id,
            environment,
            scheme_codes,
        )
        .await?)
    }
}

/// PostgreSQL 기반 스케줄러 저장소.
#[derive(Clone)]
pub struct PgSchedulerStore {
    pool: PgPool,
}

impl PgSchedulerStore {
    /// 새 저장소 생성.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SchedulerStore for PgSchedulerStore {
    async fn upsert_config(&self, new_config: NewSchedulerConfig) -> NavResult<SchedulerConfig> {
        let row = SchedulerConfigRepository::upsert(&self.pool, &new_config).await?;
        row.into_domain().map_err(NavError::Internal)
    }

    async fn get_config(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        environment: Environment,
    ) -> NavResult<Option<SchedulerConfig>> {
        match SchedulerConfigRepository::get(&self.pool, tenant_id, user_id, environment).await? {
            Some(row) => Ok(Some(row.into_domain().map_err(NavError::Internal)?)),
            None => Ok(None),
        }
    }

    async fn get_config_by_id(&self, config_id: Uuid) -> NavResult<Option<SchedulerConfig>> {
        match SchedulerConfigRepository::get_by_id(&self.pool, config_id).await? {
            Some(row) => Ok(Some(row.into_domain().map_err(NavError::Internal)?)),
            None => Ok(None),
        }
    }

    async fn delete_config(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        environment: Environment,
    ) -> NavResult<bool> {
        Ok(SchedulerConfigRepository::delete(&self.pool, tenant_id, user_id, environment).await?)
    }

    async fn list_enabled_configs(&self) -> NavResult<Vec<SchedulerConfig>> {
        let rows = SchedulerConfigRepository::list_enabled(&self.pool).await?;
        rows.into_iter()
            .map(|row| row.into_domain().map_err(NavError::Internal))
            .collect()
    }

    async fn insert_execution(
        &self,
        config_id: Uuid,
        trigger_source: TriggerSource,
    ) -> NavResult<ScheduleExecution> {
        let row =
            ScheduleExecutionRepository::insert(&self.pool, config_id, trigger_source).await?;
        row.into_domain().map_err(NavError::Internal)
    }

    async fn complete_execution(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        external_execution_id: Option<String>,
        error_message: Option<String>,
        duration_ms: i64,
    ) -> NavResult<()> {
        Ok(ScheduleExecutionRepository::complete(
            &self.pool,
            execution_id,
            status,
            external_execution_id,
            error_message,
            duration_ms,
        )
        .await?)
    }

    async fn record_skipped(
        &self,
        config_id: Uuid,
        trigger_source: TriggerSource,
        reason: &str,
    ) -> NavResult<()> {
        Ok(
            ScheduleExecutionRepository::record_skipped(
                &self.pool,
                config_id,
                trigger_source,
                reason,
            )
            .await?,
        )
    }

    async fn record_fire_result(
        &self,
        config_id: Uuid,
        success: bool,
        next_execution_at: Option<DateTime<Utc>>,
    ) -> NavResult<()> {
        Ok(SchedulerConfigRepository::record_fire_result(
            &self.pool,
            config_id,
            success,
            next_execution_at,
        )
        .await?)
    }

    async fn recent_executions(
        &self,
        config_id: Uuid,
        limit: i64,
    ) -> NavResult<Vec<ScheduleExecution>> {
        let rows = ScheduleExecutionRepository::recent(&self.pool, config_id, limit).await?;
        rows.into_iter()
            .map(|row| row.into_domain().map_err(NavError::Internal))
            .collect()
    }

    async fn find_execution_by_external_id(
        &self,
        external_execution_id: &str,
    ) -> NavResult<Option<ScheduleExecution>> {
        match ScheduleExecutionRepository::find_by_external_id(&self.pool, external_execution_id)
            .await?
        {
            Some(row) => Ok(Some(row.into_domain().map_err(NavError::Internal)?)),
            None => Ok(None),
        }
    }
}
