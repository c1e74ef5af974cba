//! 스케줄러 설정 및 실행 이력 저장소.

use chrono::{DateTime, NaiveTime, Utc};
use nav_core::{
    Environment, ExecutionStatus, NewSchedulerConfig, ScheduleExecution, ScheduleType,
    SchedulerConfig, TriggerSource,
};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// scheduler_configs 테이블 row.
#[derive(Debug, Clone, FromRow)]
pub struct SchedulerConfigRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub environment: String,
    pub schedule_type: String,
    pub cron_expression: String,
    pub preferred_time: Option<NaiveTime>,
    pub timezone: String,
    pub webhook_url: Option<String>,
    pub enabled: bool,
    pub next_execution_at: Option<DateTime<Utc>>,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub execution_count: i64,
    pub failure_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SchedulerConfigRow {
    /// 도메인 타입으로 변환.
    pub fn into_domain(self) -> Result<SchedulerConfig, String> {
        Ok(SchedulerConfig {
            id: self.id,
            tenant_id: self.tenant_id,
            user_id: self.user_id,
            environment: self.environment.parse::<Environment>()?,
            schedule_type: self.schedule_type.parse::<ScheduleType>()?,
            cron_expression: self.cron_expression,
            preferred_time: self.preferred_time,
            timezone: self.timezone,
            webhook_url: self.webhook_url,
            enabled: self.enabled,
            next_execution_at: self.next_execution_at,
            last_executed_at: self.last_executed_at,
            execution_count: self.execution_count,
            failure_count: self.failure_count,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// schedule_executions 테이블 row.
#[derive(Debug, Clone, FromRow)]
pub struct ScheduleExecutionRow {
    pub id: Uuid,
    pub config_id: Uuid,
    pub executed_at: DateTime<Utc>,
    pub status: String,
    pub trigger_source: String,
    pub external_execution_id: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
}

impl ScheduleExecutionRow {
    /// 도메인 타입으로 변환.
    pub fn into_domain(self) -> Result<ScheduleExecution, String> {
        let trigger_source = match self.trigger_source.as_str() {
            "manual" => TriggerSource::Manual,
            _ => TriggerSource::Scheduled,
        };
        Ok(ScheduleExecution {
            id: self.id,
            config_id: self.config_id,
            executed_at: self.executed_at,
            status: self.status.parse::<ExecutionStatus>()?,
            trigger_source,
            external_execution_id: self.external_execution_id,
            error_message: self.error_message,
            duration_ms: self.duration_ms,
        })
    }
}

/// 스케줄러 설정 저장소.
pub struct SchedulerConfigRepository;

impl SchedulerConfigRepository {
    /// 설정 upsert.
    ///
    /// (tenant, user, environment) identity당 하나만 존재합니다.
    /// 기존 설정 갱신 시 누적 카운터는 보존됩니다.
    pub async fn upsert(
        pool: &PgPool,
        new_config: &NewSchedulerConfig,
    ) -> Result<SchedulerConfigRow, sqlx::Error> {
        sqlx::query_as::<_, SchedulerConfigRow>(
            r#"
            INSERT INTO scheduler_configs (
                id, tenant_id, user_id, environment, schedule_type, cron_expression,
                preferred_time, timezone, webhook_url, enabled, next_execution_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (tenant_id, user_id, environment)
            DO UPDATE SET
                schedule_type = EXCLUDED.schedule_type,
                cron_expression = EXCLUDED.cron_expression,
                preferred_time = EXCLUDED.preferred_time,
                timezone = EXCLUDED.timezone,
                webhook_url = EXCLUDED.webhook_url,
                enabled = EXCLUDED.enabled,
                next_execution_at = EXCLUDED.next_execution_at,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new_config.tenant_id)
        .bind(new_config.user_id)
        .bind(new_config.environment.as_str())
        .bind(new_config.schedule_type.as_str())
        .bind(&new_config.cron_expression)
        .bind(new_config.preferred_time)
        .bind(&new_config.timezone)
        .bind(&new_config.webhook_url)
        .bind(new_config.enabled)
        .bind(new_config.next_execution_at)
        .fetch_one(pool)
        .await
    }

    /// identity로 조회.
    pub async fn get(
        pool: &PgPool,
        tenant_id: Uuid,
        user_id: Uuid,
        environment: Environment,
    ) -> Result<Option<SchedulerConfigRow>, sqlx::Error> {
        sqlx::query_as::<_, SchedulerConfigRow>(
            "SELECT * FROM scheduler_configs
             WHERE tenant_id = $1 AND user_id = $2 AND environment = $3",
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(environment.as_str())
        .fetch_optional(pool)
        .await
    }

    /// id로 조회.
    pub async fn get_by_id(
        pool: &PgPool,
        config_id: Uuid,
    ) -> Result<Option<SchedulerConfigRow>, sqlx::Error> {
        sqlx::query_as::<_, SchedulerConfigRow>("SELECT * FROM scheduler_configs WHERE id = $1")
            .bind(config_id)
            .fetch_optional(pool)
            .await
    }

    /// 삭제. 삭제된 row가 있으면 true.
    pub async fn delete(
        pool: &PgPool,
        tenant_id: Uuid,
        user_id: Uuid,
        environment: Environment,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM scheduler_configs
             WHERE tenant_id = $1 AND user_id = $2 AND environment = $3",
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(environment.as_str())
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 활성화된 모든 설정.
    pub async fn list_enabled(pool: &PgPool) -> Result<Vec<SchedulerConfigRow>, sqlx::Error> {
        sqlx::query_as::<_, SchedulerConfigRow>(
            "SELECT * FROM scheduler_configs WHERE enabled = true ORDER BY created_at",
        )
        .fetch_all(pool)
        .await
    }

    /// 실행 결과 반영.
    ///
    /// 실패한 실행도 enabled를 건드리지 않습니다.
    pub async fn record_fire_result(
        pool: &PgPool,
        config_id: Uuid,
        success: bool,
        next_execution_at: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE scheduler_configs
            SET last_executed_at = NOW(),
                next_execution_at = $3,
                execution_count = execution_count + 1,
                failure_count = failure_count + CASE WHEN $2 THEN 0 ELSE 1 END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(config_id)
        .bind(success)
        .bind(next_execution_at)
        .execute(pool)
        .await?;

        Ok(())
    }
}

/// 스케줄 실행 이력 저장소 (append-only).
pub struct ScheduleExecutionRepository;

impl ScheduleExecutionRepository {
    /// 실행 이력 row 생성 (상태 running).
    pub async fn insert(
        pool: &PgPool,
        config_id: Uuid,
        trigger_source: TriggerSource,
    ) -> Result<ScheduleExecutionRow, sqlx::Error> {
        sqlx::query_as::<_, ScheduleExecutionRow>(
            r#"
            INSERT INTO schedule_executions (id, config_id, status, trigger_source)
            VALUES ($1, $2, 'running', $3)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(config_id)
        .bind(trigger_source.as_str())
        .fetch_one(pool)
        .await
    }

    /// 실행 이력 종결.
    pub async fn complete(
        pool: &PgPool,
        execution_id: Uuid,
        status: ExecutionStatus,
        external_execution_id: Option<String>,
        error_message: Option<String>,
        duration_ms: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE schedule_executions
            SET status = $2,
                external_execution_id = $3,
                error_message = $4,
                duration_ms = $5
            WHERE id = $1
            "#,
        )
        .bind(execution_id)
        .bind(status.as_str())
        .bind(external_execution_id)
        .bind(error_message)
        .bind(duration_ms)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// 건너뛴 실행 기록.
    pub async fn record_skipped(
        pool: &PgPool,
        config_id: Uuid,
        trigger_source: TriggerSource,
        reason: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO schedule_executions (id, config_id, status, trigger_source, error_message)
            VALUES ($1, $2, 'skipped', $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(config_id)
        .bind(trigger_source.as_str())
        .bind(reason)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// 최근 실행 이력.
    pub async fn recent(
        pool: &PgPool,
        config_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ScheduleExecutionRow>, sqlx::Error> {
        sqlx::query_as::<_, ScheduleExecutionRow>(
            "SELECT * FROM schedule_executions
             WHERE config_id = $1
             ORDER BY executed_at DESC
             LIMIT $2",
        )
        .bind(config_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// 외부 실행 id로 조회.
    pub async fn find_by_external_id(
        pool: &PgPool,
        external_execution_id: &str,
    ) -> Result<Option<ScheduleExecutionRow>, sqlx::Error> {
        sqlx::query_as::<_, ScheduleExecutionRow>(
            "SELECT * FROM schedule_executions
             WHERE external_execution_id = $1
             ORDER BY executed_at DESC
             LIMIT 1",
        )
        .bind(external_execution_id)
        .fetch_optional(pool)
        .await
    }
}
