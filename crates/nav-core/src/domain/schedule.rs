//! 스케줄러 설정 및 실행 이력 타입.

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::nav::Environment;
use crate::error::NavResult;

/// 스케줄 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "utoipa-support", derive(utoipa::ToSchema))]
pub enum ScheduleType {
    /// 매일 (선호 시각 기반)
    Daily,
    /// 매주 (선호 시각 기반, 월요일)
    Weekly,
    /// 사용자 지정 cron 표현식
    Custom,
}

impl ScheduleType {
    /// 문자열로 변환.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Custom => "custom",
        }
    }
}

impl std::str::FromStr for ScheduleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "custom" => Ok(Self::Custom),
            _ => Err(format!("알 수 없는 스케줄 유형: {}", s)),
        }
    }
}

/// 실행 트리거 출처.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "utoipa-support", derive(utoipa::ToSchema))]
pub enum TriggerSource {
    /// cron 타이머에 의한 실행
    Scheduled,
    /// 사용자 수동 실행
    Manual,
}

impl TriggerSource {
    /// 문자열로 변환.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }
}

/// 스케줄 실행 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "utoipa-support", derive(utoipa::ToSchema))]
pub enum ExecutionStatus {
    /// 실행 중
    Running,
    /// 성공
    Success,
    /// 실패
    Failed,
    /// 건너뜀 (비활성화/삭제된 설정)
    Skipped,
}

impl ExecutionStatus {
    /// 문자열로 변환.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("알 수 없는 실행 상태: {}", s)),
        }
    }
}

/// 스케줄러 설정.
///
/// (테넌트, 사용자, 환경)당 하나만 존재합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 설정 id
    pub id: Uuid,
    /// 테넌트 id
    pub tenant_id: Uuid,
    /// 사용자 id
    pub user_id: Uuid,
    /// 실행 환경
    pub environment: Environment,
    /// 스케줄 유형
    pub schedule_type: ScheduleType,
    /// cron 표현식 (저장 시점에 검증 완료)
    pub cron_expression: String,
    /// 선호 실행 시각 (daily/weekly 유형에서 cron 생성에 사용)
    pub preferred_time: Option<NaiveTime>,
    /// IANA 타임존 (cron 계산 기준)
    pub timezone: String,
    /// 테넌트별 외부 워크플로우 webhook URL
    pub webhook_url: Option<String>,
    /// 활성화 여부
    pub enabled: bool,
    /// 다음 실행 예정 시각
    pub next_execution_at: Option<DateTime<Utc>>,
    /// 마지막 실행 시각
    pub last_executed_at: Option<DateTime<Utc>>,
    /// 누적 실행 횟수
    pub execution_count: i64,
    /// 누적 실패 횟수
    pub failure_count: i64,
    /// 생성 시각
    pub created_at: DateTime<Utc>,
    /// 갱신 시각
    pub updated_at: DateTime<Utc>,
}

impl SchedulerConfig {
    /// 타이머 identity 키 (테넌트, 환경, 사용자).
    pub fn timer_key(&self) -> (Uuid, Environment, Uuid) {
        (self.tenant_id, self.environment, self.user_id)
    }
}

/// 스케줄러 설정 저장 입력.
///
/// cron 표현식은 서비스 계층에서 검증/생성을 마친 최종 값입니다.
#[derive(Debug, Clone)]
pub struct NewSchedulerConfig {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub environment: Environment,
    pub schedule_type: ScheduleType,
    pub cron_expression: String,
    pub preferred_time: Option<NaiveTime>,
    pub timezone: String,
    pub webhook_url: Option<String>,
    pub enabled: bool,
    pub next_execution_at: Option<DateTime<Utc>>,
}

/// 스케줄 실행 이력 (append-only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleExecution {
    /// 실행 id
    pub id: Uuid,
    /// 설정 id
    pub config_id: Uuid,
    /// 실행 시각
    pub executed_at: DateTime<Utc>,
    /// 실행 상태
    pub status: ExecutionStatus,
    /// 트리거 출처
    pub trigger_source: TriggerSource,
    /// 외부 워크플로우 실행 id
    pub external_execution_id: Option<String>,
    /// 오류 메시지
    pub error_message: Option<String>,
    /// 소요 시간 (밀리초)
    pub duration_ms: Option<i64>,
}

/// 스케줄러 저장소 trait.
///
/// 설정 CRUD와 실행 이력을 영속화합니다. 운영 구현은 nav-data의
/// PostgreSQL 저장소입니다.
#[async_trait]
pub trait SchedulerStore: Send + Sync {
    /// 설정 저장 (같은 identity가 있으면 갱신).
    async fn upsert_config(&self, new_config: NewSchedulerConfig) -> NavResult<SchedulerConfig>;

    /// identity로 설정 조회.
    async fn get_config(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        environment: Environment,
    ) -> NavResult<Option<SchedulerConfig>>;

    /// id로 설정 조회.
    async fn get_config_by_id(&self, config_id: Uuid) -> NavResult<Option<SchedulerConfig>>;

    /// 설정 삭제. 삭제되면 true.
    async fn delete_config(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        environment: Environment,
    ) -> NavResult<bool>;

    /// 활성화된 모든 설정 (프로세스 시작 시 타이머 복원용).
    async fn list_enabled_configs(&self) -> NavResult<Vec<SchedulerConfig>>;

    /// 실행 이력 row 생성 (상태 running).
    async fn insert_execution(
        &self,
        config_id: Uuid,
        trigger_source: TriggerSource,
    ) -> NavResult<ScheduleExecution>;

    /// 실행 이력 종결.
    async fn complete_execution(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        external_execution_id: Option<String>,
        error_message: Option<String>,
        duration_ms: i64,
    ) -> NavResult<()>;

    /// 건너뛴 실행 기록 (비활성화/삭제된 설정에 대한 fire).
    async fn record_skipped(
        &self,
        config_id: Uuid,
        trigger_source: TriggerSource,
        reason: &str,
    ) -> NavResult<()>;

    /// 실행 결과 반영: 카운터 증가, 마지막/다음 실행 시각 갱신.
    ///
    /// 실패한 실행도 스케줄을 비활성화하지 않습니다. failure_count만 증가합니다.
    async fn record_fire_result(
        &self,
        config_id: Uuid,
        success: bool,
        next_execution_at: Option<DateTime<Utc>>,
    ) -> NavResult<()>;

    /// 최근 실행 이력 조회.
    async fn recent_executions(
        &self,
        config_id: Uuid,
        limit: i64,
    ) -> NavResult<Vec<ScheduleExecution>>;

    /// 외부 실행 id로 이력 조회 (deprecated callback 경로에서 사용).
    async fn find_execution_by_external_id(
        &self,
        external_execution_id: &str,
    ) -> NavResult<Option<ScheduleExecution>>;
}
