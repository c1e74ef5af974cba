//! 스케줄러 API 라우트
//!
//! 테넌트별 반복 다운로드 스케줄 관리 API를 제공합니다.
//!
//! # 엔드포인트
//!
//! - `PUT /api/v1/scheduler/config` - 설정 저장 (identity당 하나)
//! - `GET /api/v1/scheduler/config` - 설정 조회
//! - `DELETE /api/v1/scheduler/config` - 설정 삭제 (타이머 중지 포함)
//! - `GET /api/v1/scheduler/status` - 상태 조회 (설정 + 최근 이력)
//! - `POST /api/v1/scheduler/trigger` - 수동 트리거

use axum::{
    extract::{Query, State},
    routing::{get, post, put},
    Json, Router,
};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use nav_core::{Environment, NavError, ScheduleExecution, ScheduleType, SchedulerConfig};
use nav_scheduler::{SaveConfigInput, SchedulerStatus};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ================================================================================================
// Request/Response Types
// ================================================================================================

/// 설정 저장 요청.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SaveConfigRequest {
    /// 테넌트 id
    pub tenant_id: Uuid,
    /// 사용자 id
    pub user_id: Uuid,
    /// 실행 환경 (기본 live)
    #[serde(default)]
    pub environment: Environment,
    /// 스케줄 유형
    pub schedule_type: ScheduleType,
    /// custom 유형의 cron 표현식 (5필드 또는 초 포함 6/7필드)
    pub cron_expression: Option<String>,
    /// daily/weekly 유형의 선호 실행 시각 (HH:MM)
    pub preferred_time: Option<NaiveTime>,
    /// IANA 타임존
    pub timezone: Option<String>,
    /// 테넌트별 워크플로우 webhook URL
    pub webhook_url: Option<String>,
    /// 활성화 여부 (기본 true)
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// identity 지정 쿼리.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfigIdentityQuery {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub environment: Environment,
}

/// 삭제 응답.
#[derive(Debug, Serialize)]
pub struct DeleteConfigResponse {
    pub deleted: bool,
}

// ================================================================================================
// Handlers
// ================================================================================================

/// PUT /api/v1/scheduler/config - 설정 저장
async fn save_config(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SaveConfigRequest>,
) -> ApiResult<SchedulerConfig> {
    let config = state
        .scheduler
        .save_config(SaveConfigInput {
            tenant_id: request.tenant_id,
            user_id: request.user_id,
            environment: request.environment,
            schedule_type: request.schedule_type,
            cron_expression: request.cron_expression,
            preferred_time: request.preferred_time,
            timezone: request.timezone,
            webhook_url: request.webhook_url,
            enabled: request.enabled,
        })
        .await?;

    Ok(Json(config))
}

/// GET /api/v1/scheduler/config - 설정 조회
async fn get_config(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConfigIdentityQuery>,
) -> ApiResult<SchedulerConfig> {
    let config = state
        .scheduler
        .get_config(query.tenant_id, query.user_id, query.environment)
        .await?
        .ok_or_else(|| {
            ApiError(NavError::NotFound(
                "스케줄 설정이 존재하지 않습니다".to_string(),
            ))
        })?;

    Ok(Json(config))
}

/// DELETE /api/v1/scheduler/config - 설정 삭제
async fn delete_config(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConfigIdentityQuery>,
) -> ApiResult<DeleteConfigResponse> {
    let deleted = state
        .scheduler
        .delete_config(query.tenant_id, query.user_id, query.environment)
        .await?;

    Ok(Json(DeleteConfigResponse { deleted }))
}

/// GET /api/v1/scheduler/status - 상태 조회
async fn get_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConfigIdentityQuery>,
) -> ApiResult<SchedulerStatus> {
    let status = state
        .scheduler
        .get_status(query.tenant_id, query.user_id, query.environment)
        .await?;

    Ok(Json(status))
}

/// POST /api/v1/scheduler/trigger - 수동 트리거
async fn manual_trigger(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ConfigIdentityQuery>,
) -> ApiResult<ScheduleExecution> {
    let execution = state
        .scheduler
        .manual_trigger(request.tenant_id, request.user_id, request.environment)
        .await?;

    Ok(Json(execution))
}

// ================================================================================================
// Router
// ================================================================================================

/// 스케줄러 라우터 구성.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/config",
            put(save_config).get(get_config).delete(delete_config),
        )
        .route("/status", get(get_status))
        .route("/trigger", post(manual_trigger))
}
