//! 다운로드 API 라우트
//!
//! 다운로드 트리거와 진행 상태 폴링 API를 제공합니다.
//!
//! # 엔드포인트
//!
//! - `POST /api/v1/downloads/daily` - 일일 다운로드 트리거
//! - `POST /api/v1/downloads/weekly` - 주간 다운로드 트리거
//! - `POST /api/v1/downloads/historical` - 기간 백필 트리거 (90일 초과 시 청크 분할)
//! - `POST /api/v1/downloads/{id}/cancel` - 다운로드 취소
//! - `GET /api/v1/downloads/{id}` - 작업 조회
//! - `GET /api/v1/downloads/{id}/progress` - 진행 스냅샷 조회
//! - `GET /api/v1/downloads/{id}/chunks` - 청크 단위 진행 조회
//! - `GET /api/v1/downloads/active` - 실행 중인 다운로드 목록
//! - `GET /api/v1/downloads` - 작업 목록 조회
//! - `POST /api/v1/downloads/callback` - (deprecated) 외부 워크플로우 콜백

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use nav_core::{DownloadJob, Environment, JobFilter, JobStatus, JobType, NavError};
use nav_orchestrator::{DateChunk, ProgressSnapshot, SequentialProgress, TriggerOutcome};

use crate::error::{ApiError, ApiResult};
use crate::routes::callback;
use crate::state::AppState;

// ================================================================================================
// Request/Response Types
// ================================================================================================

/// 일일/주간 다운로드 트리거 요청.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TriggerSnapshotRequest {
    /// 테넌트 id (인증 계층에서 결정된 값)
    pub tenant_id: Uuid,
    /// 트리거한 사용자
    pub user_id: Option<Uuid>,
    /// 실행 환경 (기본 live)
    #[serde(default)]
    pub environment: Environment,
}

/// 기간 백필 트리거 요청.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TriggerHistoricalRequest {
    /// 테넌트 id
    pub tenant_id: Uuid,
    /// 트리거한 사용자
    pub user_id: Option<Uuid>,
    /// 실행 환경 (기본 live)
    #[serde(default)]
    pub environment: Environment,
    /// 대상 스킴 코드
    pub scheme_codes: Vec<String>,
    /// 조회 시작일
    pub start_date: NaiveDate,
    /// 조회 종료일
    pub end_date: NaiveDate,
}

/// 트리거 응답.
#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    /// 작업 id (이미 실행 중이면 기존 작업의 id)
    pub job_id: Uuid,
    /// 같은 범위의 작업이 이미 실행 중인지 여부
    pub already_in_progress: bool,
    /// 청크 분할 계획 (분할된 백필에서만)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_plan: Option<Vec<DateChunk>>,
}

impl From<TriggerOutcome> for TriggerResponse {
    fn from(outcome: TriggerOutcome) -> Self {
        Self {
            job_id: outcome.job_id,
            already_in_progress: outcome.already_in_progress,
            chunk_plan: outcome.chunk_plan,
        }
    }
}

/// 실행 중 다운로드 목록 응답.
#[derive(Debug, Serialize)]
pub struct ActiveDownloadsResponse {
    /// 진행 스냅샷 목록
    pub downloads: Vec<ProgressSnapshot>,
    /// 총 개수
    pub total: usize,
}

/// 작업 목록 조회 쿼리.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ListJobsQuery {
    pub tenant_id: Option<Uuid>,
    pub environment: Option<Environment>,
    pub job_type: Option<JobType>,
    pub status: Option<JobStatus>,
    pub parent_job_id: Option<Uuid>,
    pub limit: Option<i64>,
}

/// 작업 목록 응답.
#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<DownloadJob>,
    pub total: usize,
}

// ================================================================================================
// Handlers
// ================================================================================================

/// POST /api/v1/downloads/daily - 일일 다운로드 트리거
async fn trigger_daily(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TriggerSnapshotRequest>,
) -> ApiResult<TriggerResponse> {
    let outcome = state
        .downloads
        .trigger_daily(request.tenant_id, request.user_id, request.environment)
        .await?;

    Ok(Json(outcome.into()))
}

/// POST /api/v1/downloads/weekly - 주간 다운로드 트리거
async fn trigger_weekly(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TriggerSnapshotRequest>,
) -> ApiResult<TriggerResponse> {
    let outcome = state
        .downloads
        .trigger_weekly(request.tenant_id, request.environment)
        .await?;

    Ok(Json(outcome.into()))
}

/// POST /api/v1/downloads/historical - 기간 백필 트리거
async fn trigger_historical(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TriggerHistoricalRequest>,
) -> ApiResult<TriggerResponse> {
    let outcome = state
        .downloads
        .trigger_historical(
            request.tenant_id,
            request.user_id,
            request.environment,
            request.scheme_codes,
            request.start_date,
            request.end_date,
        )
        .await?;

    Ok(Json(outcome.into()))
}

/// POST /api/v1/downloads/{id}/cancel - 다운로드 취소
async fn cancel_download(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<DownloadJob> {
    let job = state.downloads.cancel_download(job_id).await?;
    Ok(Json(job))
}

/// GET /api/v1/downloads/{id} - 작업 조회
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<DownloadJob> {
    let job = state
        .downloads
        .get_job(job_id)
        .await?
        .ok_or_else(|| ApiError(NavError::NotFound(format!("작업 없음: {}", job_id))))?;

    Ok(Json(job))
}

/// GET /api/v1/downloads/{id}/progress - 진행 스냅샷 조회
///
/// 트리거한 주체와 무관하게 누구나 조회할 수 있는 읽기 전용 표면입니다.
async fn get_progress(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<ProgressSnapshot> {
    let snapshot = state.downloads.get_progress(job_id).ok_or_else(|| {
        ApiError(NavError::NotFound(format!(
            "진행 정보 없음 (종결 후 정리되었거나 알 수 없는 작업): {}",
            job_id
        )))
    })?;

    Ok(Json(snapshot))
}

/// GET /api/v1/downloads/{id}/chunks - 청크 단위 진행 조회
async fn get_sequential_progress(
    State(state): State<Arc<AppState>>,
    Path(parent_job_id): Path<Uuid>,
) -> ApiResult<SequentialProgress> {
    let progress = state
        .downloads
        .get_sequential_progress(parent_job_id)
        .ok_or_else(|| {
            ApiError(NavError::NotFound(format!(
                "청크 진행 정보 없음: {}",
                parent_job_id
            )))
        })?;

    Ok(Json(progress))
}

/// GET /api/v1/downloads/active - 실행 중인 다운로드 목록
async fn get_active_downloads(
    State(state): State<Arc<AppState>>,
) -> ApiResult<ActiveDownloadsResponse> {
    let downloads = state.downloads.get_active_downloads();
    let total = downloads.len();

    Ok(Json(ActiveDownloadsResponse { downloads, total }))
}

/// GET /api/v1/downloads - 작업 목록 조회
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<JobListResponse> {
    let jobs = state
        .downloads
        .list_jobs(JobFilter {
            tenant_id: query.tenant_id,
            environment: query.environment,
            job_type: query.job_type,
            status: query.status,
            parent_job_id: query.parent_job_id,
            limit: query.limit,
        })
        .await?;
    let total = jobs.len();

    Ok(Json(JobListResponse { jobs, total }))
}

// ================================================================================================
// Router
// ================================================================================================

/// 다운로드 라우터 구성.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/daily", post(trigger_daily))
        .route("/weekly", post(trigger_weekly))
        .route("/historical", post(trigger_historical))
        .route("/active", get(get_active_downloads))
        .route("/callback", post(callback::workflow_callback))
        .route("/", get(list_jobs))
        .route("/{id}", get(get_job))
        .route("/{id}/cancel", post(cancel_download))
        .route("/{id}/progress", get(get_progress))
        .route("/{id}/chunks", get(get_sequential_progress))
}
