//! OpenAPI 스키마 정의.
//!
//! 주요 요청/도메인 타입의 컴포넌트 스키마를 모아 `/api/v1/openapi.json`
//! 으로 노출합니다.

use utoipa::OpenApi;

/// API 문서 정의.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "NavSync API",
        description = "펀드 NAV 다운로드 오케스트레이션 및 스케줄링 API"
    ),
    components(schemas(
        crate::error::ApiErrorResponse,
        crate::routes::downloads::TriggerSnapshotRequest,
        crate::routes::downloads::TriggerHistoricalRequest,
        crate::routes::downloads::ListJobsQuery,
        crate::routes::scheduler::SaveConfigRequest,
        crate::routes::scheduler::ConfigIdentityQuery,
        crate::routes::health::HealthResponse,
        nav_core::DownloadJob,
        nav_core::JobStatus,
        nav_core::JobType,
        nav_core::Environment,
        nav_core::ResultSummary,
        nav_core::ScheduleType,
        nav_core::ExecutionStatus,
    ))
)]
pub struct ApiDoc;

/// OpenAPI JSON 핸들러.
pub async fn openapi_json() -> axum::Json<utoipa::openapi::OpenApi> {
    axum::Json(ApiDoc::openapi())
}
