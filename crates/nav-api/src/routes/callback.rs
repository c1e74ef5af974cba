//! (deprecated) 외부 워크플로우 인바운드 콜백.
//!
//! 외부 자동화 시스템이 처리 결과를 되돌려주는 경로입니다. 진행 관측의
//! 단일 소스는 폴링 표면이므로 이 콜백은 best-effort로만 처리합니다:
//! 이력 row가 매칭되면 상태를 갱신하고, 아니면 로그만 남깁니다.
//! 어떤 경우에도 수신은 성공으로 응답합니다.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use nav_core::{ExecutionStatus, SchedulerStore};

use crate::state::AppState;

/// 콜백 요청 본문.
#[derive(Debug, Deserialize)]
pub struct WorkflowCallbackRequest {
    /// 관련 작업 id (선택적)
    pub job_id: Option<Uuid>,
    /// 외부 실행 id
    pub execution_id: String,
    /// 외부 시스템이 보고한 상태
    pub status: String,
    /// 결과 본문 (선택적)
    pub result: Option<Value>,
    /// 오류 메시지 (선택적)
    pub error: Option<String>,
}

/// 콜백 응답.
#[derive(Debug, Serialize)]
pub struct WorkflowCallbackResponse {
    pub received: bool,
}

/// POST /api/v1/downloads/callback
pub async fn workflow_callback(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WorkflowCallbackRequest>,
) -> Json<WorkflowCallbackResponse> {
    tracing::info!(
        execution_id = %request.execution_id,
        job_id = ?request.job_id,
        status = %request.status,
        error = ?request.error,
        "워크플로우 콜백 수신 (deprecated 경로)"
    );

    // best-effort: 이력이 매칭될 때만 상태를 덧붙인다
    match state
        .scheduler_store
        .find_execution_by_external_id(&request.execution_id)
        .await
    {
        Ok(Some(execution)) if execution.status == ExecutionStatus::Running => {
            let status = match request.status.as_str() {
                "completed" | "success" => ExecutionStatus::Success,
                _ => ExecutionStatus::Failed,
            };
            if let Err(e) = state
                .scheduler_store
                .complete_execution(
                    execution.id,
                    status,
                    Some(request.execution_id.clone()),
                    request.error.clone(),
                    execution.duration_ms.unwrap_or(0),
                )
                .await
            {
                tracing::warn!(execution_id = %request.execution_id, error = %e,
                    "콜백 이력 갱신 실패 (무시)");
            }
        }
        Ok(_) => {
            tracing::debug!(execution_id = %request.execution_id,
                "매칭되는 실행 이력 없음, 콜백 무시");
        }
        Err(e) => {
            tracing::warn!(execution_id = %request.execution_id, error = %e,
                "콜백 이력 조회 실패 (무시)");
        }
    }

    Json(WorkflowCallbackResponse { received: true })
}
