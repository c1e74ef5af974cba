//! 통합 API 에러 응답 타입.
//!
//! 모든 API 엔드포인트에서 일관된 에러 형식을 제공합니다. 도메인 에러
//! (`NavError`)의 분류가 HTTP 상태 코드로 그대로 사상됩니다:
//!
//! | 분류 | 상태 코드 |
//! |------|-----------|
//! | Validation | 400 |
//! | NotFound | 404 |
//! | Conflict | 409 |
//! | DataQuality | 422 |
//! | ExternalFetch | 502 |
//! | 그 외 | 500 |

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use nav_core::NavError;

/// 통합 API 에러 응답.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiErrorResponse {
    /// 에러 코드 (예: "VALIDATION_ERROR", "CONFLICT", "NOT_FOUND")
    pub code: String,
    /// 사람이 읽을 수 있는 에러 메시지
    pub message: String,
    /// 추가 에러 상세 정보 (선택적)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// 에러 발생 타임스탬프 (Unix timestamp)
    pub timestamp: i64,
}

impl ApiErrorResponse {
    /// 기본 에러 생성.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// 핸들러용 에러 래퍼.
///
/// `NavError`에서 변환되므로 핸들러는 `?`로 도메인 에러를 바로
/// 전파할 수 있습니다.
#[derive(Debug)]
pub struct ApiError(pub NavError);

impl From<NavError> for ApiError {
    fn from(err: NavError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            NavError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            NavError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            NavError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            NavError::DataQuality(_) => (StatusCode::UNPROCESSABLE_ENTITY, "DATA_QUALITY_ERROR"),
            NavError::ExternalFetch(_) => (StatusCode::BAD_GATEWAY, "EXTERNAL_FETCH_ERROR"),
            NavError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "PERSISTENCE_ERROR"),
            NavError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            NavError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            tracing::error!(code = code, error = %self.0, "API 요청 처리 실패");
        } else {
            tracing::debug!(code = code, error = %self.0, "API 요청 거부");
        }

        (status, Json(ApiErrorResponse::new(code, self.0.to_string()))).into_response()
    }
}

/// 핸들러 Result 타입.
pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (NavError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (NavError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (NavError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                NavError::DataQuality("x".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                NavError::Persistence("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let (status, _) = ApiError(err).status_and_code();
            assert_eq!(status, expected);
        }
    }
}
