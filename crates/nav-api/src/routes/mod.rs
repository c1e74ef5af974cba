//! API 라우트 모듈.

pub mod callback;
pub mod downloads;
pub mod health;
pub mod scheduler;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// `/api/v1` 아래의 전체 API 라우터를 구성합니다.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/downloads", downloads::router())
        .nest("/scheduler", scheduler::router())
}
