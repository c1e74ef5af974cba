//! NAV 다운로드 시스템 API 서버.
//!
//! Axum 기반 REST API 서버를 시작합니다. 다운로드 트리거, 진행 상태
//! 폴링, 스케줄러 설정 관리 엔드포인트를 제공하며, 시작 시 활성화된
//! 스케줄 타이머를 복원하고 종료 시 전부 내립니다.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use nav_api::openapi::openapi_json;
use nav_api::routes::{create_api_router, health::health_check};
use nav_api::state::AppState;
use nav_core::{init_logging_from_env, AppConfig};
use nav_data::{AmfiClient, PgJobStore, PgSchedulerStore};
use nav_orchestrator::{DownloadLockTable, DownloadService, ProgressTracker};
use nav_scheduler::{HttpWorkflowClient, SchedulerService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging_from_env()?;

    let config = AppConfig::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    // DB 연결
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await?;
    info!("데이터베이스 연결 성공");

    // 저장소 및 외부 클라이언트
    let job_store = Arc::new(PgJobStore::new(pool.clone()));
    let scheduler_store = Arc::new(PgSchedulerStore::new(pool.clone()));
    let provider = Arc::new(AmfiClient::new(config.fetch.clone()));
    let workflow = Arc::new(HttpWorkflowClient::new(config.scheduler.webhook_timeout()));

    // 오케스트레이터: 락 테이블과 진행 추적기는 여기서 소유권이 결정된다
    let locks = Arc::new(DownloadLockTable::new());
    let progress = Arc::new(ProgressTracker::new(
        config.orchestrator.progress_cleanup_delay(),
    ));
    let downloads = Arc::new(DownloadService::new(
        job_store,
        provider,
        locks,
        progress,
        config.orchestrator.clone(),
    ));

    // 스케줄러: 활성화된 설정의 타이머 복원
    let scheduler = SchedulerService::new(
        scheduler_store.clone(),
        workflow,
        config.scheduler.clone(),
    );
    match scheduler.initialize_all().await {
        Ok(activated) => info!(activated = activated, "스케줄 타이머 복원 완료"),
        Err(e) => warn!(error = %e, "스케줄 타이머 복원 실패, 서버는 계속 시작"),
    }

    let state = Arc::new(AppState::new(
        downloads,
        scheduler.clone(),
        scheduler_store,
        pool,
    ));

    // CORS 설정 (개발 환경 기본값)
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/openapi.json", get(openapi_json))
        .nest("/api/v1", create_api_router())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(60)))
        .layer(cors)
        .with_state(state);

    info!(addr = %addr, "API 서버 시작");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 종료: 모든 스케줄 타이머 중지 (중복 호출 안전)
    scheduler.shutdown_all();
    info!("API 서버 종료");

    Ok(())
}

/// ctrl-c 수신 시 graceful shutdown을 시작합니다.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "종료 신호 수신 실패");
    }
    info!("종료 신호 수신, 서버 정리 중");
}
