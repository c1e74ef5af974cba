//! 모든 핸들러에서 공유되는 애플리케이션 상태.
//!
//! AppState는 모든 API 핸들러에서 공유되는 상태를 관리합니다.
//! Arc로 래핑되어 여러 요청 간에 안전하게 공유됩니다.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use nav_core::SchedulerStore;
use nav_orchestrator::DownloadService;
use nav_scheduler::SchedulerService;

/// 애플리케이션 공유 상태.
///
/// Axum의 State extractor를 통해 핸들러에 주입됩니다.
#[derive(Clone)]
pub struct AppState {
    /// 다운로드 오케스트레이션 서비스 - 트리거, 취소, 진행 조회
    pub downloads: Arc<DownloadService>,

    /// 스케줄러 서비스 - 설정 CRUD, 타이머, 수동 트리거
    pub scheduler: SchedulerService,

    /// 스케줄러 저장소 (deprecated 콜백 경로에서 실행 이력 조회에 사용)
    pub scheduler_store: Arc<dyn SchedulerStore>,

    /// 데이터베이스 연결 풀
    pub db_pool: sqlx::PgPool,

    /// 서버 시작 시간 (업타임 계산용)
    pub started_at: DateTime<Utc>,

    /// API 버전
    pub version: String,
}

impl AppState {
    /// 새로운 AppState 생성.
    pub fn new(
        downloads: Arc<DownloadService>,
        scheduler: SchedulerService,
        scheduler_store: Arc<dyn SchedulerStore>,
        db_pool: sqlx::PgPool,
    ) -> Self {
        Self {
            downloads,
            scheduler,
            scheduler_store,
            db_pool,
            started_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
