//! 환경변수 기반 설정 모듈.

use std::time::Duration;

use crate::error::{NavError, NavResult};

/// 애플리케이션 전체 설정.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// 데이터베이스 URL
    pub database_url: String,
    /// API 서버 설정
    pub server: ServerConfig,
    /// 외부 데이터 조회 설정
    pub fetch: FetchConfig,
    /// 다운로드 오케스트레이터 설정
    pub orchestrator: OrchestratorConfig,
    /// 스케줄러 설정
    pub scheduler: SchedulerSettings,
}

/// API 서버 설정.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 바인딩할 호스트 주소
    pub host: String,
    /// 바인딩할 포트
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// 외부 데이터 조회 설정.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// 일일 전체 스냅샷 URL
    pub daily_url: String,
    /// 기간 조회 URL (fund-group/from/to/type 파라미터)
    pub historical_url: String,
    /// 요청 타임아웃 (초)
    pub request_timeout_secs: u64,
    /// 최대 시도 횟수
    pub max_attempts: u32,
    /// 재시도 기본 대기 (밀리초, 시도마다 2배씩 증가)
    pub retry_base_delay_ms: u64,
    /// 전역 최소 요청 간격 (밀리초)
    pub min_request_interval_ms: u64,
    /// 일일 조회 결과 캐시 TTL (초)
    pub daily_cache_ttl_secs: u64,
    /// 기간 조회 결과 캐시 TTL (초)
    pub historical_cache_ttl_secs: u64,
    /// 외부 소스의 최대 조회 범위 (일)
    pub max_span_days: i64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            daily_url: "https://www.amfiindia.com/spages/NAVAll.txt".to_string(),
            historical_url: "https://portal.amfiindia.com/DownloadNAVHistoryReport_Po.aspx"
                .to_string(),
            request_timeout_secs: 30,
            max_attempts: 3,
            retry_base_delay_ms: 1000,
            min_request_interval_ms: 1000,
            daily_cache_ttl_secs: 60,
            historical_cache_ttl_secs: 300,
            max_span_days: 90,
        }
    }
}

impl FetchConfig {
    /// 요청 타임아웃을 Duration으로 반환.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// 재시도 기본 대기를 Duration으로 반환.
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// 전역 최소 요청 간격을 Duration으로 반환.
    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }
}

/// 다운로드 오케스트레이터 설정.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// 청크 최대 일수 (외부 소스 제약과 동일)
    pub max_chunk_days: i64,
    /// 종결된 진행 상태를 메모리에서 제거하기까지의 지연 (초)
    pub progress_cleanup_delay_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_chunk_days: 90,
            progress_cleanup_delay_secs: 300,
        }
    }
}

impl OrchestratorConfig {
    /// 진행 상태 정리 지연을 Duration으로 반환.
    pub fn progress_cleanup_delay(&self) -> Duration {
        Duration::from_secs(self.progress_cleanup_delay_secs)
    }
}

/// 스케줄러 설정.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// 외부 워크플로우가 콜백할 이 서버의 기본 URL
    pub callback_base_url: String,
    /// 설정에 타임존이 없을 때 사용하는 기본 IANA 타임존
    pub default_timezone: String,
    /// 워크플로우 webhook 요청 타임아웃 (초)
    pub webhook_timeout_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            callback_base_url: "http://127.0.0.1:3000".to_string(),
            default_timezone: "Asia/Seoul".to_string(),
            webhook_timeout_secs: 30,
        }
    }
}

impl SchedulerSettings {
    /// webhook 타임아웃을 Duration으로 반환.
    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }
}

impl AppConfig {
    /// 환경변수에서 설정 로드.
    pub fn from_env() -> NavResult<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL").map_err(|_| {
            NavError::Config("DATABASE_URL 환경변수가 설정되지 않았습니다".to_string())
        })?;

        let fetch_defaults = FetchConfig::default();
        let scheduler_defaults = SchedulerSettings::default();

        Ok(Self {
            database_url,
            server: ServerConfig {
                host: std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: env_var_parse("API_PORT", 3000),
            },
            fetch: FetchConfig {
                daily_url: std::env::var("NAV_DAILY_URL")
                    .unwrap_or(fetch_defaults.daily_url),
                historical_url: std::env::var("NAV_HISTORICAL_URL")
                    .unwrap_or(fetch_defaults.historical_url),
                request_timeout_secs: env_var_parse("FETCH_TIMEOUT_SECS", 30),
                max_attempts: env_var_parse("FETCH_MAX_ATTEMPTS", 3),
                retry_base_delay_ms: env_var_parse("FETCH_RETRY_BASE_DELAY_MS", 1000),
                min_request_interval_ms: env_var_parse("FETCH_MIN_INTERVAL_MS", 1000),
                daily_cache_ttl_secs: env_var_parse("FETCH_DAILY_CACHE_TTL_SECS", 60),
                historical_cache_ttl_secs: env_var_parse("FETCH_HISTORICAL_CACHE_TTL_SECS", 300),
                max_span_days: env_var_parse("FETCH_MAX_SPAN_DAYS", 90),
            },
            orchestrator: OrchestratorConfig {
                max_chunk_days: env_var_parse("DOWNLOAD_MAX_CHUNK_DAYS", 90),
                progress_cleanup_delay_secs: env_var_parse("PROGRESS_CLEANUP_DELAY_SECS", 300),
            },
            scheduler: SchedulerSettings {
                callback_base_url: std::env::var("SCHEDULER_CALLBACK_BASE_URL")
                    .unwrap_or(scheduler_defaults.callback_base_url),
                default_timezone: std::env::var("SCHEDULER_DEFAULT_TIMEZONE")
                    .unwrap_or(scheduler_defaults.default_timezone),
                webhook_timeout_secs: env_var_parse("SCHEDULER_WEBHOOK_TIMEOUT_SECS", 30),
            },
        })
    }
}

/// 환경변수에서 값을 파싱 (실패 시 기본값 사용)
fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
