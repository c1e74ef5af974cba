//! NAV 다운로드 시스템의 에러 타입.
//!
//! 이 모듈은 시스템 전반에서 사용되는 에러 분류 체계를 정의합니다.
//! 트리거 호출에서 동기적으로 반환되는 에러(Validation, Conflict)와
//! 비동기 실행 경로에서 작업을 실패 상태로 종결시키는 에러를 구분합니다.

use thiserror::Error;

use crate::domain::fetch::FetchFailure;

/// 핵심 NAV 에러.
#[derive(Debug, Error)]
pub enum NavError {
    /// 검증 에러 (잘못된 날짜 범위, 90일 초과, 미래 종료일 등)
    #[error("검증 에러: {0}")]
    Validation(String),

    /// 충돌 에러 (락 점유 중, 이미 백필 완료된 스킴 등)
    #[error("충돌 에러: {0}")]
    Conflict(String),

    /// 찾을 수 없음 (알 수 없는 작업/설정)
    #[error("찾을 수 없음: {0}")]
    NotFound(String),

    /// 외부 데이터 조회 실패 (네트워크, 타임아웃, 빈/비정상 응답)
    #[error("외부 조회 에러: {0}")]
    ExternalFetch(#[from] FetchFailure),

    /// 데이터 품질 에러 (유효하지 않은 파싱 행 10% 초과)
    #[error("데이터 품질 에러: {0}")]
    DataQuality(String),

    /// 저장소 에러
    #[error("저장소 에러: {0}")]
    Persistence(String),

    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(String),

    /// 내부 에러
    #[error("내부 에러: {0}")]
    Internal(String),
}

/// NAV 작업을 위한 Result 타입.
pub type NavResult<T> = Result<T, NavError>;

impl NavError {
    /// 트리거 호출자에게 동기적으로 반환되는 에러인지 확인합니다.
    ///
    /// 나머지 에러는 백그라운드 실행 경계에서 잡혀 작업을 failed로 종결시킵니다.
    pub fn is_synchronous(&self) -> bool {
        matches!(
            self,
            NavError::Validation(_) | NavError::Conflict(_) | NavError::NotFound(_)
        )
    }

    /// 재시도 가능한 에러인지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        match self {
            NavError::ExternalFetch(failure) => failure.kind.is_retryable(),
            NavError::Persistence(_) => true,
            _ => false,
        }
    }
}

#[cfg(feature = "sqlx-support")]
impl From<sqlx::Error> for NavError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => NavError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().unwrap_or_default();
                if code == "23505" {
                    // PostgreSQL 고유 제약 조건 위반
                    NavError::Conflict(db_err.message().to_string())
                } else {
                    NavError::Persistence(db_err.message().to_string())
                }
            }
            _ => NavError::Persistence(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for NavError {
    fn from(err: serde_json::Error) -> Self {
        NavError::Internal(format!("직렬화 실패: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fetch::{FetchErrorKind, FetchFailure};

    #[test]
    fn test_synchronous_errors() {
        assert!(NavError::Validation("bad range".to_string()).is_synchronous());
        assert!(NavError::Conflict("lock held".to_string()).is_synchronous());
        assert!(!NavError::Persistence("db down".to_string()).is_synchronous());
    }

    #[test]
    fn test_retryable_errors() {
        let timeout = NavError::ExternalFetch(FetchFailure::new(
            FetchErrorKind::Timeout,
            "amfi",
            "요청 타임아웃",
        ));
        assert!(timeout.is_retryable());

        let quality = NavError::DataQuality("12% invalid".to_string());
        assert!(!quality.is_retryable());
    }
}
