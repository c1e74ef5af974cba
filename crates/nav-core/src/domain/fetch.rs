//! 외부 데이터 제공자 추상화.
//!
//! 외부 NAV 공시 소스로부터 데이터를 조회하기 위한 소스 중립적인
//! 인터페이스를 제공합니다. 모든 실패는 타입이 있는 `FetchFailure` 값으로
//! 반환되며, 호출 프레임 밖으로 패닉이 전파되지 않습니다.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::nav::NavSnapshot;

/// 조회 실패 분류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// 네트워크/연결 오류
    Network,
    /// 요청 타임아웃 (네트워크 오류와 구분되는 별도 종류)
    Timeout,
    /// HTTP 상태 오류 (비 2xx)
    Http,
    /// 빈 응답
    EmptyResponse,
    /// 응답 본문 파싱 실패
    Parse,
    /// 데이터 품질 기준 미달 (유효하지 않은 행 10% 초과)
    DataQuality,
    /// 요청 자체가 유효하지 않음 (90일 초과 범위 등)
    Validation,
}

impl FetchErrorKind {
    /// 재시도 가능한 실패인지 확인합니다.
    ///
    /// 전송 계층 실패만 재시도 대상이며, 파싱/품질/검증 실패는
    /// 같은 입력으로 재시도해도 결과가 달라지지 않습니다.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::Http | Self::EmptyResponse
        )
    }
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Http => "http",
            Self::EmptyResponse => "empty_response",
            Self::Parse => "parse",
            Self::DataQuality => "data_quality",
            Self::Validation => "validation",
        };
        write!(f, "{}", s)
    }
}

/// 타입이 있는 조회 실패 값.
///
/// 소스, 요청 id, 소요 시간을 항상 함께 담아 반환합니다.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("[{source_name}/{kind}] {message} (request_id={request_id}, elapsed={elapsed_ms}ms)")]
pub struct FetchFailure {
    /// 실패 분류
    pub kind: FetchErrorKind,
    /// 데이터 소스 이름
    pub source_name: String,
    /// 요청 식별자
    pub request_id: Uuid,
    /// 실패까지 소요 시간 (밀리초)
    pub elapsed_ms: u64,
    /// 사람이 읽을 수 있는 메시지
    pub message: String,
}

impl FetchFailure {
    /// 새 실패 값을 생성합니다.
    pub fn new(kind: FetchErrorKind, source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            source_name: source_name.into(),
            request_id: Uuid::new_v4(),
            elapsed_ms: 0,
            message: message.into(),
        }
    }

    /// 요청 id 지정.
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }

    /// 소요 시간 지정.
    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }
}

/// 조회 옵션.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// idempotency 키.
    ///
    /// 같은 키의 요청이 진행 중이면 새 outbound 호출 없이 동일한 결과를
    /// 공유합니다. 지정하지 않으면 제공자가 요청 내용으로 키를 만듭니다.
    pub request_key: Option<String>,
}

impl FetchOptions {
    /// idempotency 키를 지정한 옵션 생성.
    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            request_key: Some(key.into()),
        }
    }
}

/// 조회 결과 타입.
pub type FetchResult = Result<NavSnapshot, FetchFailure>;

/// 외부 NAV 데이터 제공자 trait.
///
/// 구현체는 idempotent 요청 병합, 전역 rate limit, 재시도/백오프를
/// 내부에서 처리해야 하며, 어떤 실패도 `FetchFailure`로만 반환해야 합니다.
#[async_trait]
pub trait NavDataProvider: Send + Sync {
    /// 일일 전체 스냅샷 조회.
    async fn fetch_daily(&self, options: &FetchOptions) -> FetchResult;

    /// 기간 조회. `end - start`가 최대 허용 범위(90일)를 넘으면
    /// HTTP 호출 없이 검증 실패를 반환합니다.
    async fn fetch_historical(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        options: &FetchOptions,
    ) -> FetchResult;

    /// 단일 스킴 조회.
    async fn fetch_for_scheme(&self, scheme_code: &str, options: &FetchOptions) -> FetchResult;
}
