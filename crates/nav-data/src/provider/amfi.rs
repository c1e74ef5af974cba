//! AMFI 공시 포털 클라이언트.
//!
//! 인도 뮤추얼 펀드 협회(AMFI) 공시 포털에서 NAV 데이터를 수집합니다.
//! 응답은 JSON이 아닌 세미콜론 구분 텍스트이며, 포털 특성상 다음
//! 제약을 클라이언트가 강제합니다:
//!
//! - 기간 조회는 한 번에 최대 90일
//! - 모든 outbound 호출에 전역 최소 간격 (기본 1000ms)
//! - 같은 idempotency 키의 동시 호출은 하나의 outbound 호출로 병합
//!
//! 모든 실패는 `FetchFailure` 값으로 반환되며 이 모듈 밖으로
//! 패닉이 전파되지 않습니다.

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use nav_core::{
    FetchConfig, FetchErrorKind, FetchFailure, FetchOptions, FetchResult, NavDataProvider,
    NavSnapshot,
};

use super::parse::{self, ParseOutcome};
use super::rate_gate::RateGate;
use super::single_flight::FetchCoalescer;

/// 데이터 소스 이름 (로그/실패 값에 사용).
const SOURCE_NAME: &str = "amfi";

/// AMFI 공시 포털 클라이언트.
pub struct AmfiClient {
    client: reqwest::Client,
    config: FetchConfig,
    rate_gate: RateGate,
    coalescer: FetchCoalescer,
}

impl AmfiClient {
    /// 새 클라이언트 생성.
    pub fn new(config: FetchConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            // 포털이 기본 클라이언트 UA를 차단하는 경우가 있어 브라우저형 헤더 사용
            .user_agent(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
            )
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let rate_gate = RateGate::new(config.min_request_interval());

        Self {
            client,
            config,
            rate_gate,
            coalescer: FetchCoalescer::new(),
        }
    }

    /// 기간 조회 범위 검증.
    ///
    /// HTTP 호출 전에 실패를 확정합니다 (포털의 하드 리밋과 동일 기준).
    fn validate_span(&self, start: NaiveDate, end: NaiveDate) -> Result<(), FetchFailure> {
        if start > end {
            return Err(FetchFailure::new(
                FetchErrorKind::Validation,
                SOURCE_NAME,
                format!("시작일({})이 종료일({})보다 늦습니다", start, end),
            ));
        }
        let span_days = (end - start).num_days();
        if span_days > self.config.max_span_days {
            return Err(FetchFailure::new(
                FetchErrorKind::Validation,
                SOURCE_NAME,
                format!(
                    "조회 범위 {}일이 최대 {}일을 초과합니다",
                    span_days, self.config.max_span_days
                ),
            ));
        }
        if end > Utc::now().date_naive() {
            return Err(FetchFailure::new(
                FetchErrorKind::Validation,
                SOURCE_NAME,
                format!("종료일({})이 미래입니다", end),
            ));
        }
        Ok(())
    }

    /// 단일 HTTP GET 시도.
    async fn try_get(&self, url: &str, query: &[(&str, String)]) -> Result<String, FetchFailure> {
        let response = self
            .client
            .get(url)
            .query(query)
            .header("Accept", "text/plain,text/html;q=0.9,*/*;q=0.8")
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::new(
                FetchErrorKind::Http,
                SOURCE_NAME,
                format!("HTTP {} ({})", status.as_u16(), url),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        if body.trim().is_empty() {
            return Err(FetchFailure::new(
                FetchErrorKind::EmptyResponse,
                SOURCE_NAME,
                "응답 본문이 비어 있습니다",
            ));
        }

        Ok(body)
    }

    /// 재시도/백오프를 적용한 텍스트 GET.
    async fn get_text(&self, url: &str, query: &[(&str, String)]) -> Result<String, FetchFailure> {
        let max_attempts = self.config.max_attempts;
        let base_delay = self.config.retry_base_delay();

        with_retries(max_attempts, base_delay, |attempt| async move {
            self.rate_gate.acquire().await;
            tracing::debug!(url = url, attempt = attempt, "외부 조회 요청");
            self.try_get(url, query).await
        })
        .await
    }

    /// 파싱 결과를 스냅샷으로 확정합니다 (품질 게이트 포함).
    fn finalize(
        &self,
        outcome: Result<ParseOutcome, String>,
        request_id: Uuid,
        started: Instant,
    ) -> FetchResult {
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let outcome = outcome.map_err(|message| {
            FetchFailure::new(FetchErrorKind::Parse, SOURCE_NAME, message)
                .with_request_id(request_id)
                .with_elapsed_ms(elapsed_ms)
        })?;

        if outcome.exceeds_invalid_threshold() {
            return Err(FetchFailure::new(
                FetchErrorKind::DataQuality,
                SOURCE_NAME,
                format!(
                    "유효하지 않은 행 비율 초과: {}/{}",
                    outcome.invalid_rows, outcome.parsed_rows
                ),
            )
            .with_request_id(request_id)
            .with_elapsed_ms(elapsed_ms));
        }

        Ok(NavSnapshot {
            records: outcome.records,
            invalid_rows: outcome.invalid_rows,
            source: SOURCE_NAME.to_string(),
            request_id,
            fetched_at: Utc::now(),
            elapsed_ms,
        })
    }

    /// 캐시/병합을 거치지 않는 일일 스냅샷 조회.
    async fn fetch_daily_uncached(&self) -> FetchResult {
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        let body = self
            .get_text(&self.config.daily_url, &[])
            .await
            .map_err(|f| {
                f.with_request_id(request_id)
                    .with_elapsed_ms(started.elapsed().as_millis() as u64)
            })?;

        self.finalize(parse::parse_daily(&body), request_id, started)
    }

    /// 캐시/병합을 거치지 않는 기간 조회.
    async fn fetch_historical_uncached(&self, start: NaiveDate, end: NaiveDate) -> FetchResult {
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        let query = [
            ("tp", "1".to_string()),
            ("frmdt", start.format("%d-%b-%Y").to_string()),
            ("todt", end.format("%d-%b-%Y").to_string()),
        ];

        let body = self
            .get_text(&self.config.historical_url, &query)
            .await
            .map_err(|f| {
                f.with_request_id(request_id)
                    .with_elapsed_ms(started.elapsed().as_millis() as u64)
            })?;

        self.finalize(parse::parse_historical(&body), request_id, started)
    }
}

#[async_trait]
impl NavDataProvider for AmfiClient {
    async fn fetch_daily(&self, options: &FetchOptions) -> FetchResult {
        let key = options
            .request_key
            .clone()
            .unwrap_or_else(|| "daily".to_string());
        let ttl = Duration::from_secs(self.config.daily_cache_ttl_secs);

        self.coalescer
            .get_or_fetch(&key, ttl, self.fetch_daily_uncached())
            .await
    }

    async fn fetch_historical(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        options: &FetchOptions,
    ) -> FetchResult {
        self.validate_span(start, end)?;

        let key = options
            .request_key
            .clone()
            .unwrap_or_else(|| format!("historical:{}:{}", start, end));
        let ttl = Duration::from_secs(self.config.historical_cache_ttl_secs);

        self.coalescer
            .get_or_fetch(&key, ttl, self.fetch_historical_uncached(start, end))
            .await
    }

    async fn fetch_for_scheme(&self, scheme_code: &str, options: &FetchOptions) -> FetchResult {
        // 일일 스냅샷을 공유해 스킴별 조회가 추가 outbound 호출을 만들지 않게 한다
        let snapshot = self.fetch_daily(options).await?;

        let records = snapshot.filter_schemes(&[scheme_code.to_string()]);
        Ok(NavSnapshot { records, ..snapshot })
    }
}

/// reqwest 에러를 실패 분류로 변환합니다.
///
/// 타임아웃은 네트워크 오류와 구분되는 별도 종류입니다.
fn classify_reqwest_error(err: &reqwest::Error) -> FetchFailure {
    let kind = if err.is_timeout() {
        FetchErrorKind::Timeout
    } else {
        FetchErrorKind::Network
    };
    FetchFailure::new(kind, SOURCE_NAME, err.to_string())
}

/// 지수 백오프 재시도.
///
/// `attempt` 번째(1부터) 실패 후 `base_delay × 2^(attempt-1)` 만큼 대기합니다.
/// 재시도 불가능한 실패는 즉시 반환합니다.
async fn with_retries<T, F, Fut>(
    max_attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, FetchFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchFailure>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(failure) if failure.kind.is_retryable() && attempt < max_attempts => {
                let delay = base_delay * 2u32.saturating_pow(attempt - 1);
                tracing::warn!(
                    attempt = attempt,
                    max_attempts = max_attempts,
                    kind = %failure.kind,
                    delay_ms = delay.as_millis() as u64,
                    "외부 조회 실패, 재시도 대기"
                );
                tokio::time::sleep(delay).await;
            }
            Err(failure) => return Err(failure),
        }
    }
}
