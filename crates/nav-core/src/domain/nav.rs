//! NAV 레코드 및 환경 타입.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 실행 환경.
///
/// 동일한 테넌트가 운영(live)과 테스트(test) 데이터를 분리하여 관리합니다.
/// 락 키와 가격 테이블의 고유 키에 모두 포함됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "utoipa-support", derive(utoipa::ToSchema))]
pub enum Environment {
    /// 운영 환경
    Live,
    /// 테스트 환경
    Test,
}

impl Environment {
    /// 문자열로 변환.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Test => "test",
        }
    }

    /// 운영 환경 여부.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::Live
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "test" => Ok(Self::Test),
            _ => Err(format!("알 수 없는 환경: {}", s)),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 단일 펀드의 하루치 NAV 레코드.
///
/// 외부 공시 데이터에서 파싱된 정규화 결과입니다. 값이 비어 있거나
/// (`-`, `N.A.`) 날짜가 유효하지 않은 행은 레코드로 만들어지지 않습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa-support", derive(utoipa::ToSchema))]
pub struct NavRecord {
    /// 스킴 코드 (공시 기관이 부여한 고유 식별자)
    pub scheme_code: String,
    /// 스킴명
    pub scheme_name: String,
    /// ISIN (성장형)
    pub isin_growth: Option<String>,
    /// ISIN (배당 재투자형)
    pub isin_div_reinvestment: Option<String>,
    /// 기준가 (NAV)
    pub nav: Decimal,
    /// 기준일
    pub date: NaiveDate,
}

/// 한 번의 외부 조회가 반환한 NAV 스냅샷.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavSnapshot {
    /// 파싱된 유효 레코드
    pub records: Vec<NavRecord>,
    /// 파싱 단계에서 제외된 행 수
    pub invalid_rows: usize,
    /// 데이터 소스 이름 (예: "amfi")
    pub source: String,
    /// 요청 식별자 (idempotency 키와 별개인 outbound 요청 추적용)
    pub request_id: Uuid,
    /// 조회 완료 시각
    pub fetched_at: DateTime<Utc>,
    /// 소요 시간 (밀리초)
    pub elapsed_ms: u64,
}

impl NavSnapshot {
    /// 지정한 스킴 코드 집합으로 레코드를 필터링한 복사본을 반환합니다.
    ///
    /// 빈 집합은 "전체"를 의미합니다.
    pub fn filter_schemes(&self, scheme_codes: &[String]) -> Vec<NavRecord> {
        if scheme_codes.is_empty() {
            return self.records.clone();
        }
        self.records
            .iter()
            .filter(|r| scheme_codes.iter().any(|c| c == &r.scheme_code))
            .cloned()
            .collect()
    }
}
