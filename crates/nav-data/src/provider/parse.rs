//! 공시 포털 텍스트 응답 파싱.
//!
//! 응답은 JSON이 아니라 세미콜론 구분 텍스트입니다:
//!
//! - 일일 스냅샷: 6컬럼, 헤더 행이 컬럼 이름을 제공
//! - 기간 리포트: 8컬럼 고정, 그중 4컬럼(ISIN 2개, 환매가, 판매가)은 사용하지 않음
//!
//! 값이 비어 있거나 `-`/`N.A.`인 행, 달력에 존재하지 않는 날짜가 적힌 행은
//! 제외됩니다 (0으로 보정하지 않음).

use std::collections::HashMap;

use chrono::NaiveDate;
use nav_core::NavRecord;
use rust_decimal::Decimal;

/// 파싱 결과.
///
/// `parsed_rows`는 컬럼 수가 맞는 데이터 행의 수이며, 그중 필수 필드가
/// 비어 있거나 유효하지 않은 행의 수가 `invalid_rows`입니다.
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    /// 유효 레코드
    pub records: Vec<NavRecord>,
    /// 컬럼 수가 맞는 데이터 행 수
    pub parsed_rows: usize,
    /// 필수 필드 누락/비정상으로 제외된 행 수
    pub invalid_rows: usize,
}

impl ParseOutcome {
    /// 유효하지 않은 행 비율이 허용치(10%)를 넘는지 확인합니다.
    pub fn exceeds_invalid_threshold(&self) -> bool {
        self.invalid_rows * 10 > self.parsed_rows
    }
}

/// 일일 스냅샷 헤더 컬럼 이름.
const COL_SCHEME_CODE: &str = "Scheme Code";
const COL_SCHEME_NAME: &str = "Scheme Name";
const COL_NAV: &str = "Net Asset Value";
const COL_DATE: &str = "Date";
const COL_ISIN_GROWTH: &str = "ISIN Div Payout/ ISIN Growth";
const COL_ISIN_REINVEST: &str = "ISIN Div Reinvestment";

/// 일일 스냅샷 컬럼 수.
const DAILY_COLUMNS: usize = 6;
/// 기간 리포트 컬럼 수.
const HISTORICAL_COLUMNS: usize = 8;

/// 일일 전체 스냅샷 텍스트를 파싱합니다.
///
/// 헤더 행에서 컬럼 이름 → 인덱스 매핑을 만들고, 이후의 6컬럼 행만
/// 데이터로 취급합니다. 세미콜론이 없는 행(펀드사/카테고리 구분 행)은
/// 조용히 건너뜁니다.
pub fn parse_daily(body: &str) -> Result<ParseOutcome, String> {
    let mut lines = body.lines();

    // 헤더 탐색
    let header = lines
        .by_ref()
        .find(|line| line.contains(COL_SCHEME_CODE) && line.contains(';'))
        .ok_or_else(|| "헤더 행을 찾을 수 없습니다".to_string())?;

    let columns: HashMap<&str, usize> = header
        .split(';')
        .enumerate()
        .map(|(idx, name)| (name.trim(), idx))
        .collect();

    let code_idx = column_index(&columns, COL_SCHEME_CODE)?;
    let name_idx = column_index(&columns, COL_SCHEME_NAME)?;
    let nav_idx = column_index(&columns, COL_NAV)?;
    let date_idx = column_index(&columns, COL_DATE)?;
    let isin_growth_idx = columns.get(COL_ISIN_GROWTH).copied();
    let isin_reinvest_idx = columns.get(COL_ISIN_REINVEST).copied();

    let mut outcome = ParseOutcome {
        records: Vec::new(),
        parsed_rows: 0,
        invalid_rows: 0,
    };

    for line in lines {
        let fields: Vec<&str> = line.split(';').collect();
        if fields.len() != DAILY_COLUMNS {
            // 구분 행 또는 빈 행
            continue;
        }
        outcome.parsed_rows += 1;

        let scheme_code = fields[code_idx].trim();
        let scheme_name = fields[name_idx].trim();
        let nav = parse_nav_value(fields[nav_idx]);
        let date = parse_nav_date(fields[date_idx]);

        match (nav, date) {
            (Some(nav), Some(date)) if !scheme_code.is_empty() && !scheme_name.is_empty() => {
                outcome.records.push(NavRecord {
                    scheme_code: scheme_code.to_string(),
                    scheme_name: scheme_name.to_string(),
                    isin_growth: isin_growth_idx.and_then(|i| optional_field(fields[i])),
                    isin_div_reinvestment: isin_reinvest_idx
                        .and_then(|i| optional_field(fields[i])),
                    nav,
                    date,
                });
            }
            _ => outcome.invalid_rows += 1,
        }
    }

    Ok(outcome)
}

/// 기간 리포트 텍스트를 파싱합니다.
///
/// 8컬럼 고정 형식이며 사용하는 컬럼은 코드(0), 스킴명(1), NAV(4),
/// 날짜(7)뿐입니다. ISIN 2개와 환매가/판매가 컬럼은 건너뜁니다.
pub fn parse_historical(body: &str) -> Result<ParseOutcome, String> {
    const CODE_IDX: usize = 0;
    const NAME_IDX: usize = 1;
    const NAV_IDX: usize = 4;
    const DATE_IDX: usize = 7;

    let mut outcome = ParseOutcome {
        records: Vec::new(),
        parsed_rows: 0,
        invalid_rows: 0,
    };

    for line in body.lines() {
        let fields: Vec<&str> = line.split(';').collect();
        if fields.len() != HISTORICAL_COLUMNS {
            continue;
        }
        // 헤더 행
        if fields[CODE_IDX].trim() == COL_SCHEME_CODE {
            continue;
        }
        outcome.parsed_rows += 1;

        let scheme_code = fields[CODE_IDX].trim();
        let scheme_name = fields[NAME_IDX].trim();
        let nav = parse_nav_value(fields[NAV_IDX]);
        let date = parse_nav_date(fields[DATE_IDX]);

        match (nav, date) {
            (Some(nav), Some(date)) if !scheme_code.is_empty() && !scheme_name.is_empty() => {
                outcome.records.push(NavRecord {
                    scheme_code: scheme_code.to_string(),
                    scheme_name: scheme_name.to_string(),
                    isin_growth: None,
                    isin_div_reinvestment: None,
                    nav,
                    date,
                });
            }
            _ => outcome.invalid_rows += 1,
        }
    }

    if outcome.parsed_rows == 0 {
        return Err("데이터 행이 없습니다".to_string());
    }

    Ok(outcome)
}

/// NAV 값 파싱.
///
/// 빈 값, `-`, `N.A.`는 "값 없음"으로 취급합니다. 0으로 보정하지 않습니다.
pub fn parse_nav_value(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "-" || trimmed.eq_ignore_ascii_case("N.A.") {
        return None;
    }
    trimmed.parse::<Decimal>().ok()
}

/// `DD-MMM-YYYY` 형식 날짜 파싱.
///
/// chrono가 달력 검증까지 수행하므로 `30-Feb-2024` 같은 문자열은
/// 날짜로 인정되지 않습니다.
pub fn parse_nav_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%d-%b-%Y").ok()
}

fn column_index(columns: &HashMap<&str, usize>, name: &str) -> Result<usize, String> {
    columns
        .get(name)
        .copied()
        .ok_or_else(|| format!("필수 컬럼이 없습니다: {}", name))
}

fn optional_field(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "-" {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const DAILY_HEADER: &str =
        "Scheme Code;ISIN Div Payout/ ISIN Growth;ISIN Div Reinvestment;Scheme Name;Net Asset Value;Date";

    fn daily_body(rows: &[&str]) -> String {
        let mut body = String::from("Open Ended Schemes(Debt Scheme)\n");
        body.push_str(DAILY_HEADER);
        body.push('\n');
        for row in rows {
            body.push_str(row);
            body.push('\n');
        }
        body
    }

    #[test]
    fn test_parse_daily_maps_header_columns() {
        let body = daily_body(&[
            "100001;INF100A;INF100B;알파 단기채 펀드;10.5231;15-Jan-2024",
            "펀드사 구분 행 (무시)",
            "100002;-;-;베타 성장 펀드;25.1;15-Jan-2024",
        ]);

        let outcome = parse_daily(&body).unwrap();
        assert_eq!(outcome.parsed_rows, 2);
        assert_eq!(outcome.invalid_rows, 0);
        assert_eq!(outcome.records.len(), 2);

        let first = &outcome.records[0];
        assert_eq!(first.scheme_code, "100001");
        assert_eq!(first.scheme_name, "알파 단기채 펀드");
        assert_eq!(first.nav, dec!(10.5231));
        assert_eq!(first.isin_growth.as_deref(), Some("INF100A"));
        assert_eq!(
            first.date,
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );

        // `-` ISIN은 값 없음
        assert!(outcome.records[1].isin_growth.is_none());
    }

    #[test]
    fn test_na_value_excluded_not_zeroed() {
        let body = daily_body(&[
            "100001;-;-;알파 펀드;N.A.;15-Jan-2024",
            "100002;-;-;베타 펀드;10.0;15-Jan-2024",
        ]);

        let outcome = parse_daily(&body).unwrap();
        assert_eq!(outcome.parsed_rows, 2);
        assert_eq!(outcome.invalid_rows, 1);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].scheme_code, "100002");
    }

    #[test]
    fn test_impossible_date_discarded() {
        let body = daily_body(&["100001;-;-;알파 펀드;10.0;30-Feb-2024"]);

        let outcome = parse_daily(&body).unwrap();
        assert_eq!(outcome.invalid_rows, 1);
        assert!(outcome.records.is_empty());
    }

    #[test]
    fn test_parse_nav_value_variants() {
        assert_eq!(parse_nav_value(" 12.34 "), Some(dec!(12.34)));
        assert_eq!(parse_nav_value(""), None);
        assert_eq!(parse_nav_value("-"), None);
        assert_eq!(parse_nav_value("N.A."), None);
        assert_eq!(parse_nav_value("n.a."), None);
        assert_eq!(parse_nav_value("abc"), None);
    }

    #[test]
    fn test_missing_header_is_error() {
        assert!(parse_daily("아무 내용 없음\n1;2;3").is_err());
    }

    #[test]
    fn test_parse_historical_skips_fixed_columns() {
        let body = "\
Scheme Code;Scheme Name;ISIN Div Payout/ISIN Growth;ISIN Div Reinvestment;Net Asset Value;Repurchase Price;Sale Price;Date
100001;알파 펀드;INF1;INF2;11.25;11.20;11.30;10-Mar-2023
100001;알파 펀드;INF1;INF2;11.30;11.25;11.35;11-Mar-2023
";
        let outcome = parse_historical(body).unwrap();
        assert_eq!(outcome.parsed_rows, 2);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].nav, dec!(11.25));
        assert!(outcome.records[0].isin_growth.is_none());
        assert_eq!(
            outcome.records[1].date,
            NaiveDate::from_ymd_opt(2023, 3, 11).unwrap()
        );
    }

    #[test]
    fn test_invalid_threshold() {
        let outcome = ParseOutcome {
            records: vec![],
            parsed_rows: 100,
            invalid_rows: 10,
        };
        // 정확히 10%는 허용
        assert!(!outcome.exceeds_invalid_threshold());

        let outcome = ParseOutcome {
            records: vec![],
            parsed_rows: 100,
            invalid_rows: 11,
        };
        assert!(outcome.exceeds_invalid_threshold());
    }
}
