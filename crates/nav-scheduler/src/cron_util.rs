//! cron 표현식 검증 및 다음 실행 시각 계산.
//!
//! 사용자 입력은 표준 5필드 cron을 기본으로 받되, 초 단위가 포함된
//! 6/7필드 표현식도 그대로 허용합니다. 5필드는 파싱 전에 초 필드(`0`)를
//! 앞에 붙여 정규화합니다. 다음 실행 시각은 설정의 IANA 타임존에서
//! 계산한 뒤 UTC로 변환합니다.

use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use nav_core::{NavError, NavResult, ScheduleType};

/// cron 표현식 파싱 (5필드 정규화 포함).
pub fn parse_schedule(expression: &str) -> NavResult<Schedule> {
    let field_count = expression.split_whitespace().count();
    let normalized = if field_count == 5 {
        format!("0 {}", expression)
    } else {
        expression.to_string()
    };

    Schedule::from_str(&normalized).map_err(|e| {
        NavError::Validation(format!("cron 표현식이 유효하지 않습니다: '{}' ({})", expression, e))
    })
}

/// IANA 타임존 파싱.
pub fn parse_timezone(timezone: &str) -> NavResult<Tz> {
    timezone
        .parse::<Tz>()
        .map_err(|_| NavError::Validation(format!("유효하지 않은 타임존: '{}'", timezone)))
}

/// `after` 이후의 다음 실행 시각 (UTC).
pub fn next_fire(
    expression: &str,
    timezone: &str,
    after: DateTime<Utc>,
) -> NavResult<Option<DateTime<Utc>>> {
    let schedule = parse_schedule(expression)?;
    let tz = parse_timezone(timezone)?;

    Ok(schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|dt| dt.with_timezone(&Utc)))
}

/// 스케줄 유형에서 cron 표현식을 결정합니다.
///
/// daily/weekly는 선호 시각으로부터 생성하고, custom은 사용자 표현식을
/// 검증 후 그대로 사용합니다.
pub fn resolve_cron_expression(
    schedule_type: ScheduleType,
    preferred_time: Option<NaiveTime>,
    custom_expression: Option<&str>,
) -> NavResult<String> {
    use chrono::Timelike;

    match schedule_type {
        ScheduleType::Custom => {
            let expression = custom_expression.ok_or_else(|| {
                NavError::Validation(
                    "custom 스케줄에는 cron 표현식이 필요합니다".to_string(),
                )
            })?;
            parse_schedule(expression)?;
            Ok(expression.to_string())
        }
        ScheduleType::Daily => {
            let time = preferred_time
                .unwrap_or_else(|| NaiveTime::from_hms_opt(9, 0, 0).expect("유효한 시각"));
            Ok(format!("{} {} * * *", time.minute(), time.hour()))
        }
        ScheduleType::Weekly => {
            let time = preferred_time
                .unwrap_or_else(|| NaiveTime::from_hms_opt(9, 0, 0).expect("유효한 시각"));
            // 주간 스케줄은 월요일에 실행
            Ok(format!("{} {} * * MON", time.minute(), time.hour()))
        }
    }
}
