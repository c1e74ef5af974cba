//! 날짜 범위 청크 분할.
//!
//! 외부 소스는 한 번에 최대 90일까지만 조회를 허용합니다. 그보다 긴
//! 범위는 연속적이고 겹치지 않는 ≤90일 구간들로 분할하여 순차
//! 실행합니다.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// 분할된 날짜 구간.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateChunk {
    /// 청크 순번 (1부터)
    pub number: i32,
    /// 구간 시작일 (포함)
    pub start: NaiveDate,
    /// 구간 종료일 (포함)
    pub end: NaiveDate,
}

impl DateChunk {
    /// 구간이 덮는 일수 (양 끝 포함).
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// `[start, end]`를 최대 `max_days`일짜리 연속 구간들로 분할합니다.
///
/// 구간들은 겹치지 않고, 합집합이 원래 범위와 정확히 일치합니다.
/// `start > end`면 빈 목록을 반환합니다 (호출측에서 먼저 검증).
pub fn split_date_range(start: NaiveDate, end: NaiveDate, max_days: i64) -> Vec<DateChunk> {
    let mut chunks = Vec::new();
    if start > end || max_days <= 0 {
        return chunks;
    }

    let mut cursor = start;
    let mut number = 1;
    while cursor <= end {
        let chunk_end = std::cmp::min(cursor + Duration::days(max_days - 1), end);
        chunks.push(DateChunk {
            number,
            start: cursor,
            end: chunk_end,
        });
        cursor = chunk_end + Duration::days(1);
        number += 1;
    }

    chunks
}
