//! 전역 요청 간격 제한.
//!
//! 외부 공시 포털에 대한 모든 outbound 호출에 단일한 최소 간격을
//! 적용합니다. 호출자가 누구든 관계없이 하나의 게이트를 공유합니다.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// 최소 요청 간격 게이트.
///
/// 마지막 통과 시각을 기억하고, 간격이 지나지 않았으면 잠든 뒤 통과시킵니다.
/// mutex를 잠근 채 대기하므로 동시 호출자들도 간격 순서대로 직렬화됩니다.
pub struct RateGate {
    interval: Duration,
    last_pass: Mutex<Option<Instant>>,
}

impl RateGate {
    /// 지정한 최소 간격의 게이트 생성.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_pass: Mutex::new(None),
        }
    }

    /// 간격이 확보될 때까지 대기한 뒤 통과합니다.
    pub async fn acquire(&self) {
        let mut last_pass = self.last_pass.lock().await;

        if let Some(prev) = *last_pass {
            let ready_at = prev + self.interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }

        *last_pass = Some(Instant::now());
    }
}
