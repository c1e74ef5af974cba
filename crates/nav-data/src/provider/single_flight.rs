//! idempotency 키 기반 요청 병합 및 결과 캐시.
//!
//! 같은 키의 조회가 진행 중이면 두 번째 호출자는 새 outbound 호출을
//! 만들지 않고 진행 중인 결과를 공유합니다. 성공 결과는 TTL 동안
//! 캐시된 뒤 제거되며, 실패 결과는 캐시하지 않습니다 (다음 호출이
//! 즉시 재시도할 수 있도록).

use std::collections::HashMap;
use std::time::Duration;

use nav_core::FetchResult;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

/// 키별 슬롯 상태.
enum Slot {
    /// 조회 진행 중. 대기자는 이 채널로 결과를 받습니다.
    InFlight(watch::Receiver<Option<FetchResult>>),
    /// 성공 결과가 TTL 동안 캐시됨.
    Ready {
        result: FetchResult,
        expires_at: Instant,
    },
}

/// 조회 병합기.
pub struct FetchCoalescer {
    slots: Mutex<HashMap<String, Slot>>,
}

impl Default for FetchCoalescer {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchCoalescer {
    /// 빈 병합기 생성.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// 키에 대한 결과를 얻습니다.
    ///
    /// - 유효한 캐시가 있으면 즉시 반환
    /// - 같은 키가 진행 중이면 그 결과를 공유
    /// - 그 외에는 `fetch`를 실행하고 결과를 공유/캐시
    ///
    /// `fetch`는 Run 경로에서만 poll되며, 다른 경로에서는 그대로 버려집니다.
    pub async fn get_or_fetch<Fut>(&self, key: &str, ttl: Duration, fetch: Fut) -> FetchResult
    where
        Fut: std::future::Future<Output = FetchResult>,
    {
        loop {
            enum Entry {
                Hit(FetchResult),
                Wait(watch::Receiver<Option<FetchResult>>),
                Run(watch::Sender<Option<FetchResult>>),
            }

            let entry = {
                let mut slots = self.slots.lock().await;

                // 만료된 캐시 슬롯은 접근 시점에 치운다
                let now = Instant::now();
                slots.retain(|_, slot| match slot {
                    Slot::Ready { expires_at, .. } => *expires_at > now,
                    Slot::InFlight(_) => true,
                });

                match slots.get(key) {
                    Some(Slot::Ready { result, expires_at }) if *expires_at > Instant::now() => {
                        Entry::Hit(result.clone())
                    }
                    Some(Slot::InFlight(rx)) => Entry::Wait(rx.clone()),
                    _ => {
                        let (tx, rx) = watch::channel(None);
                        slots.insert(key.to_string(), Slot::InFlight(rx));
                        Entry::Run(tx)
                    }
                }
            };

            match entry {
                Entry::Hit(result) => return result,
                Entry::Wait(mut rx) => {
                    loop {
                        if let Some(result) = rx.borrow().clone() {
                            return result;
                        }
                        if rx.changed().await.is_err() {
                            // 실행자가 결과 없이 사라진 경우. 슬롯을 치우고 재시도.
                            let mut slots = self.slots.lock().await;
                            if matches!(slots.get(key), Some(Slot::InFlight(_))) {
                                slots.remove(key);
                            }
                            break;
                        }
                    }
                    continue;
                }
                Entry::Run(tx) => {
                    let result = fetch.await;

                    {
                        let mut slots = self.slots.lock().await;
                        if result.is_ok() {
                            slots.insert(
                                key.to_string(),
                                Slot::Ready {
                                    result: result.clone(),
                                    expires_at: Instant::now() + ttl,
                                },
                            );
                        } else {
                            slots.remove(key);
                        }
                    }

                    let _ = tx.send(Some(result.clone()));
                    return result;
                }
            }
        }
    }

}
