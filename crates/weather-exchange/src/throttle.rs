//! KIS 호출 간격 조율기.
//!
//! 같은 앱키를 쓰는 프로세스들이 공유 슬롯 저장소(Redis)로 호출 간격을
//! 조율합니다. 저장소가 없거나 장애가 나면 프로세스 로컬 간격 유지로
//! 강등하며, 어떤 경우에도 호출을 실패시키지 않습니다.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use weather_core::SlotStore;

/// 연속 호출 사이 최소 간격 (밀리초).
const DEFAULT_GAP_MS: u64 = 200;
/// 간격 하한.
const MIN_GAP_MS: u64 = 50;
/// 공유 슬롯 대기 상한.
const DEFAULT_MAX_WAIT_MS: u64 = 2_000;
/// 슬롯 키 접두사.
const SLOT_KEY_PREFIX: &str = "kis:throttle";

/// 분산 호출 간격 조율기.
pub struct RateLimiter {
    store: Option<Arc<dyn SlotStore>>,
    gap: Duration,
    max_wait: Duration,
    holder: String,
    /// 라벨별 마지막 로컬 호출 시각
    last_call: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    /// 새 조율기 생성.
    ///
    /// `gap_ms`는 50ms 아래로 내려가지 않고, `max_wait_ms`는 최소
    /// `2 × gap`을 보장합니다.
    pub fn new(store: Option<Arc<dyn SlotStore>>, gap_ms: u64, max_wait_ms: u64) -> Self {
        let gap_ms = gap_ms.max(MIN_GAP_MS);
        let max_wait_ms = max_wait_ms.max(gap_ms * 2);

        Self {
            store,
            gap: Duration::from_millis(gap_ms),
            max_wait: Duration::from_millis(max_wait_ms),
            holder: format!("gw-{}", std::process::id()),
            last_call: Mutex::new(HashMap::new()),
        }
    }

    /// 기본 간격(200ms)과 기본 대기(2s)로 생성.
    pub fn with_defaults(store: Option<Arc<dyn SlotStore>>) -> Self {
        Self::new(store, DEFAULT_GAP_MS, DEFAULT_MAX_WAIT_MS)
    }

    /// `label` 호출 슬롯 획득. 절대 실패하지 않습니다.
    ///
    /// 라벨은 원격 작업 단위(tr_id)마다 따로 주어, 무관한 엔드포인트가
    /// 같은 슬롯을 두고 줄 서지 않게 합니다.
    pub async fn acquire(&self, label: &str) {
        if let Some(store) = &self.store {
            if self.acquire_shared(store.as_ref(), label).await {
                self.record_local(label).await;
                return;
            }
        }
        self.acquire_local(label).await;
    }

    /// 공유 슬롯 획득 시도. 성공하면 `true`, 대기 상한 초과나 저장소
    /// 장애면 `false` (호출자는 로컬 간격으로 강등).
    async fn acquire_shared(&self, store: &dyn SlotStore, label: &str) -> bool {
        let key = format!("{}:{}", SLOT_KEY_PREFIX, label);
        let ttl_ms = self.gap.as_millis() as u64;
        let deadline = Instant::now() + self.max_wait;

        loop {
            match store.try_claim(&key, &self.holder, ttl_ms).await {
                Ok(true) => return true,
                Ok(false) => {
                    let remaining = match store.remaining_ms(&key).await {
                        Ok(ms) => ms,
                        Err(e) => {
                            warn!(label, error = %e, "슬롯 잔여 TTL 조회 실패, 로컬 간격으로 강등");
                            return false;
                        }
                    };

                    let wait_ms = if remaining > 0 {
                        (remaining as u64 + 20).min(ttl_ms * 2)
                    } else {
                        ttl_ms
                    };

                    if Instant::now() + Duration::from_millis(wait_ms) > deadline {
                        debug!(label, "슬롯 대기 상한 초과, 로컬 간격으로 진행");
                        return false;
                    }

                    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                }
                Err(e) => {
                    warn!(label, error = %e, "슬롯 점유 실패, 로컬 간격으로 강등");
                    return false;
                }
            }
        }
    }

    /// 프로세스 로컬 간격 유지.
    async fn acquire_local(&self, label: &str) {
        loop {
            let wait = {
                let mut guard = self.last_call.lock().await;
                let now = Instant::now();
                match guard.get(label) {
                    Some(last) => {
                        let elapsed = now.duration_since(*last);
                        if elapsed >= self.gap {
                            guard.insert(label.to_string(), now);
                            None
                        } else {
                            Some(self.gap - elapsed)
                        }
                    }
                    None => {
                        guard.insert(label.to_string(), now);
                        None
                    }
                }
            };

            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }

    /// 로컬 마지막 호출 시각 기록 (공유 슬롯 획득 직후).
    async fn record_local(&self, label: &str) {
        let mut guard = self.last_call.lock().await;
        guard.insert(label.to_string(), Instant::now());
    }

    /// 설정된 최소 간격.
    pub fn gap(&self) -> Duration {
        self.gap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use weather_core::SlotStoreError;

    struct FailingStore;

    #[async_trait]
    impl SlotStore for FailingStore {
        async fn try_claim(
            &self,
            _key: &str,
            _holder: &str,
            _ttl_ms: u64,
        ) -> Result<bool, SlotStoreError> {
            Err(SlotStoreError::new("down"))
        }

        async fn remaining_ms(&self, _key: &str) -> Result<i64, SlotStoreError> {
            Err(SlotStoreError::new("down"))
        }
    }

    #[tokio::test]
    async fn test_local_gap_enforced() {
        let limiter = Arc::new(RateLimiter::new(None, 50, 200));

        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let l = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                l.acquire("quote").await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // 4건이면 최소 3 × gap 간격이 걸려야 함
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_separate_labels_do_not_queue() {
        let limiter = RateLimiter::new(None, 100, 400);

        let start = Instant::now();
        limiter.acquire("quote").await;
        limiter.acquire("news").await;

        // 다른 라벨은 서로 간격을 강요하지 않음
        assert!(start.elapsed() < Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_failing_store_degrades_without_error() {
        let limiter = RateLimiter::new(Some(Arc::new(FailingStore)), 50, 200);

        let start = Instant::now();
        limiter.acquire("quote").await;
        limiter.acquire("quote").await;

        // 저장소 장애에도 로컬 간격은 유지
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_floor_values() {
        let limiter = RateLimiter::new(None, 10, 5);
        assert_eq!(limiter.gap(), Duration::from_millis(50));
        assert_eq!(limiter.max_wait, Duration::from_millis(100));
    }
}
