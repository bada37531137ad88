//! 진행 중인 채우기 작업 레지스트리 (singleflight).
//!
//! 같은 키에 대한 동시 요청이 업스트림을 한 번만 호출하도록, 키마다 최대
//! 하나의 채우기 작업만 등록합니다. "진행 중인 작업이 없다"는 판단과 등록은
//! 하나의 임계 구역에서 이루어지며, 작업은 별도 태스크로 실행되어 최초
//! 호출자가 취소되어도 다른 대기자에게 결과를 전달합니다.

use crate::error::{CacheError, Result};
use crate::local::CachedValue;
use feed_core::CacheKey;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// 모든 대기자가 공유하는 채우기 결과.
pub type SharedPopulation = Shared<BoxFuture<'static, Result<CachedValue>>>;

/// 등록 결과.
pub enum Registration {
    /// 이미 진행 중인 작업에 합류
    Joined(SharedPopulation),
    /// 새 작업을 시작
    Started(SharedPopulation),
}

impl Registration {
    /// 공유 future를 꺼냅니다.
    pub fn into_future(self) -> SharedPopulation {
        match self {
            Registration::Joined(future) | Registration::Started(future) => future,
        }
    }

    pub fn is_joined(&self) -> bool {
        matches!(self, Registration::Joined(_))
    }
}

struct Slot {
    id: u64,
    future: SharedPopulation,
}

type Slots = Arc<Mutex<HashMap<CacheKey, Slot>>>;

/// 채우기 태스크가 끝날 때(성공, 실패, panic 모두) 자신의 슬롯을 제거합니다.
///
/// 슬롯 id가 일치할 때만 제거하므로 이전 태스크가 새로 등록된 슬롯을
/// 지우는 일은 없습니다.
struct SlotGuard {
    slots: Slots,
    key: CacheKey,
    id: u64,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        if slots.get(&self.key).map(|slot| slot.id) == Some(self.id) {
            slots.remove(&self.key);
            debug!(key = %self.key, "채우기 작업 슬롯 해제");
        }
    }
}

/// 진행 중인 채우기 작업 레지스트리.
#[derive(Default)]
pub struct PendingRequestRegistry {
    slots: Slots,
    next_id: AtomicU64,
}

impl PendingRequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 진행 중인 작업에 합류하거나, 없으면 `start`로 새 작업을 시작합니다.
    ///
    /// 확인과 등록은 원자적으로 이루어집니다. `start`는 새 작업을 시작할 때만
    /// 호출되며 반환된 future는 런타임에 spawn됩니다.
    pub fn join_or_start<S, F>(&self, key: &CacheKey, start: S) -> Registration
    where
        S: FnOnce() -> F,
        F: Future<Output = Result<CachedValue>> + Send + 'static,
    {
        let mut slots = self.slots.lock();

        if let Some(slot) = slots.get(key) {
            return Registration::Joined(slot.future.clone());
        }

        let population = start();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let guard = SlotGuard {
            slots: Arc::clone(&self.slots),
            key: key.clone(),
            id,
        };

        // 태스크는 슬롯 제거를 위해 같은 lock이 필요하므로, 아래 insert가
        // 끝나기 전에는 슬롯을 지울 수 없습니다.
        let handle = tokio::spawn(async move {
            let _guard = guard;
            population.await
        });

        let future = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(CacheError::ProducerFailed(format!(
                    "population task aborted: {}",
                    e
                ))),
            }
        }
        .boxed()
        .shared();

        slots.insert(
            key.clone(),
            Slot {
                id,
                future: future.clone(),
            },
        );

        Registration::Started(future)
    }

    /// 키에 대해 진행 중인 작업이 있는지 확인합니다.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.slots.lock().contains_key(key)
    }

    /// 진행 중인 작업 수.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_second_caller_joins_first() {
        let registry = PendingRequestRegistry::new();
        let key = CacheKey::new("coin_btc");
        let starts = Arc::new(AtomicUsize::new(0));

        let start = || {
            let starts = Arc::clone(&starts);
            move || {
                starts.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(Arc::new(json!({"price": 42})))
                }
            }
        };

        let first = registry.join_or_start(&key, start());
        let second = registry.join_or_start(&key, start());

        assert!(!first.is_joined());
        assert!(second.is_joined());
        assert!(registry.contains(&key));

        let (a, b) = tokio::join!(first.into_future(), second.into_future());
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        tokio::task::yield_now().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_slot_cleared_after_failure() {
        let registry = PendingRequestRegistry::new();
        let key = CacheKey::new("news");

        let result = registry
            .join_or_start(&key, || async {
                Err(CacheError::ProducerFailed("boom".to_string()))
            })
            .into_future()
            .await;

        assert!(result.is_err());
        tokio::task::yield_now().await;
        assert!(!registry.contains(&key));

        // 실패 후 다음 요청은 새 작업을 시작
        let next = registry.join_or_start(&key, || async { Ok(Arc::new(json!(1))) });
        assert!(!next.is_joined());
        assert_eq!(*next.into_future().await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn test_slot_cleared_after_panic() {
        let registry = PendingRequestRegistry::new();
        let key = CacheKey::new("panicky");

        let result = registry
            .join_or_start(&key, || async { panic!("producer bug") })
            .into_future()
            .await;

        assert!(matches!(result, Err(CacheError::ProducerFailed(_))));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_survives_caller_cancellation() {
        let registry = PendingRequestRegistry::new();
        let key = CacheKey::new("survivor");

        let first = registry.join_or_start(&key, || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(Arc::new(json!("done")))
        });
        // 최초 호출자가 기다리지 않고 떠남
        drop(first);

        let joined = registry.join_or_start(&key, || async {
            Ok(Arc::new(json!("should not run")))
        });
        assert!(joined.is_joined());
        assert_eq!(*joined.into_future().await.unwrap(), json!("done"));
    }
}
