//! stale-while-revalidate 백그라운드 갱신.
//!
//! 로컬 히트의 남은 수명이 임계값 아래로 떨어지면 호출자는 캐시된 값을
//! 즉시 받고, 갱신은 짧은 지연 후 백그라운드에서 수행됩니다. 이미 예약된
//! 키는 다시 예약하지 않으며, 그 사이 같은 키의 채우기 작업이 시작되었다면
//! 갱신을 건너뜁니다.

use crate::events::{CacheEvent, EventSink};
use crate::local::LocalCache;
use crate::registry::PendingRequestRegistry;
use crate::remote::RemoteStore;
use crate::service::{run_producer, Producer};
use feed_core::CacheKey;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn, Instrument};

/// 예약 해제 가드. 갱신 태스크가 어떤 경로로 끝나든 키를 예약 목록에서
/// 제거합니다.
struct ScheduledGuard {
    scheduled: Arc<Mutex<HashSet<CacheKey>>>,
    key: CacheKey,
}

impl Drop for ScheduledGuard {
    fn drop(&mut self) {
        self.scheduled.lock().remove(&self.key);
    }
}

/// 백그라운드 갱신기.
pub struct BackgroundRefresher {
    local: Arc<LocalCache>,
    remote: Arc<dyn RemoteStore>,
    registry: Arc<PendingRequestRegistry>,
    sink: Arc<dyn EventSink>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    scheduled: Arc<Mutex<HashSet<CacheKey>>>,
    delay: Duration,
}

impl BackgroundRefresher {
    pub fn new(
        local: Arc<LocalCache>,
        remote: Arc<dyn RemoteStore>,
        registry: Arc<PendingRequestRegistry>,
        sink: Arc<dyn EventSink>,
        tracker: TaskTracker,
        cancel: CancellationToken,
        delay: Duration,
    ) -> Self {
        Self {
            local,
            remote,
            registry,
            sink,
            tracker,
            cancel,
            scheduled: Arc::new(Mutex::new(HashSet::new())),
            delay,
        }
    }

    /// 갱신을 예약합니다. 이미 예약된 키이면 `false`를 반환합니다.
    pub fn schedule_refresh(&self, key: &CacheKey, producer: Producer, ttl: Duration) -> bool {
        if !self.scheduled.lock().insert(key.clone()) {
            self.sink.record(CacheEvent::RefreshSkipped, key.as_str());
            return false;
        }
        self.sink.record(CacheEvent::RefreshScheduled, key.as_str());

        let guard = ScheduledGuard {
            scheduled: Arc::clone(&self.scheduled),
            key: key.clone(),
        };
        let key = key.clone();
        let local = Arc::clone(&self.local);
        let remote = Arc::clone(&self.remote);
        let registry = Arc::clone(&self.registry);
        let sink = Arc::clone(&self.sink);
        let cancel = self.cancel.clone();
        let delay = self.delay;
        let span = feed_core::cache_span!("refresh", key);

        self.tracker.spawn(
            async move {
                let _guard = guard;

                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("종료 요청으로 갱신 취소");
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }

                if registry.contains(&key) {
                    debug!("채우기 작업이 진행 중이므로 갱신 생략");
                    sink.record(CacheEvent::RefreshSkipped, key.as_str());
                    return;
                }

                match run_producer(&producer).await {
                    Ok(value) => {
                        let value = Arc::new(value);
                        local.set(&key, Arc::clone(&value), ttl);
                        if let Err(e) = remote.set(&key, &value, ttl).await {
                            warn!(error = %e, "갱신 값 원격 기록 실패");
                        }
                        sink.record(CacheEvent::RefreshSucceeded, key.as_str());
                    }
                    Err(e) => {
                        warn!(error = %e, "백그라운드 갱신 실패");
                        sink.record(CacheEvent::RefreshFailed, key.as_str());
                    }
                }
            }
            .instrument(span),
        );

        true
    }

    /// 예약되었거나 실행 중인 갱신 수.
    pub fn scheduled_count(&self) -> usize {
        self.scheduled.lock().len()
    }
}
