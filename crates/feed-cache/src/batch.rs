//! 원격 저장소 배치 쓰기.
//!
//! 여러 키를 한 번에 채우는 작업(예: 페이지 단위 목록 수집)은 키마다 원격
//! 요청을 보내는 대신 큐에 모은 뒤 단일 pipeline 요청으로 기록합니다.
//! 로컬 캐시는 enqueue 시점에 바로 갱신됩니다.

use crate::events::{CacheEvent, EventSink};
use crate::local::{CachedValue, LocalCache};
use crate::remote::RemoteStore;
use feed_core::CacheKey;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// pipeline 쓰기 대기 항목.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub key: CacheKey,
    pub value: CachedValue,
    pub ttl: Duration,
}

impl BatchItem {
    pub fn new(key: CacheKey, value: CachedValue, ttl: Duration) -> Self {
        Self { key, value, ttl }
    }
}

/// flush 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// flush된 항목 수
    pub items: usize,
    /// 원격 저장소 기록 성공 여부 (빈 큐는 요청하지 않으므로 false)
    pub written: bool,
}

/// 원격 배치 쓰기 큐.
pub struct BatchWriter {
    local: Arc<LocalCache>,
    remote: Arc<dyn RemoteStore>,
    sink: Arc<dyn EventSink>,
    queue: Mutex<Vec<BatchItem>>,
}

impl BatchWriter {
    pub fn new(
        local: Arc<LocalCache>,
        remote: Arc<dyn RemoteStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            local,
            remote,
            sink,
            queue: Mutex::new(Vec::new()),
        }
    }

    /// 항목을 큐에 넣고 로컬 캐시에 즉시 기록합니다.
    pub fn enqueue(&self, key: CacheKey, value: Value, ttl: Duration) {
        let value = Arc::new(value);
        self.local.set(&key, Arc::clone(&value), ttl);
        self.queue.lock().push(BatchItem::new(key, value, ttl));
    }

    /// 큐를 비우고 단일 pipeline 요청으로 원격에 기록합니다.
    ///
    /// 실패는 로그와 [`FlushReport`]로만 보고되며 에러로 반환되지 않습니다.
    /// 실패한 항목은 다시 큐에 넣지 않습니다.
    pub async fn flush(&self) -> FlushReport {
        let items = std::mem::take(&mut *self.queue.lock());
        if items.is_empty() {
            return FlushReport {
                items: 0,
                written: false,
            };
        }

        let count = items.len();
        match self.remote.pipeline(&items).await {
            Ok(()) => {
                info!(count = count, "배치 원격 쓰기 완료");
                self.sink.record(CacheEvent::BatchFlushed, "");
                FlushReport {
                    items: count,
                    written: true,
                }
            }
            Err(e) => {
                warn!(count = count, error = %e, "배치 원격 쓰기 실패");
                self.sink.record(CacheEvent::BatchFlushFailed, "");
                FlushReport {
                    items: count,
                    written: false,
                }
            }
        }
    }

    /// 대기 중인 항목 수.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}
