//! 통합 테스트 공용 도구.

#![allow(dead_code)]

use async_trait::async_trait;
use feed_cache::{
    producer, BatchItem, CacheError, CacheService, Producer, RecordingEventSink, RemoteStore,
    Result,
};
use feed_core::CacheKey;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 메모리 원격 저장소. 호출 횟수를 세고 장애를 흉내낼 수 있습니다.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
    failing: AtomicBool,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
    pub pipelines: AtomicUsize,
    pub pipeline_items: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let store = Self::default();
        store.failing.store(true, Ordering::SeqCst);
        Arc::new(store)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn insert(&self, key: &CacheKey, value: Value) {
        self.values.lock().insert(key.to_string(), value);
    }

    pub fn value(&self, key: &CacheKey) -> Option<Value> {
        self.values.lock().get(key.as_str()).cloned()
    }

    pub fn clear(&self) {
        self.values.lock().clear();
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::RemoteCacheUnavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Value>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.value(key))
    }

    async fn set(&self, key: &CacheKey, value: &Value, _ttl: Duration) -> Result<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.insert(key, value.clone());
        Ok(())
    }

    async fn pipeline(&self, items: &[BatchItem]) -> Result<()> {
        self.pipelines.fetch_add(1, Ordering::SeqCst);
        self.pipeline_items.fetch_add(items.len(), Ordering::SeqCst);
        self.check()?;
        for item in items {
            self.insert(&item.key, (*item.value).clone());
        }
        Ok(())
    }

    async fn delete(&self, keys: &[CacheKey]) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let mut values = self.values.lock();
        for key in keys {
            values.remove(key.as_str());
        }
        Ok(())
    }

    async fn ping(&self) -> Result<bool> {
        self.check()?;
        Ok(true)
    }
}

/// 호출 횟수를 세는 producer.
pub struct CountingProducer {
    pub calls: Arc<AtomicUsize>,
    pub producer: Producer,
}

impl CountingProducer {
    /// `delay` 후 `value`를 반환합니다.
    pub fn ok(value: Value, delay: Duration) -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let producer = producer(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let value = value.clone();
            async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(value)
            }
        });
        Self { calls, producer }
    }

    /// 항상 실패합니다.
    pub fn failing() -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let producer = producer(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("upstream returned 429")) }
        });
        Self { calls, producer }
    }

    /// 호출되면 panic합니다.
    pub fn panicking() -> Self {
        fn decode() -> anyhow::Result<Value> {
            panic!("decoder bug")
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let producer = producer(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { decode() }
        });
        Self { calls, producer }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// 기록용 이벤트 수신자를 연결한 서비스.
pub fn service(store: Arc<MemoryStore>) -> (CacheService, Arc<RecordingEventSink>) {
    let sink = Arc::new(RecordingEventSink::new());
    let service = CacheService::builder(store)
        .event_sink(sink.clone())
        .refresh_delay(Duration::from_millis(100))
        .build();
    (service, sink)
}
