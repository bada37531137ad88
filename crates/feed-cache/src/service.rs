//! 2계층 캐시 오케스트레이터.
//!
//! 조회 순서:
//! 1. 로컬 캐시 (남은 수명이 임계값 미만이면 백그라운드 갱신 예약)
//! 2. 같은 키에 대해 진행 중인 채우기 작업에 합류
//! 3. 원격 캐시 → producer 순서로 채우기
//! 4. producer 실패 시 만료된 로컬 데이터로 응답, 그것도 없으면 에러
//!
//! 원격 저장소 장애는 흡수되며 캐시 미스로 취급됩니다.

use crate::batch::BatchWriter;
use crate::error::{CacheError, Result};
use crate::events::{CacheEvent, EventSink, MetricsEventSink};
use crate::local::{CachedValue, LocalCache, LocalCacheStats};
use crate::redis_store::RedisStore;
use crate::refresher::BackgroundRefresher;
use crate::registry::PendingRequestRegistry;
use crate::remote::{RemoteCacheClient, RemoteStore};
use feed_core::{CacheKey, FeedConfig};
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn, Instrument};

/// 업스트림에서 값을 가져오는 호출자 제공 함수.
///
/// 인자가 없고, 백그라운드 갱신에서 다시 호출될 수 있으므로 `Fn`입니다.
pub type Producer = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// async 클로저로 [`Producer`]를 만듭니다.
///
/// ```
/// use feed_cache::producer;
/// use serde_json::json;
///
/// let p = producer(|| async { Ok(json!({"price": 42})) });
/// # let _ = p;
/// ```
pub fn producer<F, Fut>(f: F) -> Producer
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// producer를 실행합니다. producer 안의 panic은 일반 실패로 바뀝니다.
pub(crate) async fn run_producer(producer: &Producer) -> anyhow::Result<Value> {
    match AssertUnwindSafe(async { producer().await })
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!(
            "producer panicked: {}",
            panic_message(&*payload)
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// 조회 요청.
pub enum CacheRequest {
    /// 없으면 producer로 채우는 조회
    Populate {
        key: CacheKey,
        producer: Producer,
        ttl: Duration,
    },
    /// 캐시 계층만 확인하는 조회 (producer 호출 없음)
    LookupOnly { key: CacheKey },
}

/// [`CacheService`] 빌더.
pub struct CacheServiceBuilder {
    remote: Arc<dyn RemoteStore>,
    sink: Arc<dyn EventSink>,
    max_entries: usize,
    refresh_delay: Duration,
    refresh_threshold: f64,
    remote_default_ttl: Duration,
}

impl CacheServiceBuilder {
    fn new(remote: Arc<dyn RemoteStore>) -> Self {
        let config = FeedConfig::default();
        Self {
            remote,
            sink: Arc::new(MetricsEventSink),
            max_entries: config.local.max_entries,
            refresh_delay: config.refresh.delay(),
            refresh_threshold: config.refresh.threshold,
            remote_default_ttl: config.remote.default_ttl(),
        }
    }

    /// 설정 파일/환경 변수의 값을 적용합니다.
    pub fn config(mut self, config: &FeedConfig) -> Self {
        self.max_entries = config.local.max_entries;
        self.refresh_delay = config.refresh.delay();
        self.refresh_threshold = config.refresh.threshold;
        self.remote_default_ttl = config.remote.default_ttl();
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn refresh_threshold(mut self, threshold: f64) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    pub fn build(self) -> CacheService {
        let local = Arc::new(LocalCache::new(self.max_entries));
        let registry = Arc::new(PendingRequestRegistry::new());
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();

        let refresher = BackgroundRefresher::new(
            Arc::clone(&local),
            Arc::clone(&self.remote),
            Arc::clone(&registry),
            Arc::clone(&self.sink),
            tracker.clone(),
            cancel.clone(),
            self.refresh_delay,
        );

        CacheService {
            inner: Arc::new(ServiceInner {
                local,
                remote: self.remote,
                registry,
                refresher,
                sink: self.sink,
                tracker,
                cancel,
                refresh_threshold: self.refresh_threshold,
                remote_default_ttl: self.remote_default_ttl,
            }),
        }
    }
}

struct ServiceInner {
    local: Arc<LocalCache>,
    remote: Arc<dyn RemoteStore>,
    registry: Arc<PendingRequestRegistry>,
    refresher: BackgroundRefresher,
    sink: Arc<dyn EventSink>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    refresh_threshold: f64,
    remote_default_ttl: Duration,
}

/// 2계층 캐시 서비스.
///
/// 프로세스당 하나를 만들어 clone으로 공유합니다.
#[derive(Clone)]
pub struct CacheService {
    inner: Arc<ServiceInner>,
}

impl CacheService {
    /// 원격 저장소를 지정해 빌더를 생성합니다.
    pub fn builder(remote: Arc<dyn RemoteStore>) -> CacheServiceBuilder {
        CacheServiceBuilder::new(remote)
    }

    /// 설정으로부터 REST 원격 클라이언트를 포함한 서비스를 생성합니다.
    pub fn from_config(config: &FeedConfig) -> Result<Self> {
        let remote = RemoteCacheClient::new(&config.remote)?;
        info!(
            remote_configured = remote.is_configured(),
            max_entries = config.local.max_entries,
            "캐시 서비스 초기화"
        );
        Ok(Self::builder(Arc::new(remote)).config(config).build())
    }

    /// 설정에 맞는 원격 저장소에 연결해 서비스를 생성합니다.
    ///
    /// `remote.redis_url`이 있으면 Redis에 직접 연결하고, 없으면
    /// [`from_config`](Self::from_config)와 같이 REST 클라이언트를 사용합니다.
    pub async fn connect(config: &FeedConfig) -> Result<Self> {
        let Some(url) = config.remote.redis_url.as_deref() else {
            return Self::from_config(config);
        };

        let remote = RedisStore::connect(url, config.remote.timeout()).await?;
        info!(max_entries = config.local.max_entries, "캐시 서비스 초기화 (Redis)");
        Ok(Self::builder(Arc::new(remote)).config(config).build())
    }

    /// 캐시된 값을 반환하거나, 없으면 producer로 채웁니다.
    ///
    /// 반환되는 에러는 [`CacheError::NoFallbackAvailable`]뿐입니다.
    pub async fn get_or_populate(
        &self,
        key: &CacheKey,
        producer: Producer,
        ttl: Duration,
    ) -> Result<CachedValue> {
        let inner = &self.inner;

        if let Some(hit) = inner.local.get_fresh(key) {
            if hit.remaining_ratio < inner.refresh_threshold {
                inner.sink.record(CacheEvent::LocalHitRefresh, key.as_str());
                inner.refresher.schedule_refresh(key, producer, ttl);
            } else {
                inner.sink.record(CacheEvent::LocalHit, key.as_str());
            }
            return Ok(hit.value);
        }

        let registration = inner.registry.join_or_start(key, || {
            let inner = Arc::clone(inner);
            let key = key.clone();
            let span = feed_core::cache_span!("populate", key, ttl.as_secs());
            async move { inner.populate(key, producer, ttl).await }.instrument(span)
        });

        if registration.is_joined() {
            inner.sink.record(CacheEvent::Coalesced, key.as_str());
        }
        registration.into_future().await
    }

    /// [`get_or_populate`](Self::get_or_populate) 후 값을 `T`로 역직렬화합니다.
    pub async fn get_or_populate_as<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        producer: Producer,
        ttl: Duration,
    ) -> Result<T> {
        let value = self.get_or_populate(key, producer, ttl).await?;
        Ok(T::deserialize(&*value)?)
    }

    /// 요청 종류에 따라 조회합니다.
    pub async fn resolve(&self, request: CacheRequest) -> Result<Option<CachedValue>> {
        match request {
            CacheRequest::Populate { key, producer, ttl } => {
                self.get_or_populate(&key, producer, ttl).await.map(Some)
            }
            CacheRequest::LookupOnly { key } => Ok(self.lookup(&key).await),
        }
    }

    /// 캐시 계층만 확인합니다. 원격에 도달할 수 없을 때만 만료된 로컬 값을
    /// 사용합니다.
    async fn lookup(&self, key: &CacheKey) -> Option<CachedValue> {
        let inner = &self.inner;

        if let Some(value) = inner.local.get(key) {
            inner.sink.record(CacheEvent::LocalHit, key.as_str());
            return Some(value);
        }

        match inner.remote.get(key).await {
            Ok(Some(value)) => {
                inner.sink.record(CacheEvent::RemoteHit, key.as_str());
                let value = Arc::new(value);
                inner
                    .local
                    .set(key, Arc::clone(&value), inner.remote_default_ttl);
                Some(value)
            }
            Ok(None) => {
                inner.sink.record(CacheEvent::RemoteMiss, key.as_str());
                inner.sink.record(CacheEvent::LookupMiss, key.as_str());
                None
            }
            Err(e) => {
                debug!(key = %key, error = %e, "원격 캐시 조회 실패");
                inner.sink.record(CacheEvent::RemoteUnavailable, key.as_str());
                match inner.local.get_even_if_expired(key) {
                    Some(value) => {
                        inner.sink.record(CacheEvent::StaleFallback, key.as_str());
                        Some(value)
                    }
                    None => {
                        inner.sink.record(CacheEvent::LookupMiss, key.as_str());
                        None
                    }
                }
            }
        }
    }

    /// 두 계층에서 키들을 삭제합니다. 로컬에서 삭제된 항목 수를 반환합니다.
    ///
    /// 원격 삭제 실패는 로그로만 남깁니다.
    pub async fn invalidate(&self, keys: &[CacheKey]) -> usize {
        let inner = &self.inner;
        let removed = inner.local.remove(keys);
        for key in keys {
            inner.sink.record(CacheEvent::Invalidated, key.as_str());
        }

        if let Err(e) = inner.remote.delete(keys).await {
            warn!(count = keys.len(), error = %e, "원격 캐시 무효화 실패");
        }
        removed
    }

    /// 이 서비스의 계층에 기록하는 배치 쓰기 큐를 생성합니다.
    pub fn batch(&self) -> BatchWriter {
        BatchWriter::new(
            Arc::clone(&self.inner.local),
            Arc::clone(&self.inner.remote),
            Arc::clone(&self.inner.sink),
        )
    }

    /// 진행 중인 백그라운드 작업(갱신, 원격 쓰기)이 끝날 때까지 기다립니다.
    pub async fn drain(&self) {
        let tracker = &self.inner.tracker;
        tracker.close();
        tracker.wait().await;
        tracker.reopen();
    }

    /// 대기 중인 갱신 타이머를 취소하고 백그라운드 작업을 정리합니다.
    pub async fn shutdown(&self) {
        info!(
            pending = self.inner.tracker.len(),
            "캐시 서비스 종료, 백그라운드 작업 정리 중"
        );
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    /// 진행 중인 채우기 작업 수.
    pub fn pending_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// 로컬 캐시 통계.
    pub fn local_stats(&self) -> LocalCacheStats {
        self.inner.local.stats()
    }

    /// 로컬 캐시 계층.
    pub fn local(&self) -> &LocalCache {
        &self.inner.local
    }

    /// 원격 저장소 계층.
    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.inner.remote
    }
}

impl ServiceInner {
    /// 원격 → producer 순서로 값을 채웁니다. 레지스트리 태스크 안에서
    /// 실행되므로 결과는 합류한 모든 대기자에게 그대로 전달됩니다.
    async fn populate(
        self: Arc<Self>,
        key: CacheKey,
        producer: Producer,
        ttl: Duration,
    ) -> Result<CachedValue> {
        match self.remote.get(&key).await {
            Ok(Some(value)) => {
                self.sink.record(CacheEvent::RemoteHit, key.as_str());
                let value = Arc::new(value);
                self.local.set(&key, Arc::clone(&value), ttl);
                return Ok(value);
            }
            Ok(None) => self.sink.record(CacheEvent::RemoteMiss, key.as_str()),
            Err(e) => {
                warn!(error = %e, "원격 캐시 조회 실패, 미스로 처리");
                self.sink.record(CacheEvent::RemoteUnavailable, key.as_str());
            }
        }

        match run_producer(&producer).await {
            Ok(value) => {
                self.sink.record(CacheEvent::ProducerSuccess, key.as_str());
                let value = Arc::new(value);
                self.local.set(&key, Arc::clone(&value), ttl);
                self.write_remote_background(key, Arc::clone(&value), ttl);
                Ok(value)
            }
            Err(e) => {
                warn!(error = %e, "producer 실패");
                self.sink.record(CacheEvent::ProducerFailed, key.as_str());
                self.fallback(&key, CacheError::ProducerFailed(format!("{:#}", e)))
            }
        }
    }

    fn fallback(&self, key: &CacheKey, cause: CacheError) -> Result<CachedValue> {
        match self.local.get_even_if_expired(key) {
            Some(value) => {
                info!(key = %key, "만료된 로컬 데이터로 응답");
                self.sink.record(CacheEvent::StaleFallback, key.as_str());
                Ok(value)
            }
            None => {
                self.sink.record(CacheEvent::NoFallback, key.as_str());
                Err(CacheError::NoFallbackAvailable {
                    key: key.to_string(),
                    reason: cause.to_string(),
                })
            }
        }
    }

    /// 원격 쓰기는 호출자를 기다리게 하지 않습니다.
    fn write_remote_background(&self, key: CacheKey, value: CachedValue, ttl: Duration) {
        let remote = Arc::clone(&self.remote);
        self.tracker.spawn(async move {
            if let Err(e) = remote.set(&key, &value, ttl).await {
                warn!(key = %key, error = %e, "원격 캐시 쓰기 실패");
            }
        });
    }
}
