//! # Feed Cache
//!
//! 느리고 rate limit이 있는 업스트림 API(시세, 뉴스, 블록 탐색기) 앞단의
//! 2계층 캐시입니다.
//!
//! - [`LocalCache`]: 프로세스 로컬 TTL 캐시
//! - [`RemoteStore`]: 원격 KV 저장소 ([`RemoteCacheClient`] REST, [`RedisStore`])
//! - [`PendingRequestRegistry`]: 같은 키의 동시 요청 병합
//! - [`BackgroundRefresher`]: stale-while-revalidate 갱신
//! - [`BatchWriter`]: 단일 pipeline 요청으로 원격 배치 쓰기
//! - [`CacheService`]: 위 구성 요소를 묶는 오케스트레이터
//!
//! ```no_run
//! use feed_cache::{producer, CacheService};
//! use feed_core::{CacheKey, FeedConfig};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let service = CacheService::from_config(&FeedConfig::from_env()?)?;
//! let key = CacheKey::with_params("coin_chart", &[("id", "btc"), ("days", "30")]);
//!
//! let value = service
//!     .get_or_populate(&key, producer(|| async { Ok(json!([1, 2, 3])) }), Duration::from_secs(60))
//!     .await?;
//! println!("{}", value);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod local;
pub mod redis_store;
pub mod refresher;
pub mod registry;
pub mod remote;
pub mod service;

pub use batch::{BatchItem, BatchWriter, FlushReport};
pub use error::{CacheError, Result};
pub use events::{CacheEvent, EventSink, MetricsEventSink, RecordingEventSink};
pub use fetcher::{FetchOptions, FetchRequest, RetryingFetcher};
pub use local::{CacheEntry, CachedValue, FreshHit, LocalCache, LocalCacheStats};
pub use redis_store::RedisStore;
pub use refresher::BackgroundRefresher;
pub use registry::{PendingRequestRegistry, Registration, SharedPopulation};
pub use remote::{RemoteCacheClient, RemoteStore};
pub use service::{producer, CacheRequest, CacheService, CacheServiceBuilder, Producer};
