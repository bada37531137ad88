//! Redis 직접 연결 원격 저장소.
//!
//! REST 게이트웨이 없이 KV 서비스에 직접 접근하는 배포를 위한
//! [`RemoteStore`] 구현입니다. 모든 명령은 원격 타임아웃으로 제한됩니다.

use crate::batch::BatchItem;
use crate::error::{CacheError, Result};
use crate::remote::{ttl_secs, RemoteStore};
use async_trait::async_trait;
use feed_core::CacheKey;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client, RedisResult};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{info, instrument};

/// Redis 원격 저장소.
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
    timeout: Duration,
}

impl RedisStore {
    /// 새로운 Redis 연결을 생성합니다.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        info!("Connecting to Redis...");

        let client = Client::open(url)?;
        let connection = tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| CacheError::RemoteCacheUnavailable("Redis 연결 시간 초과".to_string()))??;

        info!("Redis connection established");

        Ok(Self {
            connection,
            timeout,
        })
    }

    async fn bounded<T>(&self, command: impl Future<Output = RedisResult<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, command).await {
            Ok(result) => result.map_err(CacheError::from),
            Err(_) => Err(CacheError::RemoteCacheUnavailable(format!(
                "timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &CacheKey) -> Result<Option<Value>> {
        let mut conn = self.connection.clone();
        let stored: Option<String> = self.bounded(conn.get(key.as_str())).await?;

        match stored {
            Some(json) => serde_json::from_str(&json).map(Some).map_err(|e| {
                CacheError::RemoteCacheUnavailable(format!("malformed stored value: {}", e))
            }),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, value), fields(key = %key, ttl_secs = ttl.as_secs()))]
    async fn set(&self, key: &CacheKey, value: &Value, ttl: Duration) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.connection.clone();
        let _: () = self
            .bounded(conn.set_ex(key.as_str(), json, ttl_secs(ttl)))
            .await?;
        Ok(())
    }

    #[instrument(skip(self, items), fields(count = items.len()))]
    async fn pipeline(&self, items: &[BatchItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for item in items {
            let json = serde_json::to_string(&*item.value)?;
            pipe.set_ex(item.key.as_str(), json, ttl_secs(item.ttl))
                .ignore();
        }

        let mut conn = self.connection.clone();
        let _: () = self.bounded(pipe.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn delete(&self, keys: &[CacheKey]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let keys: Vec<&str> = keys.iter().map(CacheKey::as_str).collect();
        let mut conn = self.connection.clone();
        let _: i64 = self.bounded(conn.del(keys)).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<bool> {
        let mut conn = self.connection.clone();
        let reply: String = self
            .bounded(redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(reply == "PONG")
    }
}
