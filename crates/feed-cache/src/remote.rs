//! 원격 KV 저장소 클라이언트 (HTTP REST).
//!
//! 와이어 형식:
//!
//! ```text
//! GET  {base}/get/{key}            → {"result": "<JSON 인코딩된 값>" | null}
//! POST {base}/set/{key}?EX={ttl}   body = JSON 값 (application/json)
//! POST {base}/pipeline             body = "SET {key} {json} EX {ttl}" / "DEL {key}" 줄 목록 (text/plain)
//! GET  {base}/ping
//! ```
//!
//! 모든 요청은 `Authorization: Bearer {token}` 헤더를 사용하고, 캐시에 맞는
//! 짧은 타임아웃으로 [`RetryingFetcher`]를 거칩니다. 느린 캐시는 캐시가 없는
//! 것보다 나쁘므로 실패는 모두 [`CacheError::RemoteCacheUnavailable`]로
//! 보고됩니다.

use crate::batch::BatchItem;
use crate::error::{CacheError, Result};
use crate::fetcher::{FetchOptions, FetchRequest, RetryingFetcher};
use async_trait::async_trait;
use feed_core::{CacheKey, RemoteConfig};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

/// 원격 KV 저장소 추상화.
///
/// `get`의 `Ok(None)`은 "키 없음"이라는 정상 응답이며, 저장소에 도달할 수
/// 없는 경우는 항상 `Err`입니다.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 값을 조회합니다.
    async fn get(&self, key: &CacheKey) -> Result<Option<Value>>;

    /// 만료 시간과 함께 값을 저장합니다.
    async fn set(&self, key: &CacheKey, value: &Value, ttl: Duration) -> Result<()>;

    /// 여러 SET을 한 번의 요청으로 저장합니다.
    async fn pipeline(&self, items: &[BatchItem]) -> Result<()>;

    /// 키들을 삭제합니다.
    async fn delete(&self, keys: &[CacheKey]) -> Result<()>;

    /// 저장소 상태를 확인합니다.
    async fn ping(&self) -> Result<bool>;
}

/// 저장소가 받아들이는 최대 만료 시간(초).
const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// 만료 시간(초). 0초 TTL은 저장소가 거부하므로 최소 1초로 올립니다.
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().clamp(1, MAX_TTL_SECS)
}

#[derive(Debug, Clone)]
struct Endpoint {
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct RestResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP REST 원격 캐시 클라이언트.
///
/// URL이나 토큰이 없으면 "미설정" 상태로 생성되며, 이 상태에서는 네트워크
/// 요청 없이 모든 작업이 `RemoteCacheUnavailable`을 반환합니다.
#[derive(Debug, Clone)]
pub struct RemoteCacheClient {
    endpoint: Option<Endpoint>,
    fetcher: RetryingFetcher,
    options: FetchOptions,
}

impl RemoteCacheClient {
    /// 설정으로부터 클라이언트를 생성합니다.
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        Ok(Self::with_fetcher(config, RetryingFetcher::new()?))
    }

    /// 주어진 fetcher를 사용해 클라이언트를 생성합니다.
    pub fn with_fetcher(config: &RemoteConfig, fetcher: RetryingFetcher) -> Self {
        let endpoint = match (&config.url, &config.token) {
            (Some(url), Some(token)) if config.is_configured() => Some(Endpoint {
                base_url: url.trim_end_matches('/').to_string(),
                token: token.clone(),
            }),
            _ => {
                tracing::warn!("원격 캐시 URL/토큰 미설정, 로컬 캐시만 사용합니다");
                None
            }
        };

        let options = FetchOptions::new(config.timeout(), config.max_retries)
            .with_retry_delay(Duration::from_millis(100));

        Self {
            endpoint,
            fetcher,
            options,
        }
    }

    /// 원격 저장소가 설정되어 있는지 확인합니다.
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    fn endpoint(&self) -> Result<&Endpoint> {
        self.endpoint.as_ref().ok_or_else(|| {
            CacheError::RemoteCacheUnavailable("remote cache not configured".to_string())
        })
    }

    fn url(endpoint: &Endpoint, command: &str, key: Option<&CacheKey>) -> String {
        match key {
            Some(key) => format!(
                "{}/{}/{}",
                endpoint.base_url,
                command,
                urlencoding::encode(key.as_str())
            ),
            None => format!("{}/{}", endpoint.base_url, command),
        }
    }

    /// 조회 요청을 실행하고 응답 envelope을 해석합니다.
    async fn call(&self, request: FetchRequest) -> Result<RestResponse> {
        let response = self
            .fetcher
            .execute(&request, &self.options, |response| async move {
                response
                    .json::<RestResponse>()
                    .await
                    .map_err(|e| format!("invalid response body: {}", e))
            })
            .await
            .map_err(|e| CacheError::RemoteCacheUnavailable(e.to_string()))?;

        if let Some(error) = response.error {
            return Err(CacheError::RemoteCacheUnavailable(error));
        }
        Ok(response)
    }

    /// 쓰기 요청을 실행합니다.
    ///
    /// 2xx 응답이면 본문 형식과 관계없이 적용된 것으로 보고 재시도하지
    /// 않습니다. 본문이 `error` 필드를 가진 객체일 때만 실패로 처리합니다.
    async fn call_write(&self, request: FetchRequest) -> Result<()> {
        let body = self
            .fetcher
            .execute(&request, &self.options, |response| async move {
                Ok(response.text().await.unwrap_or_default())
            })
            .await
            .map_err(|e| CacheError::RemoteCacheUnavailable(e.to_string()))?;

        match write_error(&body) {
            Some(error) => Err(CacheError::RemoteCacheUnavailable(error)),
            None => Ok(()),
        }
    }

    /// pipeline 요청 본문을 만듭니다.
    pub fn pipeline_body(items: &[BatchItem]) -> Result<String> {
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            lines.push(format!(
                "SET {} {} EX {}",
                urlencoding::encode(item.key.as_str()),
                serde_json::to_string(&*item.value)?,
                ttl_secs(item.ttl)
            ));
        }
        Ok(lines.join("\n"))
    }

    /// DEL 요청 본문을 만듭니다.
    pub fn delete_body(keys: &[CacheKey]) -> String {
        keys.iter()
            .map(|key| format!("DEL {}", urlencoding::encode(key.as_str())))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// 쓰기 응답 본문에서 저장소 오류를 찾습니다.
fn write_error(body: &str) -> Option<String> {
    match serde_json::from_str::<Value>(body).ok()? {
        Value::Object(map) => match map.get("error")? {
            Value::Null => None,
            Value::String(error) => Some(error.clone()),
            other => Some(other.to_string()),
        },
        _ => None,
    }
}

#[async_trait]
impl RemoteStore for RemoteCacheClient {
    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &CacheKey) -> Result<Option<Value>> {
        let endpoint = self.endpoint()?;
        let request =
            FetchRequest::get(Self::url(endpoint, "get", Some(key))).bearer(&endpoint.token);

        // result는 저장된 값을 다시 JSON 인코딩한 문자열 (이중 인코딩)
        match self.call(request).await?.result {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(encoded)) => serde_json::from_str(&encoded).map(Some).map_err(|e| {
                CacheError::RemoteCacheUnavailable(format!("malformed stored value: {}", e))
            }),
            Some(other) => Ok(Some(other)),
        }
    }

    #[instrument(skip(self, value), fields(key = %key, ttl_secs = ttl.as_secs()))]
    async fn set(&self, key: &CacheKey, value: &Value, ttl: Duration) -> Result<()> {
        let endpoint = self.endpoint()?;
        let url = format!("{}?EX={}", Self::url(endpoint, "set", Some(key)), ttl_secs(ttl));
        let request = FetchRequest::post(url)
            .bearer(&endpoint.token)
            .json_body(serde_json::to_string(value)?);

        self.call_write(request).await?;
        Ok(())
    }

    #[instrument(skip(self, items), fields(count = items.len()))]
    async fn pipeline(&self, items: &[BatchItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let endpoint = self.endpoint()?;
        let request = FetchRequest::post(Self::url(endpoint, "pipeline", None))
            .bearer(&endpoint.token)
            .text_body(Self::pipeline_body(items)?);

        self.call_write(request).await?;
        debug!(count = items.len(), "원격 pipeline 쓰기 완료");
        Ok(())
    }

    #[instrument(skip(self, keys), fields(count = keys.len()))]
    async fn delete(&self, keys: &[CacheKey]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let endpoint = self.endpoint()?;
        let request = FetchRequest::post(Self::url(endpoint, "pipeline", None))
            .bearer(&endpoint.token)
            .text_body(Self::delete_body(keys));

        self.call_write(request).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<bool> {
        let endpoint = self.endpoint()?;
        let request = FetchRequest::get(Self::url(endpoint, "ping", None)).bearer(&endpoint.token);

        let response = self.call(request).await?;
        Ok(matches!(response.result, Some(Value::String(ref s)) if s == "PONG"))
    }
}
