//! 캐시를 거친 업스트림 조회.

use anyhow::{anyhow, Context, Result};
use feed_cache::{producer, CacheService, FetchOptions, RetryingFetcher};
use feed_core::{CacheKey, FeedConfig};
use reqwest::Url;
use std::time::Duration;
use tracing::info;

/// 조회 설정.
#[derive(Debug)]
pub struct GetConfig {
    /// 논리 키 이름
    pub key: String,
    /// 업스트림 URL
    pub url: String,
    /// TTL (초, 기본: remote.default_ttl_secs)
    pub ttl_secs: Option<u64>,
    /// 키 fingerprint와 쿼리 문자열에 쓰이는 파라미터
    pub params: Vec<(String, String)>,
}

/// `k=v` 형식의 파라미터를 파싱합니다.
pub fn parse_param(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid param: {}. Use: name=value", raw))?;
    if name.is_empty() {
        return Err(anyhow!("Invalid param: {}. Name must not be empty", raw));
    }
    Ok((name.to_string(), value.to_string()))
}

/// 캐시 키를 만듭니다.
pub fn cache_key(config: &GetConfig) -> CacheKey {
    let params: Vec<(&str, &str)> = config
        .params
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    CacheKey::with_params(&config.key, &params)
}

/// 업스트림 URL에 파라미터를 쿼리 문자열로 붙입니다.
pub fn upstream_url(config: &GetConfig) -> Result<Url> {
    let url = if config.params.is_empty() {
        Url::parse(&config.url)
    } else {
        Url::parse_with_params(&config.url, &config.params)
    };
    url.with_context(|| format!("Invalid url: {}", config.url))
}

/// 캐시에서 값을 조회하고, 없으면 업스트림에서 가져옵니다.
pub async fn get(service: &CacheService, feed: &FeedConfig, config: GetConfig) -> Result<String> {
    let key = cache_key(&config);
    let url = upstream_url(&config)?.to_string();
    let ttl = config
        .ttl_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| feed.remote.default_ttl());

    let fetcher = RetryingFetcher::new()?;
    let options = FetchOptions::from(&feed.fetch);
    let upstream = producer(move || {
        let fetcher = fetcher.clone();
        let url = url.clone();
        async move { Ok(fetcher.get_json(&url, &options).await?) }
    });

    info!(key = %key, ttl_secs = ttl.as_secs(), "캐시 조회");
    let value = service.get_or_populate(&key, upstream, ttl).await?;

    Ok(serde_json::to_string_pretty(&*value)?)
}
