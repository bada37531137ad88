//! REST 원격 클라이언트를 연결한 전체 경로 테스트.

use feed_cache::{producer, CacheService, RemoteCacheClient, RemoteStore};
use feed_core::{CacheKey, FeedConfig};
use mockito::Matcher;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn config(url: &str) -> FeedConfig {
    let mut config = FeedConfig::default();
    config.remote.url = Some(url.to_string());
    config.remote.token = Some("secret".to_string());
    config.remote.timeout_ms = 500;
    config
}

#[tokio::test]
async fn test_remote_hit_is_served_without_producer() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", Matcher::Regex(r"^/get/".to_string()))
        .match_header("authorization", "Bearer secret")
        .with_status(200)
        .with_body(r#"{"result": "[\"btc\",\"eth\"]"}"#)
        .create_async()
        .await;

    let service = CacheService::from_config(&config(&server.url())).unwrap();
    let value = service
        .get_or_populate(
            &CacheKey::new("allCryptos"),
            producer(|| async { Err(anyhow::anyhow!("must not be called")) }),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

    assert_eq!(*value, json!(["btc", "eth"]));
}

#[tokio::test]
async fn test_failing_remote_still_serves_producer_value() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", Matcher::Regex(r"^/get/".to_string()))
        .with_status(503)
        .create_async()
        .await;
    let write = server
        .mock("POST", Matcher::Regex(r"^/set/".to_string()))
        .match_query(Matcher::UrlEncoded("EX".to_string(), "60".to_string()))
        .with_status(200)
        .with_body(r#"{"result": "OK"}"#)
        .expect(1)
        .create_async()
        .await;

    let service = CacheService::from_config(&config(&server.url())).unwrap();
    let value = service
        .get_or_populate(
            &CacheKey::new("news"),
            producer(|| async { Ok(json!({"headline": "ok"})) }),
            Duration::from_secs(60),
        )
        .await
        .unwrap();
    service.drain().await;

    assert_eq!(*value, json!({"headline": "ok"}));
    write.assert_async().await;
}

#[tokio::test]
async fn test_unconfigured_remote_degrades_to_local_only() {
    let service = CacheService::from_config(&FeedConfig::default()).unwrap();
    let key = CacheKey::new("offline");

    let value = service
        .get_or_populate(
            &key,
            producer(|| async { Ok(json!(1)) }),
            Duration::from_secs(60),
        )
        .await
        .unwrap();
    service.shutdown().await;

    assert_eq!(*value, json!(1));
    assert!(service.local().get(&key).is_some());

    let client: Arc<dyn RemoteStore> =
        Arc::new(RemoteCacheClient::new(&FeedConfig::default().remote).unwrap());
    assert!(client.ping().await.is_err());
}

#[tokio::test]
async fn test_connect_without_redis_url_uses_rest_client() {
    let mut server = mockito::Server::new_async().await;
    let read = server
        .mock("GET", Matcher::Regex(r"^/get/".to_string()))
        .with_status(200)
        .with_body(r#"{"result": "42"}"#)
        .expect(1)
        .create_async()
        .await;

    let service = CacheService::connect(&config(&server.url())).await.unwrap();
    let value = service
        .resolve(feed_cache::CacheRequest::LookupOnly {
            key: CacheKey::new("block_height"),
        })
        .await
        .unwrap();

    assert_eq!(value.as_deref(), Some(&json!(42)));
    read.assert_async().await;
}

#[tokio::test]
async fn test_connect_with_unreachable_redis_url_fails() {
    let mut config = FeedConfig::default();
    config.remote.redis_url = Some("redis://127.0.0.1:1/0".to_string());
    config.remote.timeout_ms = 500;

    let err = CacheService::connect(&config).await.err().unwrap();
    assert!(err.is_remote(), "{:?}", err);
}
