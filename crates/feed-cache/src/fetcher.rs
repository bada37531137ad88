//! 재시도/타임아웃을 포함한 HTTP fetch.
//!
//! 각 시도는 `tokio::time::timeout`으로 제한되며, 시간 초과된 시도는 future가
//! drop되면서 요청이 취소되고 재시도 횟수에 포함됩니다. 재시도 간 지연은
//! 시도 횟수에 비례해 증가합니다 (`retry_delay * attempt`).

use crate::error::{CacheError, Result};
use feed_core::FetchConfig;
use reqwest::{header, Client, Method, Response};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// fetch 옵션.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// 시도당 타임아웃
    pub timeout: Duration,
    /// 최대 시도 횟수 (최소 1회)
    pub max_retries: u32,
    /// 재시도 기본 지연
    pub retry_delay: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl FetchOptions {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            timeout,
            max_retries,
            ..Default::default()
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

impl From<&FetchConfig> for FetchOptions {
    fn from(config: &FetchConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
        }
    }
}

/// 요청 본문.
#[derive(Debug, Clone)]
struct FetchBody {
    content: String,
    content_type: &'static str,
}

/// 재시도 가능한 요청 명세.
///
/// `reqwest::RequestBuilder`는 재사용할 수 없으므로 시도마다 이 명세로부터
/// 요청을 새로 만듭니다.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    method: Method,
    url: String,
    bearer: Option<String>,
    body: Option<FetchBody>,
}

impl FetchRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            bearer: None,
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// `Authorization: Bearer` 헤더를 설정합니다.
    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// `application/json` 본문을 설정합니다.
    pub fn json_body(mut self, content: impl Into<String>) -> Self {
        self.body = Some(FetchBody {
            content: content.into(),
            content_type: "application/json",
        });
        self
    }

    /// `text/plain` 본문을 설정합니다.
    pub fn text_body(mut self, content: impl Into<String>) -> Self {
        self.body = Some(FetchBody {
            content: content.into(),
            content_type: "text/plain",
        });
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }
}

/// 재시도 HTTP 클라이언트.
#[derive(Debug, Clone)]
pub struct RetryingFetcher {
    client: Client,
}

impl RetryingFetcher {
    /// 기본 HTTP 클라이언트로 생성합니다.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("feedcache/", env!("CARGO_PKG_VERSION")))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CacheError::Config(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        Ok(Self { client })
    }

    /// 기존 클라이언트를 사용합니다.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// 요청을 보내고 2xx 응답을 반환합니다.
    pub async fn send(&self, request: &FetchRequest, options: &FetchOptions) -> Result<Response> {
        self.execute(request, options, |response| async move { Ok(response) })
            .await
    }

    /// GET 요청 후 JSON 본문을 반환합니다. 본문 읽기도 시도 타임아웃에 포함됩니다.
    pub async fn get_json(&self, url: &str, options: &FetchOptions) -> Result<Value> {
        let request = FetchRequest::get(url);
        self.execute(&request, options, |response| async move {
            response
                .json::<Value>()
                .await
                .map_err(|e| format!("invalid JSON body: {}", e))
        })
        .await
    }

    /// 요청을 보내고 응답을 `read`로 처리합니다.
    ///
    /// 전송, 상태 코드 확인, `read`까지가 하나의 시도이며 모두 시도
    /// 타임아웃 안에서 실행됩니다. `read`의 실패도 재시도 대상입니다.
    pub async fn execute<T, F, Fut>(
        &self,
        request: &FetchRequest,
        options: &FetchOptions,
        read: F,
    ) -> Result<T>
    where
        F: Fn(Response) -> Fut,
        Fut: Future<Output = std::result::Result<T, String>>,
    {
        let attempts = options.attempts();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let outcome = tokio::time::timeout(options.timeout, async {
                let response = self.attempt(request).await?;
                read(response).await
            })
            .await;

            match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => last_error = e,
                Err(_) => {
                    last_error = format!("timed out after {}ms", options.timeout.as_millis())
                }
            }

            if attempt < attempts {
                debug!(
                    url = %request.url,
                    attempt = attempt,
                    max_retries = attempts,
                    error = %last_error,
                    "요청 실패, 재시도 예정"
                );
                tokio::time::sleep(options.retry_delay * attempt).await;
            }
        }

        warn!(
            url = %request.url,
            attempts = attempts,
            error = %last_error,
            "요청 최종 실패"
        );

        Err(CacheError::FetchExhausted {
            url: request.url.clone(),
            attempts,
            last_error,
        })
    }

    /// 단일 시도. 2xx가 아니면 실패로 취급합니다.
    async fn attempt(&self, request: &FetchRequest) -> std::result::Result<Response, String> {
        let mut builder = self.client.request(request.method.clone(), &request.url);

        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder
                .header(header::CONTENT_TYPE, body.content_type)
                .body(body.content.clone());
        }

        let response = builder.send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {}: {}", status, truncate(&text, 200)));
        }

        Ok(response)
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fast_options(max_retries: u32) -> FetchOptions {
        FetchOptions::new(Duration::from_millis(500), max_retries)
            .with_retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_get_json_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/coins")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"price": 42}"#)
            .expect(1)
            .create_async()
            .await;

        let fetcher = RetryingFetcher::new().unwrap();
        let value = fetcher
            .get_json(&format!("{}/coins", server.url()), &fast_options(3))
            .await
            .unwrap();

        assert_eq!(value, json!({"price": 42}));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_retries_until_exhausted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/flaky")
            .with_status(503)
            .with_body("upstream down")
            .expect(3)
            .create_async()
            .await;

        let fetcher = RetryingFetcher::new().unwrap();
        let err = fetcher
            .get_json(&format!("{}/flaky", server.url()), &fast_options(3))
            .await
            .unwrap_err();

        match err {
            CacheError::FetchExhausted {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("503"), "{}", last_error);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_zero_retries_still_attempts_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/once")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let fetcher = RetryingFetcher::new().unwrap();
        let err = fetcher
            .get_json(&format!("{}/once", server.url()), &fast_options(0))
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::FetchExhausted { attempts: 1, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_bearer_and_body_are_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/set")
            .match_header("authorization", "Bearer secret")
            .match_header("content-type", "text/plain")
            .match_body("SET a 1 EX 10")
            .with_status(200)
            .create_async()
            .await;

        let fetcher = RetryingFetcher::new().unwrap();
        let request = FetchRequest::post(format!("{}/set", server.url()))
            .bearer("secret")
            .text_body("SET a 1 EX 10");
        fetcher.send(&request, &fast_options(1)).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_timed_out_attempt_counts_toward_budget() {
        // 연결은 받지만 응답하지 않는 서버
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let fetcher = RetryingFetcher::new().unwrap();
        let options = FetchOptions::new(Duration::from_millis(50), 2)
            .with_retry_delay(Duration::from_millis(1));
        let err = fetcher
            .get_json(&format!("http://{}/slow", addr), &options)
            .await
            .unwrap_err();

        match err {
            CacheError::FetchExhausted {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("timed out"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("가나다라", 2), "가나");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
