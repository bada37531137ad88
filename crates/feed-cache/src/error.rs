//! 캐시 계층 오류 타입.

use thiserror::Error;

/// 캐시 관련 오류.
///
/// 병합(coalescing)된 모든 대기자가 같은 결과를 받아야 하므로 `Clone`을
/// 구현하며, 원인은 문자열로 보관합니다.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// 원격 저장소와의 통신 실패 (네트워크, 타임아웃, 2xx 아닌 응답, 미설정)
    #[error("Remote cache unavailable: {0}")]
    RemoteCacheUnavailable(String),

    /// 재시도 횟수 소진
    #[error("Fetch exhausted after {attempts} attempt(s) ({url}): {last_error}")]
    FetchExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    /// 호출자가 제공한 producer 실패
    #[error("Producer failed: {0}")]
    ProducerFailed(String),

    /// 모든 계층이 실패했고 사용할 stale 데이터도 없음
    #[error("No fallback available for {key}: {reason}")]
    NoFallbackAvailable { key: String, reason: String },

    /// 직렬화/역직렬화 오류
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 설정 오류
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// 원격 저장소 계층의 오류인지 확인합니다.
    pub fn is_remote(&self) -> bool {
        matches!(self, CacheError::RemoteCacheUnavailable(_))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::RemoteCacheUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
