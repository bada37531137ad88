//! 캐시 키 네임스페이스.
//!
//! 원격 저장소를 다른 시스템과 공유하므로 모든 키는 고정 접두사를 가진 채로
//! 두 캐시 계층에 저장됩니다.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// 모든 캐시 키에 붙는 네임스페이스 접두사.
pub const KEY_PREFIX: &str = "feedcache:";

/// 네임스페이스가 적용된 캐시 키.
///
/// 논리 이름(예: `"allCryptos"`)이나 요청 파라미터로부터 생성되며,
/// 내부적으로는 항상 [`KEY_PREFIX`]가 붙은 전체 문자열을 보관합니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// 논리 이름으로 키를 생성합니다. 이미 접두사가 있으면 그대로 사용합니다.
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        if name.starts_with(KEY_PREFIX) {
            Self(name.to_string())
        } else {
            Self(format!("{}{}", KEY_PREFIX, name))
        }
    }

    /// 이름과 쿼리 파라미터로 키를 생성합니다.
    ///
    /// 파라미터는 이름순으로 정렬되어 같은 요청은 항상 같은 키가 됩니다.
    /// 이름과 값은 URL 인코딩되므로 `:`이나 `=`를 포함해도 다른 요청과
    /// 키가 겹치지 않습니다.
    ///
    /// ```
    /// use feed_core::CacheKey;
    ///
    /// let key = CacheKey::with_params("coin_chart", &[("id", "btc"), ("days", "30")]);
    /// assert_eq!(key.as_str(), "feedcache:coin_chart:days=30:id=btc");
    /// ```
    pub fn with_params(name: &str, params: &[(&str, &str)]) -> Self {
        let mut sorted: Vec<&(&str, &str)> = params.iter().collect();
        sorted.sort();

        let mut key = name.to_string();
        for (k, v) in sorted {
            key.push(':');
            key.push_str(&urlencoding::encode(k));
            key.push('=');
            key.push_str(&urlencoding::encode(v));
        }
        Self::new(key)
    }

    /// 접두사를 포함한 전체 키.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 접두사를 제외한 논리 이름.
    pub fn logical_name(&self) -> &str {
        self.0.strip_prefix(KEY_PREFIX).unwrap_or(&self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for CacheKey {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}
