//! # Feed Core
//!
//! feedcache 워크스페이스 전반에서 공유하는 기본 구성 요소를 제공합니다:
//! - 설정 관리 (파일 + 환경 변수)
//! - 로깅 인프라
//! - 캐시 키 네임스페이스

pub mod config;
pub mod error;
pub mod key;
pub mod logging;

pub use config::*;
pub use error::*;
pub use key::{CacheKey, KEY_PREFIX};
pub use logging::*;
