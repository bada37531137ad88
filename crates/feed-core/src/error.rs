//! 설정/초기화 단계의 에러 타입.

use thiserror::Error;

/// 코어 설정 에러.
#[derive(Debug, Error)]
pub enum CoreError {
    /// 설정 로드/파싱 에러
    #[error("설정 에러: {0}")]
    Config(String),

    /// 잘못된 설정 값
    #[error("잘못된 설정 값 ({field}): {message}")]
    InvalidValue { field: &'static str, message: String },
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::Config(err.to_string())
    }
}

/// 코어 작업을 위한 Result 타입.
pub type CoreResult<T> = Result<T, CoreError>;
