//! feedcache 운영 도구.
//!
//! 이 crate는 다음 기능을 제공합니다:
//! - 캐시를 거친 업스트림 조회 (`get`)
//! - 키 무효화 (`invalidate`)
//! - 원격 저장소/로컬 캐시 상태 점검 (`health`)

pub mod commands;

use anyhow::{Context, Result};
use feed_core::FeedConfig;
use std::path::Path;

/// 설정 파일이 주어지면 파일 + 환경 변수로, 아니면 환경 변수로만 설정을 읽습니다.
pub fn load_config(path: Option<&Path>) -> Result<FeedConfig> {
    let config = match path {
        Some(path) => FeedConfig::load(path)
            .with_context(|| format!("설정 파일 로드 실패: {}", path.display()))?,
        None => FeedConfig::from_env().context("환경 변수 설정 로드 실패")?,
    };
    config.validate()?;
    Ok(config)
}
