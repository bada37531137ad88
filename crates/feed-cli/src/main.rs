//! feedcache CLI.
//!
//! # 사용 예시
//!
//! ```bash
//! # BTC 30일 차트 조회 (캐시 미스 시 업스트림 호출)
//! feedcache get -k coin_chart -u https://api.example.com/coins/bitcoin/market_chart \
//!     -p vs_currency=usd -p days=30 --ttl 300
//!
//! # 키 무효화
//! feedcache invalidate allCryptos coin_chart:days=30:id=btc
//!
//! # 상태 점검
//! feedcache --config config/feedcache.toml health
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use feed_cache::CacheService;
use feed_cli::commands::get::{get, parse_param, GetConfig};
use feed_cli::commands::health::health;
use feed_cli::commands::invalidate::invalidate;
use feed_cli::load_config;
use feed_core::{init_logging, LogConfig};
use std::path::PathBuf;
use tracing::error;

#[derive(Parser)]
#[command(name = "feedcache")]
#[command(about = "feedcache CLI - 업스트림 피드용 2계층 캐시 운영 도구", long_about = None)]
#[command(version)]
struct Cli {
    /// 설정 파일 (지정하지 않으면 환경 변수 사용)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 캐시를 거쳐 업스트림 JSON 조회
    Get {
        /// 논리 키 이름 (예: allCryptos, coin_chart)
        #[arg(short, long)]
        key: String,

        /// 업스트림 URL
        #[arg(short, long)]
        url: String,

        /// TTL (초, 기본: 설정의 remote.default_ttl_secs)
        #[arg(long)]
        ttl: Option<u64>,

        /// 요청 파라미터 (name=value, 여러 번 지정 가능)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },

    /// 로컬/원격 캐시에서 키 삭제
    Invalidate {
        /// 삭제할 키 (접두사 생략 가능)
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// 원격 저장소 및 로컬 캐시 상태 확인
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_logging(LogConfig::from(&config.logging))
        .map_err(|e| anyhow::anyhow!("로깅 초기화 실패: {}", e))?;

    let service = CacheService::connect(&config).await?;

    let outcome = match cli.command {
        Commands::Get {
            key,
            url,
            ttl,
            params,
        } => {
            let request = GetConfig {
                key,
                url,
                ttl_secs: ttl,
                params,
            };
            get(&service, &config, request).await.map(|json| {
                println!("{}", json);
            })
        }

        Commands::Invalidate { keys } => {
            let removed = invalidate(&service, &keys).await;
            println!("무효화 완료: {}개 요청, 로컬에서 {}개 삭제", keys.len(), removed);
            Ok(())
        }

        Commands::Health => {
            let report = health(&service).await;
            serde_json::to_string_pretty(&report)
                .map(|json| println!("{}", json))
                .map_err(Into::into)
        }
    };

    // 원격 쓰기 등 백그라운드 작업 정리
    service.shutdown().await;

    if let Err(e) = &outcome {
        error!("명령 실패: {:#}", e);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_get_with_params() {
        let cli = Cli::try_parse_from([
            "feedcache",
            "get",
            "-k",
            "coin_chart",
            "-u",
            "https://api.example.com/chart",
            "-p",
            "id=btc",
            "--param",
            "days=30",
        ])
        .unwrap();

        match cli.command {
            Commands::Get { key, params, ttl, .. } => {
                assert_eq!(key, "coin_chart");
                assert_eq!(params.len(), 2);
                assert_eq!(ttl, None);
            }
            _ => panic!("expected get"),
        }
    }

    #[test]
    fn test_invalidate_requires_keys() {
        assert!(Cli::try_parse_from(["feedcache", "invalidate"]).is_err());
    }
}
