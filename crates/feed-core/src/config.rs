//! 설정 관리.
//!
//! 캐시 계층 전반의 설정을 정의합니다. 설정은 기본값 → 파일 → 환경 변수
//! 순서로 덮어씁니다. 원격 저장소 URL/토큰이 없으면 원격 캐시는
//! "영구적으로 사용 불가" 상태로 동작하며 에러로 취급하지 않습니다.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 전체 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FeedConfig {
    /// 원격 KV 저장소 설정
    #[serde(default)]
    pub remote: RemoteConfig,
    /// 프로세스 로컬 캐시 설정
    #[serde(default)]
    pub local: LocalConfig,
    /// 백그라운드 갱신 설정
    #[serde(default)]
    pub refresh: RefreshConfig,
    /// 업스트림 fetch 기본값
    #[serde(default)]
    pub fetch: FetchConfig,
    /// 로깅 설정
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 원격 KV 저장소 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    /// REST 기본 URL (예: https://kv.example.com)
    #[serde(default)]
    pub url: Option<String>,
    /// Bearer 토큰
    #[serde(default)]
    pub token: Option<String>,
    /// Redis 연결 URL (예: redis://127.0.0.1:6379). 지정하면 REST 대신 사용합니다.
    #[serde(default)]
    pub redis_url: Option<String>,
    /// 요청 시도당 타임아웃 (밀리초)
    #[serde(default = "default_remote_timeout_ms")]
    pub timeout_ms: u64,
    /// 최대 시도 횟수
    #[serde(default = "default_remote_max_retries")]
    pub max_retries: u32,
    /// 원격에서 읽어 로컬로 복사할 때 사용하는 TTL (초)
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

fn default_remote_timeout_ms() -> u64 {
    2500
}
fn default_remote_max_retries() -> u32 {
    2
}
fn default_ttl_secs() -> u64 {
    300 // 5 minutes
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            redis_url: None,
            timeout_ms: default_remote_timeout_ms(),
            max_retries: default_remote_max_retries(),
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

impl RemoteConfig {
    /// URL과 토큰이 모두 설정되어 있는지 확인합니다.
    pub fn is_configured(&self) -> bool {
        matches!((&self.url, &self.token), (Some(u), Some(t)) if !u.is_empty() && !t.is_empty())
    }

    /// 시도당 타임아웃.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// 기본 TTL.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// 로컬 캐시 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocalConfig {
    /// 최대 항목 수
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_max_entries() -> usize {
    10_000
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

/// 백그라운드 갱신 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RefreshConfig {
    /// 갱신 시작 전 지연 (밀리초)
    #[serde(default = "default_refresh_delay_ms")]
    pub delay_ms: u64,
    /// 남은 수명 비율이 이 값 미만이면 갱신 (0.0 ~ 1.0)
    #[serde(default = "default_refresh_threshold")]
    pub threshold: f64,
}

fn default_refresh_delay_ms() -> u64 {
    100
}
fn default_refresh_threshold() -> f64 {
    0.5
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_refresh_delay_ms(),
            threshold: default_refresh_threshold(),
        }
    }
}

impl RefreshConfig {
    /// 갱신 지연.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// 업스트림 fetch 기본값.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    /// 시도당 타임아웃 (밀리초)
    #[serde(default = "default_fetch_timeout_ms")]
    pub timeout_ms: u64,
    /// 최대 시도 횟수
    #[serde(default = "default_fetch_max_retries")]
    pub max_retries: u32,
    /// 재시도 간 기본 지연 (밀리초, 시도 횟수에 비례해 증가)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}
fn default_fetch_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    500
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_fetch_timeout_ms(),
            max_retries: default_fetch_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl FetchConfig {
    /// 시도당 타임아웃.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// 재시도 기본 지연.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl FeedConfig {
    /// 파일과 환경 변수에서 설정을 로드합니다.
    ///
    /// 환경 변수는 `FEEDCACHE__REMOTE__URL` 처럼 `__` 로 섹션을 구분합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("FEEDCACHE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn from_toml_str(toml: &str) -> CoreResult<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;

        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// 환경 변수에서 설정을 생성합니다 (`.env` 파일 포함).
    pub fn from_env() -> CoreResult<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let loaded = Self {
            remote: RemoteConfig {
                url: env_var_opt("FEEDCACHE_REMOTE_URL"),
                token: env_var_opt("FEEDCACHE_REMOTE_TOKEN"),
                redis_url: env_var_opt("FEEDCACHE_REMOTE_REDIS_URL"),
                timeout_ms: env_var_parse("FEEDCACHE_REMOTE_TIMEOUT_MS", defaults.remote.timeout_ms),
                max_retries: env_var_parse(
                    "FEEDCACHE_REMOTE_MAX_RETRIES",
                    defaults.remote.max_retries,
                ),
                default_ttl_secs: env_var_parse(
                    "FEEDCACHE_DEFAULT_TTL_SECS",
                    defaults.remote.default_ttl_secs,
                ),
            },
            local: LocalConfig {
                max_entries: env_var_parse("FEEDCACHE_LOCAL_MAX_ENTRIES", defaults.local.max_entries),
            },
            refresh: RefreshConfig {
                delay_ms: env_var_parse("FEEDCACHE_REFRESH_DELAY_MS", defaults.refresh.delay_ms),
                threshold: env_var_parse("FEEDCACHE_REFRESH_THRESHOLD", defaults.refresh.threshold),
            },
            fetch: FetchConfig {
                timeout_ms: env_var_parse("FEEDCACHE_FETCH_TIMEOUT_MS", defaults.fetch.timeout_ms),
                max_retries: env_var_parse("FEEDCACHE_FETCH_MAX_RETRIES", defaults.fetch.max_retries),
                retry_delay_ms: env_var_parse(
                    "FEEDCACHE_FETCH_RETRY_DELAY_MS",
                    defaults.fetch.retry_delay_ms,
                ),
            },
            logging: LoggingConfig {
                level: std::env::var("RUST_LOG").unwrap_or(defaults.logging.level),
                format: std::env::var("LOG_FORMAT").unwrap_or(defaults.logging.format),
            },
        };

        loaded.validate()?;
        Ok(loaded)
    }

    /// 값 범위를 검증합니다.
    pub fn validate(&self) -> CoreResult<()> {
        if !(0.0..=1.0).contains(&self.refresh.threshold) {
            return Err(CoreError::InvalidValue {
                field: "refresh.threshold",
                message: format!("0.0 ~ 1.0 범위여야 합니다: {}", self.refresh.threshold),
            });
        }
        if self.local.max_entries == 0 {
            return Err(CoreError::InvalidValue {
                field: "local.max_entries",
                message: "0보다 커야 합니다".to_string(),
            });
        }
        Ok(())
    }
}

/// 환경변수에서 값을 파싱 (실패 시 기본값 사용)
fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// 비어 있지 않은 환경변수 값
fn env_var_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
