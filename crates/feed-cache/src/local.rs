//! 프로세스 로컬 TTL 캐시.
//!
//! 네트워크 없이 동작하는 짧은 수명의 가속 계층입니다. 만료된 항목은
//! 읽을 때 "없음"으로 취급될 뿐 즉시 삭제되지 않으므로, 업스트림이 모두
//! 실패한 경우 [`LocalCache::get_even_if_expired`]로 stale 데이터를 제공할 수
//! 있습니다.

use chrono::{DateTime, Utc};
use feed_core::CacheKey;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// 캐시에 보관되는 값. 읽을 때마다 JSON 트리를 복제하지 않도록 공유합니다.
pub type CachedValue = Arc<Value>;

/// 캐시 항목.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// 저장된 값
    pub value: CachedValue,
    /// 저장 시각
    pub stored_at: DateTime<Utc>,
    /// 저장 시 지정된 TTL
    pub ttl: Duration,
    /// 만료 시점 (monotonic)
    pub expires_at: Instant,
    lifetime: Duration,
}

impl CacheEntry {
    fn new(value: CachedValue, ttl: Duration) -> Self {
        let now = Instant::now();
        let expires_at = expiry_after(now, ttl);
        Self {
            value,
            stored_at: Utc::now(),
            ttl,
            expires_at,
            lifetime: expires_at.saturating_duration_since(now),
        }
    }

    /// 만료 여부.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// 남은 수명 / 원래 TTL (0.0 ~ 1.0).
    pub fn remaining_ratio(&self, now: Instant) -> f64 {
        // 잘린 TTL은 실제 수명 기준으로 계산
        if self.lifetime.is_zero() {
            return 0.0;
        }
        let remaining = self.expires_at.saturating_duration_since(now);
        remaining.as_secs_f64() / self.lifetime.as_secs_f64()
    }
}

/// `Instant`가 표현할 수 있는 범위를 넘는 TTL은 사실상 만료되지 않는 것으로 봅니다.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn expiry_after(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// 만료되지 않은 로컬 히트.
#[derive(Debug, Clone)]
pub struct FreshHit {
    pub value: CachedValue,
    pub remaining_ratio: f64,
}

/// 로컬 캐시 통계.
#[derive(Debug, Default, Clone, Serialize)]
pub struct LocalCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub stale_reads: u64,
    pub hit_rate: f64,
}

/// 프로세스 로컬 TTL 캐시.
#[derive(Debug)]
pub struct LocalCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    stale_reads: AtomicU64,
}

impl LocalCache {
    /// 최대 항목 수를 지정해 생성합니다.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale_reads: AtomicU64::new(0),
        }
    }

    /// 만료되지 않은 값과 남은 수명 비율을 함께 조회합니다.
    pub fn get_fresh(&self, key: &CacheKey) -> Option<FreshHit> {
        let now = Instant::now();
        let entries = self.entries.read();

        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(FreshHit {
                    value: Arc::clone(&entry.value),
                    remaining_ratio: entry.remaining_ratio(now),
                })
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// 만료되지 않은 값을 조회합니다.
    pub fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        self.get_fresh(key).map(|hit| hit.value)
    }

    /// 만료 여부와 관계없이 값을 조회합니다 (graceful degradation 용).
    pub fn get_even_if_expired(&self, key: &CacheKey) -> Option<CachedValue> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;

        if entry.is_expired(Instant::now()) {
            self.stale_reads.fetch_add(1, Ordering::Relaxed);
        }
        Some(Arc::clone(&entry.value))
    }

    /// 항목 전체를 조회합니다 (만료 포함).
    pub fn entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.read().get(key).cloned()
    }

    /// 만료 시점을 조회합니다.
    pub fn expiry(&self, key: &CacheKey) -> Option<Instant> {
        self.entries.read().get(key).map(|entry| entry.expires_at)
    }

    /// 남은 수명 비율. 만료된 항목은 0.0입니다.
    pub fn remaining_ratio(&self, key: &CacheKey) -> Option<f64> {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .map(|entry| entry.remaining_ratio(now))
    }

    /// 값을 저장합니다. 같은 키의 기존 항목은 덮어씁니다.
    pub fn set(&self, key: &CacheKey, value: CachedValue, ttl: Duration) {
        let mut entries = self.entries.write();

        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            let now = Instant::now();
            entries.retain(|_, entry| !entry.is_expired(now));

            if entries.len() >= self.max_entries {
                let victim = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(victim) = victim {
                    debug!(key = %victim, "로컬 캐시 용량 초과, 가장 먼저 만료될 항목 제거");
                    entries.remove(&victim);
                }
            }
        }

        entries.insert(key.clone(), CacheEntry::new(value, ttl));
    }

    /// 키들을 삭제하고 삭제된 개수를 반환합니다.
    pub fn remove(&self, keys: &[CacheKey]) -> usize {
        let mut entries = self.entries.write();
        keys.iter().filter(|key| entries.remove(*key).is_some()).count()
    }

    /// 만료된 항목을 정리하고 정리된 개수를 반환합니다.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// 통계를 가져옵니다.
    pub fn stats(&self) -> LocalCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };

        LocalCacheStats {
            entries: self.len(),
            hits,
            misses,
            stale_reads: self.stale_reads.load(Ordering::Relaxed),
            hit_rate,
        }
    }
}
