//! 키 무효화.

use feed_cache::CacheService;
use feed_core::CacheKey;
use tracing::info;

/// 두 계층에서 키들을 삭제하고 로컬에서 삭제된 항목 수를 반환합니다.
pub async fn invalidate(service: &CacheService, names: &[String]) -> usize {
    let keys: Vec<CacheKey> = names.iter().map(CacheKey::new).collect();
    let removed = service.invalidate(&keys).await;
    info!(requested = keys.len(), removed = removed, "캐시 무효화 완료");
    removed
}
