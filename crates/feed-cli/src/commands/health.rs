//! 캐시 상태 점검.

use feed_cache::{CacheService, LocalCacheStats};
use serde::Serialize;
use tracing::warn;

/// 상태 점검 결과.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    /// 원격 저장소 응답 여부
    pub remote_ok: bool,
    /// 원격 저장소 오류 메시지
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_error: Option<String>,
    /// 진행 중인 채우기 작업 수
    pub pending: usize,
    /// 로컬 캐시 통계
    pub local: LocalCacheStats,
}

/// 원격 저장소를 ping하고 로컬 상태를 수집합니다.
pub async fn health(service: &CacheService) -> HealthReport {
    let (remote_ok, remote_error) = match service.remote().ping().await {
        Ok(ok) => (ok, None),
        Err(e) => {
            warn!(error = %e, "원격 캐시 상태 점검 실패");
            (false, Some(e.to_string()))
        }
    };

    HealthReport {
        remote_ok,
        remote_error,
        pending: service.pending_count(),
        local: service.local_stats(),
    }
}
