//! 캐시 이벤트 관측 훅.
//!
//! 조회 경로의 모든 분기(히트/미스/병합/fallback/실패)와 백그라운드 작업의
//! 결과는 서로 구분되는 [`CacheEvent`]로 보고됩니다. 기본 구현은
//! Prometheus 호환 `metrics` 카운터와 `tracing` 이벤트를 함께 남깁니다.

use metrics::counter;
use parking_lot::Mutex;
use std::fmt;

/// 캐시 이벤트 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheEvent {
    /// 로컬 캐시 히트
    LocalHit,
    /// 로컬 캐시 히트 + 백그라운드 갱신 예약
    LocalHitRefresh,
    /// 진행 중인 채우기 작업에 합류
    Coalesced,
    /// 원격 캐시 히트
    RemoteHit,
    /// 원격 캐시 미스
    RemoteMiss,
    /// 원격 캐시 사용 불가 (흡수됨)
    RemoteUnavailable,
    /// producer 성공
    ProducerSuccess,
    /// producer 실패
    ProducerFailed,
    /// 만료된 로컬 데이터로 응답
    StaleFallback,
    /// 사용할 데이터 없음 (호출자에게 에러 전파)
    NoFallback,
    /// 조회 전용 요청이 아무 데이터도 찾지 못함
    LookupMiss,
    /// 백그라운드 갱신 예약
    RefreshScheduled,
    /// 백그라운드 갱신 생략 (이미 예약/진행 중)
    RefreshSkipped,
    /// 백그라운드 갱신 성공
    RefreshSucceeded,
    /// 백그라운드 갱신 실패
    RefreshFailed,
    /// 배치 flush 성공
    BatchFlushed,
    /// 배치 flush 실패
    BatchFlushFailed,
    /// 명시적 무효화
    Invalidated,
}

impl CacheEvent {
    /// 메트릭 라벨 값.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheEvent::LocalHit => "local_hit",
            CacheEvent::LocalHitRefresh => "local_hit_refresh",
            CacheEvent::Coalesced => "coalesced",
            CacheEvent::RemoteHit => "remote_hit",
            CacheEvent::RemoteMiss => "remote_miss",
            CacheEvent::RemoteUnavailable => "remote_unavailable",
            CacheEvent::ProducerSuccess => "producer_success",
            CacheEvent::ProducerFailed => "producer_failed",
            CacheEvent::StaleFallback => "stale_fallback",
            CacheEvent::NoFallback => "no_fallback",
            CacheEvent::LookupMiss => "lookup_miss",
            CacheEvent::RefreshScheduled => "refresh_scheduled",
            CacheEvent::RefreshSkipped => "refresh_skipped",
            CacheEvent::RefreshSucceeded => "refresh_succeeded",
            CacheEvent::RefreshFailed => "refresh_failed",
            CacheEvent::BatchFlushed => "batch_flushed",
            CacheEvent::BatchFlushFailed => "batch_flush_failed",
            CacheEvent::Invalidated => "invalidated",
        }
    }
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 캐시 이벤트 수신자.
pub trait EventSink: Send + Sync {
    /// 이벤트를 기록합니다. 호출 경로를 막지 않아야 합니다.
    fn record(&self, event: CacheEvent, key: &str);
}

/// `metrics` 카운터 + `tracing` 이벤트로 기록하는 기본 수신자.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsEventSink;

impl EventSink for MetricsEventSink {
    fn record(&self, event: CacheEvent, key: &str) {
        counter!("feedcache_events_total", "event" => event.as_str()).increment(1);
        tracing::debug!(event = event.as_str(), key = key, "cache event");
    }
}

/// 이벤트를 메모리에 보관하는 수신자 (테스트/진단용).
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<(CacheEvent, String)>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 기록된 이벤트 목록.
    pub fn events(&self) -> Vec<(CacheEvent, String)> {
        self.events.lock().clone()
    }

    /// 특정 이벤트 발생 횟수.
    pub fn count(&self, event: CacheEvent) -> usize {
        self.events.lock().iter().filter(|(e, _)| *e == event).count()
    }
}

impl EventSink for RecordingEventSink {
    fn record(&self, event: CacheEvent, key: &str) {
        self.events.lock().push((event, key.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_labels_are_distinct() {
        let all = [
            CacheEvent::LocalHit,
            CacheEvent::LocalHitRefresh,
            CacheEvent::Coalesced,
            CacheEvent::RemoteHit,
            CacheEvent::RemoteMiss,
            CacheEvent::RemoteUnavailable,
            CacheEvent::ProducerSuccess,
            CacheEvent::ProducerFailed,
            CacheEvent::StaleFallback,
            CacheEvent::NoFallback,
            CacheEvent::LookupMiss,
            CacheEvent::RefreshScheduled,
            CacheEvent::RefreshSkipped,
            CacheEvent::RefreshSucceeded,
            CacheEvent::RefreshFailed,
            CacheEvent::BatchFlushed,
            CacheEvent::BatchFlushFailed,
            CacheEvent::Invalidated,
        ];
        let labels: std::collections::HashSet<_> = all.iter().map(|e| e.as_str()).collect();
        assert_eq!(labels.len(), all.len());
    }

    #[test]
    fn test_recording_sink_counts() {
        let sink = RecordingEventSink::new();
        sink.record(CacheEvent::LocalHit, "feedcache:a");
        sink.record(CacheEvent::LocalHit, "feedcache:b");
        sink.record(CacheEvent::RemoteMiss, "feedcache:a");

        assert_eq!(sink.count(CacheEvent::LocalHit), 2);
        assert_eq!(sink.count(CacheEvent::RemoteMiss), 1);
        assert_eq!(sink.events()[2].1, "feedcache:a");
    }
}
