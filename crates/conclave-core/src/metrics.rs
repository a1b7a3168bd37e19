use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-wide counters. Lives as a field on the top-level application
/// state and is passed by reference — never a global.
#[derive(Debug, Default)]
pub struct Metrics {
    pub messages_enqueued: AtomicU64,
    pub messages_dropped: AtomicU64,
    pub observations_started: AtomicU64,
    pub participations: AtomicU64,
    pub provider_calls: AtomicU64,
    pub provider_retries: AtomicU64,
    pub provider_failures: AtomicU64,
    pub intent_routes: AtomicU64,
    pub skill_executions: AtomicU64,
    pub memory_saves: AtomicU64,
    pub memory_conflicts: AtomicU64,
    pub requests_total: AtomicU64,
    pub requests_rate_limited: AtomicU64,
    pub ws_connections: AtomicU64,
}

/// Point-in-time copy of every counter, serialized into `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub messages_enqueued: u64,
    pub messages_dropped: u64,
    pub observations_started: u64,
    pub participations: u64,
    pub provider_calls: u64,
    pub provider_retries: u64,
    pub provider_failures: u64,
    pub intent_routes: u64,
    pub skill_executions: u64,
    pub memory_saves: u64,
    pub memory_conflicts: u64,
    pub requests_total: u64,
    pub requests_rate_limited: u64,
    pub ws_connections: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_enqueued: self.messages_enqueued.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            observations_started: self.observations_started.load(Ordering::Relaxed),
            participations: self.participations.load(Ordering::Relaxed),
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
            provider_retries: self.provider_retries.load(Ordering::Relaxed),
            provider_failures: self.provider_failures.load(Ordering::Relaxed),
            intent_routes: self.intent_routes.load(Ordering::Relaxed),
            skill_executions: self.skill_executions.load(Ordering::Relaxed),
            memory_saves: self.memory_saves.load(Ordering::Relaxed),
            memory_conflicts: self.memory_conflicts.load(Ordering::Relaxed),
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_rate_limited: self.requests_rate_limited.load(Ordering::Relaxed),
            ws_connections: self.ws_connections.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let metrics = Metrics::new();
        Metrics::incr(&metrics.messages_enqueued);
        Metrics::incr(&metrics.messages_enqueued);
        Metrics::incr(&metrics.messages_dropped);

        let snap = metrics.snapshot();
        assert_eq!(snap.messages_enqueued, 2);
        assert_eq!(snap.messages_dropped, 1);
        assert_eq!(snap.provider_calls, 0);
    }
}
