//! Metrics collection and registry.

use crate::printing::PrintStats;
use crate::session::{SessionState, SessionStats};
use crate::storage::StorageStats;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of booth state for metrics update.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Current session state.
    pub session_state: SessionState,
    pub sessions_started: u64,
    pub retakes: u64,
    pub photos_committed: u64,
    pub sessions_cancelled: u64,
    pub capture_failures: u64,
    pub compose_failures: u64,
    /// Photos currently stored locally.
    pub stored_photos: usize,
    /// Stored photos not yet mirrored to the sync target.
    pub unsynced_photos: usize,
    pub evictions: u64,
    pub print_jobs_submitted: usize,
    pub print_jobs_completed: usize,
    pub print_jobs_failed: usize,
}

/// Prometheus metrics registry for the booth.
pub struct MetricsRegistry {
    registry: Registry,

    // Session metrics
    session_state: IntGauge,
    sessions_started: IntCounter,
    retakes: IntCounter,
    photos_committed: IntCounter,
    sessions_cancelled: IntCounter,
    capture_failures: IntCounter,
    compose_failures: IntCounter,

    // Storage metrics
    stored_photos: IntGauge,
    unsynced_photos: IntGauge,
    evictions: IntCounter,

    // Print metrics
    print_jobs_submitted: IntGauge,
    print_jobs_completed: IntGauge,
    print_jobs_failed: IntGauge,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all booth metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let session_state = IntGauge::new(
            "photobooth_session_state",
            "Current session state (0=idle, 1=countdown, 2=captured, 3=review, 4=committing)",
        )?;
        let sessions_started = IntCounter::new(
            "photobooth_sessions_started_total",
            "Total sessions started",
        )?;
        let retakes = IntCounter::new("photobooth_retakes_total", "Total retakes requested")?;
        let photos_committed = IntCounter::new(
            "photobooth_photos_committed_total",
            "Total photos committed to storage",
        )?;
        let sessions_cancelled = IntCounter::new(
            "photobooth_sessions_cancelled_total",
            "Total sessions cancelled",
        )?;
        let capture_failures = IntCounter::new(
            "photobooth_capture_failures_total",
            "Total failed still captures",
        )?;
        let compose_failures = IntCounter::new(
            "photobooth_compose_failures_total",
            "Total failed frame composites",
        )?;

        let stored_photos = IntGauge::new(
            "photobooth_stored_photos",
            "Photos currently stored locally",
        )?;
        let unsynced_photos = IntGauge::new(
            "photobooth_unsynced_photos",
            "Stored photos not yet mirrored to the sync target",
        )?;
        let evictions = IntCounter::new(
            "photobooth_evictions_total",
            "Total photos evicted to respect the storage limit",
        )?;

        let print_jobs_submitted = IntGauge::new(
            "photobooth_print_jobs_submitted",
            "Print jobs submitted and awaiting completion",
        )?;
        let print_jobs_completed = IntGauge::new(
            "photobooth_print_jobs_completed",
            "Print jobs completed",
        )?;
        let print_jobs_failed = IntGauge::new(
            "photobooth_print_jobs_failed",
            "Print jobs failed",
        )?;

        registry.register(Box::new(session_state.clone()))?;
        registry.register(Box::new(sessions_started.clone()))?;
        registry.register(Box::new(retakes.clone()))?;
        registry.register(Box::new(photos_committed.clone()))?;
        registry.register(Box::new(sessions_cancelled.clone()))?;
        registry.register(Box::new(capture_failures.clone()))?;
        registry.register(Box::new(compose_failures.clone()))?;
        registry.register(Box::new(stored_photos.clone()))?;
        registry.register(Box::new(unsynced_photos.clone()))?;
        registry.register(Box::new(evictions.clone()))?;
        registry.register(Box::new(print_jobs_submitted.clone()))?;
        registry.register(Box::new(print_jobs_completed.clone()))?;
        registry.register(Box::new(print_jobs_failed.clone()))?;

        Ok(Self {
            registry,
            session_state,
            sessions_started,
            retakes,
            photos_committed,
            sessions_cancelled,
            capture_failures,
            compose_failures,
            stored_photos,
            unsynced_photos,
            evictions,
            print_jobs_submitted,
            print_jobs_completed,
            print_jobs_failed,
        })
    }

    /// Updates all metrics from a snapshot of booth state.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        self.session_state.set(snapshot.session_state.code());

        // Counters only move forward by the difference.
        advance(&self.sessions_started, snapshot.sessions_started);
        advance(&self.retakes, snapshot.retakes);
        advance(&self.photos_committed, snapshot.photos_committed);
        advance(&self.sessions_cancelled, snapshot.sessions_cancelled);
        advance(&self.capture_failures, snapshot.capture_failures);
        advance(&self.compose_failures, snapshot.compose_failures);
        advance(&self.evictions, snapshot.evictions);

        self.stored_photos.set(snapshot.stored_photos as i64);
        self.unsynced_photos.set(snapshot.unsynced_photos as i64);

        self.print_jobs_submitted
            .set(snapshot.print_jobs_submitted as i64);
        self.print_jobs_completed
            .set(snapshot.print_jobs_completed as i64);
        self.print_jobs_failed.set(snapshot.print_jobs_failed as i64);
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

impl MetricsSnapshot {
    /// Creates a snapshot from the current state of the booth components.
    pub fn from_components(
        state: SessionState,
        session: &SessionStats,
        storage: &StorageStats,
        print: &PrintStats,
    ) -> Self {
        Self {
            session_state: state,
            sessions_started: session.sessions_started,
            retakes: session.retakes,
            photos_committed: session.committed,
            sessions_cancelled: session.cancelled,
            capture_failures: session.capture_failures,
            compose_failures: session.compose_failures,
            stored_photos: storage.stored,
            unsynced_photos: storage.unsynced,
            evictions: storage.evicted_total,
            print_jobs_submitted: print.submitted + print.pending,
            print_jobs_completed: print.completed,
            print_jobs_failed: print.failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_creation() {
        let registry = MetricsRegistry::new();
        assert!(registry.is_ok());
    }

    #[test]
    fn test_metrics_update() {
        let registry = MetricsRegistry::new().unwrap();

        let snapshot = MetricsSnapshot::from_components(
            SessionState::Review,
            &SessionStats {
                sessions_started: 5,
                retakes: 2,
                committed: 3,
                ..SessionStats::default()
            },
            &StorageStats {
                stored: 3,
                unsynced: 1,
                evicted_total: 0,
            },
            &PrintStats {
                completed: 2,
                ..PrintStats::default()
            },
        );

        registry.update(&snapshot);
        // Counters never go backwards.
        registry.update(&MetricsSnapshot::default());

        let output = registry.encode().unwrap();
        assert!(output.contains("photobooth_sessions_started_total 5"));
        assert!(output.contains("photobooth_photos_committed_total 3"));
        assert!(output.contains("photobooth_print_jobs_completed 0"));
        assert!(output.contains("photobooth_session_state 0"));
    }

    #[test]
    fn test_metrics_encode() {
        let registry = MetricsRegistry::new().unwrap();
        let output = registry.encode().unwrap();

        assert!(output.contains("photobooth_session_state"));
        assert!(output.contains("photobooth_evictions_total"));
        assert!(output.contains("photobooth_print_jobs_failed"));
    }
}
