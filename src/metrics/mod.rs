//! Prometheus metrics for booth monitoring.
//!
//! Component counters are gathered into a [`MetricsSnapshot`] and pushed
//! into the [`MetricsRegistry`]. With the `metrics` feature the registry is
//! served over HTTP.
//!
//! # Metrics Exposed
//!
//! ## Session
//! - `photobooth_session_state` - Current state (0=idle .. 4=committing)
//! - `photobooth_sessions_started_total`, `photobooth_retakes_total`
//! - `photobooth_photos_committed_total`, `photobooth_sessions_cancelled_total`
//! - `photobooth_capture_failures_total`, `photobooth_compose_failures_total`
//!
//! ## Storage
//! - `photobooth_stored_photos` - Photos stored locally
//! - `photobooth_unsynced_photos` - Photos waiting for sync
//! - `photobooth_evictions_total` - Photos evicted by the storage limit
//!
//! ## Printing
//! - `photobooth_print_jobs_submitted`, `photobooth_print_jobs_completed`,
//!   `photobooth_print_jobs_failed`
//!
//! # Example
//!
//! ```no_run
//! use photobooth::metrics::{MetricsRegistry, MetricsSnapshot};
//! use photobooth::session::SessionState;
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//!
//! let snapshot = MetricsSnapshot {
//!     session_state: SessionState::Review,
//!     stored_photos: 12,
//!     ..MetricsSnapshot::default()
//! };
//!
//! registry.update(&snapshot);
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, MetricsState, ServerError};
