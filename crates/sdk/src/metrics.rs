//! Routing-layer metrics for observability and operational monitoring.
//!
//! This module provides a pluggable metrics trait (`RoutingMetrics`) that
//! applications can implement to collect telemetry from the router. Two
//! implementations are included:
//!
//! - [`NoopRoutingMetrics`]: Zero-overhead default that discards all metrics.
//! - [`MetricsRoutingMetrics`]: Integration with the [`metrics`](https://docs.rs/metrics) crate
//!   facade, forwarding to whatever recorder is installed (Prometheus, StatsD, etc.).
//!
//! # Metric Names
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `replica_routing_selections_total` | Counter | `purpose`, `status` | Server selections by purpose and outcome |
//! | `replica_routing_selection_duration_seconds` | Histogram | `purpose` | Time spent waiting for an eligible server |
//! | `replica_routing_scope_events_total` | Counter | `event` | Pin, nest, release, and rejection of request scopes |
//! | `replica_routing_reconciliations_total` | Counter | `change` | Registry reconciliations that added or removed members |

use std::{fmt, sync::Arc, time::Duration};

/// Why a server selection was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPurpose {
    /// Ad-hoc handle for a read.
    Read,
    /// Ad-hoc handle for a write.
    Write,
    /// Pinning a new request scope.
    Scope,
    /// Explicit connect call.
    Connect,
}

impl fmt::Display for SelectionPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Scope => write!(f, "scope"),
            Self::Connect => write!(f, "connect"),
        }
    }
}

/// Request scope lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeEvent {
    /// A context was pinned to a server.
    Pinned,
    /// A compatible nested scope was entered.
    Nested,
    /// The outermost scope ended and the pinned channel was released.
    Released,
    /// A nested scope was rejected as incompatible.
    Rejected,
}

impl fmt::Display for ScopeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pinned => write!(f, "pinned"),
            Self::Nested => write!(f, "nested"),
            Self::Released => write!(f, "released"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Trait for routing metrics collection.
///
/// All methods have default no-op implementations, so implementors only
/// override the metrics they care about.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: one instance is shared by every
/// clone of a client and by the topology notification thread.
pub trait RoutingMetrics: Send + Sync + fmt::Debug {
    /// Records the outcome of one server selection.
    fn record_selection(&self, purpose: SelectionPurpose, duration: Duration, success: bool) {
        let _ = (purpose, duration, success);
    }

    /// Records a request scope lifecycle event.
    fn record_scope_event(&self, event: ScopeEvent) {
        let _ = event;
    }

    /// Records a registry reconciliation that changed membership.
    fn record_reconciliation(&self, added: usize, removed: usize) {
        let _ = (added, removed);
    }
}

/// No-op metrics implementation with zero overhead.
#[derive(Debug, Clone, Copy)]
pub struct NoopRoutingMetrics;

impl RoutingMetrics for NoopRoutingMetrics {}

/// Metrics implementation using the [`metrics`](https://docs.rs/metrics) crate facade.
///
/// All metric names use the `replica_routing_` prefix.
#[derive(Debug, Clone, Copy)]
pub struct MetricsRoutingMetrics;

mod metric_names {
    pub const SELECTIONS_TOTAL: &str = "replica_routing_selections_total";
    pub const SELECTION_DURATION: &str = "replica_routing_selection_duration_seconds";
    pub const SCOPE_EVENTS_TOTAL: &str = "replica_routing_scope_events_total";
    pub const RECONCILIATIONS_TOTAL: &str = "replica_routing_reconciliations_total";
}

impl RoutingMetrics for MetricsRoutingMetrics {
    fn record_selection(&self, purpose: SelectionPurpose, duration: Duration, success: bool) {
        let status = if success { "success" } else { "error" };
        metrics::counter!(
            metric_names::SELECTIONS_TOTAL,
            "purpose" => purpose.to_string(),
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(metric_names::SELECTION_DURATION, "purpose" => purpose.to_string())
            .record(duration.as_secs_f64());
    }

    fn record_scope_event(&self, event: ScopeEvent) {
        metrics::counter!(metric_names::SCOPE_EVENTS_TOTAL, "event" => event.to_string())
            .increment(1);
    }

    fn record_reconciliation(&self, added: usize, removed: usize) {
        if added > 0 {
            metrics::counter!(metric_names::RECONCILIATIONS_TOTAL, "change" => "added")
                .increment(added as u64);
        }
        if removed > 0 {
            metrics::counter!(metric_names::RECONCILIATIONS_TOTAL, "change" => "removed")
                .increment(removed as u64);
        }
    }
}

/// Creates the default metrics instance (no-op).
pub(crate) fn default_metrics() -> Arc<dyn RoutingMetrics> {
    Arc::new(NoopRoutingMetrics)
}
