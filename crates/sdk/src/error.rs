//! Routing error types with caller-branchable classification.
//!
//! Provides a two-tier error model:
//! - **Routing errors**: raised by this layer (selection timeout, scope misuse,
//!   writes on a read-only pin). None are retried here.
//! - **Collaborator errors**: connection and authentication failures reported
//!   by the cluster, passed through unchanged.
//!
//! [`RoutingError::kind`] collapses the variants into an [`ErrorKind`] so
//! callers can branch without matching every field.

use replica_routing_types::{Endpoint, TypesError};
use snafu::{Location, Snafu};

/// Result type alias for routing operations.
pub type Result<T, E = RoutingError> = std::result::Result<T, E>;

/// Coarse classification of a [`RoutingError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No eligible server within the selection deadline.
    SelectionTimeout,
    /// The caller cancelled a blocking call.
    Cancelled,
    /// A nested scope asked for a server the pinned one cannot satisfy.
    IncompatibleNestedScope,
    /// A scope was ended that was never started.
    UnbalancedEndScope,
    /// A write was attempted through a read-only pin.
    WriteOnReadOnlyPin,
    /// A context pinned by one client was handed to another.
    ForeignContext,
    /// A single-instance query found several members.
    MultipleInstances,
    /// The client factory is full.
    ClientLimit,
    /// Invalid settings or arguments.
    Config,
    /// Failure reported by the cluster collaborator.
    Cluster,
}

/// Errors raised by the routing layer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RoutingError {
    /// No server satisfied the selector before the deadline.
    #[snafu(display("Server selection timed out after {duration_ms}ms waiting for {selector}"))]
    SelectionTimeout {
        /// Selection budget in milliseconds.
        duration_ms: u64,
        /// Description of the selector that could not be satisfied.
        selector: String,
    },

    /// The caller cancelled the operation.
    #[snafu(display("Operation cancelled while {operation}"))]
    Cancelled {
        /// What was in progress.
        operation: String,
    },

    /// A nested scope's selector rejects the already-pinned server.
    #[snafu(display(
        "Nested scope requiring {selector} is not compatible with the scope pinned to {pinned}"
    ))]
    IncompatibleNestedScope {
        /// Server the context is pinned to.
        pinned: Endpoint,
        /// Description of the rejected selector.
        selector: String,
    },

    /// A scope was ended on a context that has no active scope.
    #[snafu(display("Context is not in a request scope (was start_scope called?) at {location}"))]
    UnbalancedEndScope {
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// A write was attempted while pinned to a non-writable member.
    #[snafu(display("Scope pinned to {pinned} cannot be used for writes"))]
    WriteOnReadOnlyPin {
        /// Server the context is pinned to.
        pinned: Endpoint,
    },

    /// A pinned context was used with a client that did not create it.
    #[snafu(display("Context pinned by client {owner} cannot be used with client {client}"))]
    ForeignContext {
        /// Sequential id of the client that pinned the context.
        owner: u64,
        /// Sequential id of the client it was passed to.
        client: u64,
    },

    /// A single-instance query found more than one member.
    #[snafu(display("Single-instance query is ambiguous: {count} members are known"))]
    MultipleInstances {
        /// Number of known members.
        count: usize,
    },

    /// The factory already holds its maximum number of clients.
    #[snafu(display("Client factory has already created {max} clients, the maximum allowed"))]
    ClientLimit {
        /// Configured maximum.
        max: usize,
    },

    /// Settings validation error.
    #[snafu(display("Configuration error: {message}"))]
    Config {
        /// Error description.
        message: String,
    },

    /// A value type rejected its input.
    #[snafu(display("Invalid value: {source}"))]
    InvalidValue {
        /// Underlying validation error.
        source: TypesError,
    },

    /// The cluster could not open a connection.
    #[snafu(display("Connection error to {endpoint}: {message}"))]
    Connection {
        /// Server the connection was for.
        endpoint: Endpoint,
        /// Error description.
        message: String,
    },

    /// The cluster rejected credentials.
    #[snafu(display("Authentication failed against {endpoint}: {message}"))]
    Authentication {
        /// Server that rejected the handshake.
        endpoint: Endpoint,
        /// Error description.
        message: String,
    },
}

impl RoutingError {
    /// Returns the coarse classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SelectionTimeout { .. } => ErrorKind::SelectionTimeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::IncompatibleNestedScope { .. } => ErrorKind::IncompatibleNestedScope,
            Self::UnbalancedEndScope { .. } => ErrorKind::UnbalancedEndScope,
            Self::WriteOnReadOnlyPin { .. } => ErrorKind::WriteOnReadOnlyPin,
            Self::ForeignContext { .. } => ErrorKind::ForeignContext,
            Self::MultipleInstances { .. } => ErrorKind::MultipleInstances,
            Self::ClientLimit { .. } => ErrorKind::ClientLimit,
            Self::Config { .. } | Self::InvalidValue { .. } => ErrorKind::Config,
            Self::Connection { .. } | Self::Authentication { .. } => ErrorKind::Cluster,
        }
    }

    /// Returns true if a deadline expired or the caller cancelled.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind(), ErrorKind::SelectionTimeout | ErrorKind::Cancelled)
    }
}

impl From<TypesError> for RoutingError {
    fn from(source: TypesError) -> Self {
        Self::InvalidValue { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let err = RoutingError::SelectionTimeout { duration_ms: 500, selector: "primary".to_owned() };
        assert_eq!(err.kind(), ErrorKind::SelectionTimeout);
        assert!(err.is_timeout());

        let err = RoutingError::WriteOnReadOnlyPin { pinned: Endpoint::new("db2", 27017) };
        assert_eq!(err.kind(), ErrorKind::WriteOnReadOnlyPin);
        assert!(!err.is_timeout());

        let err = RoutingError::Authentication {
            endpoint: Endpoint::new("db1", 27017),
            message: "bad credentials".to_owned(),
        };
        assert_eq!(err.kind(), ErrorKind::Cluster);
    }

    #[test]
    fn test_cancelled_counts_as_timeout() {
        let err = RoutingError::Cancelled { operation: "selecting a server".to_owned() };
        assert!(err.is_timeout());
    }

    #[test]
    fn test_unbalanced_end_scope_display_mentions_start() {
        let err = UnbalancedEndScopeSnafu.build();
        assert!(err.to_string().contains("start_scope"));
        assert_eq!(err.kind(), ErrorKind::UnbalancedEndScope);
    }

    #[test]
    fn test_types_error_converts_to_config_kind() {
        let source = TypesError::InvalidReadPreference { reason: "tags on primary".to_owned() };
        let err: RoutingError = source.into();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("tags on primary"));
    }
}
