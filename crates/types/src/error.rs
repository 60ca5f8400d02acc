//! Error types for topology value parsing and validation using snafu.
//!
//! These errors surface when callers construct value types from untrusted
//! input (connection strings, configuration files). Topology snapshots
//! produced by the cluster are never rejected: an ill-formed snapshot is
//! normalized instead.

use snafu::Snafu;

/// Result type alias for value-type construction.
pub type Result<T, E = TypesError> = std::result::Result<T, E>;

/// Errors raised while parsing or validating value types.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum TypesError {
    /// An endpoint string could not be parsed.
    #[snafu(display("Invalid endpoint '{input}': {reason}"))]
    InvalidEndpoint {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A read preference combination is not allowed.
    #[snafu(display("Invalid read preference: {reason}"))]
    InvalidReadPreference {
        /// Why it was rejected.
        reason: String,
    },
}
