//! Value types shared by the replica-aware routing layer.
//!
//! This crate provides the immutable vocabulary the router reasons about:
//! - [`Endpoint`]: the stable identity of a cluster member
//! - [`ServerDescription`] / [`ClusterDescription`]: monitored topology snapshots
//! - [`ReadPreference`] / [`TagSet`]: read routing policy
//! - Error types using snafu

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod endpoint;
pub mod error;
pub mod read_preference;
pub mod server;

pub use cluster::{ClusterDescription, ClusterType};
pub use endpoint::{DEFAULT_PORT, Endpoint};
pub use error::{Result, TypesError};
pub use read_preference::{ReadPreference, ReadPreferenceMode, TagSet};
pub use server::{ServerDescription, ServerState, ServerType};
