//! Replica-aware connection routing for document-database clients.
//!
//! Given an operation and a read/write policy, this crate picks the physical
//! server it runs on, optionally pins a sequence of operations to one
//! connection, and keeps a local, identity-stable view of cluster
//! membership in step with topology notifications. Wire protocol,
//! authentication, pooling and monitoring belong to the cluster
//! collaborator behind the [`Cluster`] trait.
//!
//! # Features
//!
//! - **Read preference routing**: primary, secondary, nearest, tag sets, latency window
//! - **Pinned request scopes**: nested scopes share one connection, released exactly once
//! - **Topology tracking**: copy-on-write member registry with stable instance identity
//! - **Deadlines everywhere**: every blocking call honours a deadline and a cancellation token
//! - **Explicit client factory**: one client per settings value, no global cache
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use replica_routing_sdk::{ClientSettings, Deadline, RequestContext, RoutingClient};
//! use replica_routing_types::ReadPreference;
//!
//! let settings = ClientSettings::builder().with_seeds(["db1", "db2", "db3"]).build()?;
//! let client = RoutingClient::new(settings, cluster);
//!
//! // Ad hoc: every operation is routed on its own.
//! let context = RequestContext::new();
//! let rows = client.execute_read(&context, &find_rows, &ReadPreference::secondary(), &Deadline::none())?;
//!
//! // Pinned: both operations reach the same server over the same connection.
//! let mut context = RequestContext::new();
//! let scope = client.start_scope(&mut context)?;
//! client.execute_write(&scope, &insert_row, &Deadline::none())?;
//! client.execute_read(&scope, &find_rows, &ReadPreference::primary(), &Deadline::none())?;
//! drop(scope);
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  RoutingClient (Public API)                 │
//! │  .start_scope() │ .execute_read() │ .execute_write()        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 OperationExecutionBridge                    │
//! │   Pinned fork │ Ad-hoc handle │ Dispose on every exit path  │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │  RequestContext / ScopeGuard │       BindingFactory         │
//! │  Pin │ Nesting │ Release     │  Selectors │ Deadlines       │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │                  ServerInstanceRegistry                     │
//! │   Reconcile │ Immutable snapshots │ Role queries            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 Cluster collaborator (trait)                │
//! │   description() │ subscribe() │ select_server() │ channels  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod binding;
mod client;
mod cluster;
mod config;
mod deadline;
mod error;
mod executor;
mod factory;
mod metrics;
pub mod mock;
mod registry;
mod scope;
mod selector;

// Public API exports
pub use binding::{BindingFactory, HandleKind, Intent, RoutingHandle};
pub use client::RoutingClient;
pub use cluster::{
    Channel, Cluster, Connection, ConnectionId, DescriptionListener, Server, SubscriptionId,
};
pub use config::{ClientSettings, ClientSettingsBuilder};
pub use deadline::Deadline;
pub use error::{ErrorKind, Result, RoutingError};
pub use executor::{OperationExecutionBridge, ReadOperation, WriteOperation};
pub use factory::{ClientFactory, ClusterConnector, DEFAULT_MAX_CLIENTS};
pub use metrics::{
    MetricsRoutingMetrics, NoopRoutingMetrics, RoutingMetrics, ScopeEvent, SelectionPurpose,
};
pub use registry::{
    ClientState, ReconcileOutcome, RegistrySnapshot, ServerInstance, ServerInstanceRegistry,
};
pub use scope::{RequestContext, ScopeGuard, ScopeSelector};
pub use selector::{
    DEFAULT_LOCAL_THRESHOLD, EndpointServerSelector, ReadPreferenceServerSelector,
    ServerSelector, WritableServerSelector,
};

// Re-export the cancellation token accepted by `Deadline::with_cancellation`
pub use tokio_util::sync::CancellationToken;

// Re-export the value types every caller needs
pub use replica_routing_types::{
    ClusterDescription, ClusterType, Endpoint, ReadPreference, ReadPreferenceMode,
    ServerDescription, ServerState, ServerType, TagSet,
};
