//! Identity-stable cache of known cluster members.
//!
//! The registry is driven by topology notifications and read by any thread.
//! Every reconciliation builds a complete [`RegistrySnapshot`] and publishes
//! it with a single pointer swap, so readers observe either the old or the
//! new membership in full.
//!
//! ```text
//!  notification thread                         reader threads
//!  ───────────────────                         ──────────────
//!  reconcile(description)                      snapshot() ──► Arc<RegistrySnapshot>
//!    lock(reconcile)                                            │ instances: [A, C]
//!    keep A, C   (same Arc)                                     │ description
//!    drop B                                                     │ version
//!    add  D      (new Arc)
//!    sort by endpoint
//!    swap published ◄──────────── RwLock<Arc<RegistrySnapshot>>
//! ```
//!
//! A [`ServerInstance`] only stores its endpoint. Its role and connection
//! state are looked up in the latest published snapshot, so a long-lived
//! reference keeps observing the member as the topology changes.

use std::{
    collections::BTreeSet,
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::{Mutex, RwLock};
use replica_routing_types::{
    ClusterDescription, ClusterType, Endpoint, ServerDescription, ServerState, ServerType,
};
use snafu::ensure;

use crate::{
    error::{MultipleInstancesSnafu, Result},
    metrics::{RoutingMetrics, default_metrics},
};

type PublishedSnapshot = RwLock<Arc<RegistrySnapshot>>;

/// Aggregate connection state of the known members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// No member is connected (or none is known).
    Disconnected,
    /// Every known member is connected.
    Connected,
    /// Some, but not all, known members are connected.
    ConnectedToSubset,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connected => write!(f, "connected"),
            Self::ConnectedToSubset => write!(f, "connected to subset"),
        }
    }
}

/// One known cluster member.
///
/// The same `Arc<ServerInstance>` is handed out for as long as its endpoint
/// stays in the topology; compare with [`Arc::ptr_eq`] to test identity.
#[derive(Debug)]
pub struct ServerInstance {
    endpoint: Endpoint,
    sequential_id: u64,
    published: Weak<PublishedSnapshot>,
}

impl ServerInstance {
    /// Returns the member's address.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the registry-assigned creation number of this instance.
    #[must_use]
    pub fn sequential_id(&self) -> u64 {
        self.sequential_id
    }

    /// Returns the member's latest reported description.
    ///
    /// Once the member has left the topology (or the registry is gone) this
    /// is a disconnected description of unknown type.
    #[must_use]
    pub fn description(&self) -> ServerDescription {
        self.published
            .upgrade()
            .and_then(|published| {
                let snapshot = Arc::clone(&*published.read());
                snapshot.description.server(&self.endpoint).cloned()
            })
            .unwrap_or_else(|| ServerDescription::builder().endpoint(self.endpoint.clone()).build())
    }

    /// Returns the member's current role.
    #[must_use]
    pub fn server_type(&self) -> ServerType {
        self.description().server_type()
    }

    /// Returns the member's current connection state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        self.description().state()
    }

    /// Returns whether the member is currently the replica set primary.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.server_type() == ServerType::ReplicaSetPrimary
    }

    /// Returns whether the member is currently a replica set secondary.
    #[must_use]
    pub fn is_secondary(&self) -> bool {
        self.server_type() == ServerType::ReplicaSetSecondary
    }

    /// Returns whether the member is currently an arbiter.
    #[must_use]
    pub fn is_arbiter(&self) -> bool {
        self.server_type() == ServerType::ReplicaSetArbiter
    }

    /// Returns whether the member currently accepts writes.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.server_type().is_writable()
    }
}

impl fmt::Display for ServerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.endpoint)
    }
}

/// Immutable membership view published by one reconciliation.
#[derive(Debug)]
pub struct RegistrySnapshot {
    description: Arc<ClusterDescription>,
    instances: Vec<Arc<ServerInstance>>,
    version: u64,
}

impl RegistrySnapshot {
    /// Returns the topology this snapshot was reconciled against.
    #[must_use]
    pub fn description(&self) -> &Arc<ClusterDescription> {
        &self.description
    }

    /// Returns every member, sorted by endpoint.
    #[must_use]
    pub fn instances(&self) -> &[Arc<ServerInstance>] {
        &self.instances
    }

    /// Returns how many reconciliations preceded this snapshot.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the member at `endpoint`, if known.
    #[must_use]
    pub fn get(&self, endpoint: &Endpoint) -> Option<Arc<ServerInstance>> {
        self.instances
            .binary_search_by(|instance| instance.endpoint.cmp(endpoint))
            .ok()
            .map(|index| Arc::clone(&self.instances[index]))
    }

    fn server_of(&self, instance: &ServerInstance) -> Option<&ServerDescription> {
        self.description.server(&instance.endpoint)
    }

    fn with_type(&self, server_type: ServerType) -> Vec<Arc<ServerInstance>> {
        self.instances
            .iter()
            .filter(|instance| {
                self.server_of(instance).is_some_and(|server| server.server_type() == server_type)
            })
            .cloned()
            .collect()
    }

    /// Returns the member that plays the primary role for this deployment.
    ///
    /// - Standalone: the only member.
    /// - Replica set: the unique member reporting itself primary.
    /// - Sharded: the first connected router.
    /// - Unknown: none.
    #[must_use]
    pub fn primary(&self) -> Option<Arc<ServerInstance>> {
        match self.description.cluster_type() {
            ClusterType::Standalone => self.instances.first().cloned(),
            ClusterType::ReplicaSet => {
                let mut primaries = self.with_type(ServerType::ReplicaSetPrimary);
                if primaries.len() == 1 { primaries.pop() } else { None }
            },
            ClusterType::Sharded => self
                .instances
                .iter()
                .find(|instance| self.server_of(instance).is_some_and(ServerDescription::is_connected))
                .cloned(),
            ClusterType::Unknown => None,
        }
    }

    /// Returns the replica set secondaries.
    #[must_use]
    pub fn secondaries(&self) -> Vec<Arc<ServerInstance>> {
        self.with_type(ServerType::ReplicaSetSecondary)
    }

    /// Returns the replica set arbiters.
    #[must_use]
    pub fn arbiters(&self) -> Vec<Arc<ServerInstance>> {
        self.with_type(ServerType::ReplicaSetArbiter)
    }

    /// Returns passive members. Always empty: passives report as secondaries.
    #[must_use]
    pub fn passives(&self) -> Vec<Arc<ServerInstance>> {
        Vec::new()
    }

    /// Returns the single known member.
    ///
    /// # Errors
    ///
    /// Returns `MultipleInstances` when more than one member is known.
    pub fn instance(&self) -> Result<Option<Arc<ServerInstance>>> {
        let count = self.instances.len();
        ensure!(count <= 1, MultipleInstancesSnafu { count });
        Ok(self.instances.first().cloned())
    }

    /// Returns the aggregate connection state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        let connected = self
            .instances
            .iter()
            .filter(|instance| self.server_of(instance).is_some_and(ServerDescription::is_connected))
            .count();
        match connected {
            0 => ClientState::Disconnected,
            n if n == self.instances.len() => ClientState::Connected,
            _ => ClientState::ConnectedToSubset,
        }
    }
}

/// Membership changes applied by one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Endpoints that gained an instance.
    pub added: Vec<Endpoint>,
    /// Endpoints whose instance was discarded.
    pub removed: Vec<Endpoint>,
}

impl ReconcileOutcome {
    /// Returns true if membership did not change.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Thread-safe, identity-stable cache of cluster members.
pub struct ServerInstanceRegistry {
    published: Arc<PublishedSnapshot>,
    reconcile_lock: Mutex<()>,
    next_sequential_id: AtomicU64,
    metrics: Arc<dyn RoutingMetrics>,
}

impl ServerInstanceRegistry {
    /// Creates a registry reconciled against `description`.
    #[must_use]
    pub fn new(description: Arc<ClusterDescription>) -> Self {
        Self::with_metrics(description, default_metrics())
    }

    /// Creates a registry that reports reconciliations to `metrics`.
    #[must_use]
    pub fn with_metrics(
        description: Arc<ClusterDescription>,
        metrics: Arc<dyn RoutingMetrics>,
    ) -> Self {
        let empty = RegistrySnapshot {
            description: Arc::new(ClusterDescription::default()),
            instances: Vec::new(),
            version: 0,
        };
        let registry = Self {
            published: Arc::new(RwLock::new(Arc::new(empty))),
            reconcile_lock: Mutex::new(()),
            next_sequential_id: AtomicU64::new(1),
            metrics,
        };
        registry.reconcile(description);
        registry
    }

    /// Brings the cached membership in line with `description`.
    ///
    /// Instances whose endpoint persists keep their identity; absent
    /// endpoints are dropped; new endpoints get fresh instances. The result
    /// is sorted by endpoint and published atomically. An empty description
    /// yields an empty membership.
    pub fn reconcile(&self, description: Arc<ClusterDescription>) -> ReconcileOutcome {
        let _guard = self.reconcile_lock.lock();
        self.apply(description)
    }

    /// Reconciles against whatever `latest` returns, reading it only after
    /// the reconcile lock is held.
    ///
    /// A reconciliation that started earlier with an older snapshot can
    /// therefore never overwrite the result.
    pub fn reconcile_latest<F>(&self, latest: F) -> ReconcileOutcome
    where
        F: FnOnce() -> Arc<ClusterDescription>,
    {
        let _guard = self.reconcile_lock.lock();
        self.apply(latest())
    }

    /// Publishes the membership for `description`. Callers hold the
    /// reconcile lock.
    fn apply(&self, description: Arc<ClusterDescription>) -> ReconcileOutcome {
        let current = self.snapshot();
        let present = description.endpoints();

        let mut outcome = ReconcileOutcome::default();
        let mut instances = Vec::with_capacity(present.len());
        for instance in &current.instances {
            if present.contains(&instance.endpoint) {
                instances.push(Arc::clone(instance));
            } else {
                outcome.removed.push(instance.endpoint.clone());
            }
        }

        let known: BTreeSet<&Endpoint> =
            current.instances.iter().map(|instance| &instance.endpoint).collect();
        for endpoint in present.iter().filter(|endpoint| !known.contains(endpoint)) {
            instances.push(Arc::new(ServerInstance {
                endpoint: endpoint.clone(),
                sequential_id: self.next_sequential_id.fetch_add(1, Ordering::Relaxed),
                published: Arc::downgrade(&self.published),
            }));
            outcome.added.push(endpoint.clone());
        }
        instances.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));

        let version = current.version + 1;
        *self.published.write() = Arc::new(RegistrySnapshot { description, instances, version });

        if outcome.is_unchanged() {
            tracing::trace!(version, "Registry reconciled without membership change");
        } else {
            tracing::debug!(
                version,
                added = outcome.added.len(),
                removed = outcome.removed.len(),
                "Registry membership changed"
            );
            self.metrics.record_reconciliation(outcome.added.len(), outcome.removed.len());
        }
        outcome
    }

    /// Returns the latest published snapshot. Never blocks on reconciliation.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&*self.published.read())
    }

    /// Returns the latest reconciled topology.
    #[must_use]
    pub fn description(&self) -> Arc<ClusterDescription> {
        Arc::clone(&self.snapshot().description)
    }

    /// Returns every known member, sorted by endpoint.
    #[must_use]
    pub fn instances(&self) -> Vec<Arc<ServerInstance>> {
        self.snapshot().instances.clone()
    }

    /// Returns the single known member.
    ///
    /// # Errors
    ///
    /// Returns `MultipleInstances` when more than one member is known.
    pub fn instance(&self) -> Result<Option<Arc<ServerInstance>>> {
        self.snapshot().instance()
    }

    /// Returns the member at `endpoint`, if known.
    #[must_use]
    pub fn get(&self, endpoint: &Endpoint) -> Option<Arc<ServerInstance>> {
        self.snapshot().get(endpoint)
    }

    /// See [`RegistrySnapshot::primary`].
    #[must_use]
    pub fn primary(&self) -> Option<Arc<ServerInstance>> {
        self.snapshot().primary()
    }

    /// Returns the replica set secondaries.
    #[must_use]
    pub fn secondaries(&self) -> Vec<Arc<ServerInstance>> {
        self.snapshot().secondaries()
    }

    /// Returns the replica set arbiters.
    #[must_use]
    pub fn arbiters(&self) -> Vec<Arc<ServerInstance>> {
        self.snapshot().arbiters()
    }

    /// Returns passive members (always empty).
    #[must_use]
    pub fn passives(&self) -> Vec<Arc<ServerInstance>> {
        self.snapshot().passives()
    }

    /// Returns the number of reconciliations applied so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.snapshot().version
    }

    /// Returns the aggregate connection state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        self.snapshot().state()
    }

    /// Returns the replica set name reported by the topology.
    #[must_use]
    pub fn replica_set_name(&self) -> Option<String> {
        self.snapshot().description.replica_set_name().map(str::to_owned)
    }
}

impl fmt::Debug for ServerInstanceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("ServerInstanceRegistry")
            .field("version", &snapshot.version)
            .field("instances", &snapshot.instances.len())
            .finish_non_exhaustive()
    }
}
