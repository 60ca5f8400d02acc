//! Main `RoutingClient` implementation.
//!
//! The client ties the four routing components to one cluster:
//!
//! ```text
//!                  ┌──────────────────── RoutingClient ─────────────────────┐
//!  topology ──────►│ ServerInstanceRegistry   (primary / secondaries / …)   │
//!  notifications   │                                                        │
//!  callers ───────►│ start_scope ──► RequestContext ◄── ScopeGuard          │
//!                  │ execute_read / execute_write                           │
//!                  │        └──► OperationExecutionBridge ──► BindingFactory│──► Cluster
//!                  └────────────────────────────────────────────────────────┘
//! ```
//!
//! Clones share everything. The topology subscription is dropped with the
//! last clone.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use replica_routing_types::{ClusterDescription, Endpoint, ReadPreference};

use crate::{
    binding::{BindingFactory, Intent, RoutingHandle},
    cluster::{Cluster, SubscriptionId},
    config::ClientSettings,
    deadline::Deadline,
    error::Result,
    executor::{OperationExecutionBridge, ReadOperation, WriteOperation},
    metrics::{RoutingMetrics, SelectionPurpose, default_metrics},
    registry::{ClientState, ServerInstance, ServerInstanceRegistry},
    scope::{RequestContext, ScopeGuard, ScopeSelector},
};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

struct ClientInner {
    sequential_id: u64,
    settings: ClientSettings,
    cluster: Arc<dyn Cluster>,
    registry: Arc<ServerInstanceRegistry>,
    factory: Arc<BindingFactory>,
    bridge: OperationExecutionBridge,
    metrics: Arc<dyn RoutingMetrics>,
    subscription: SubscriptionId,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.cluster.unsubscribe(self.subscription);
        tracing::debug!(client = self.sequential_id, "Routing client dropped");
    }
}

/// Replica-aware routing client.
///
/// Cheap to clone; every clone routes through the same registry and
/// cluster. Safe to share between threads: per-caller state lives in the
/// [`RequestContext`] each caller owns.
#[derive(Clone)]
pub struct RoutingClient {
    inner: Arc<ClientInner>,
}

impl RoutingClient {
    /// Creates a client routing over `cluster`.
    #[must_use]
    pub fn new(settings: ClientSettings, cluster: Arc<dyn Cluster>) -> Self {
        Self::with_metrics(settings, cluster, default_metrics())
    }

    /// Creates a client that reports to `metrics`.
    #[must_use]
    pub fn with_metrics(
        settings: ClientSettings,
        cluster: Arc<dyn Cluster>,
        metrics: Arc<dyn RoutingMetrics>,
    ) -> Self {
        let sequential_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::new(ServerInstanceRegistry::with_metrics(
            cluster.description(),
            Arc::clone(&metrics),
        ));

        let listener_registry = Arc::downgrade(&registry);
        let subscription = cluster.subscribe(Arc::new(move |description| {
            if let Some(registry) = listener_registry.upgrade() {
                registry.reconcile(Arc::clone(description));
            }
        }));
        // Catch changes published between the first read and the subscription.
        registry.reconcile_latest(|| cluster.description());

        let factory = Arc::new(
            BindingFactory::new(Arc::clone(&cluster), &settings).with_metrics(Arc::clone(&metrics)),
        );
        let bridge = OperationExecutionBridge::new(sequential_id, Arc::clone(&factory));

        tracing::debug!(
            client = sequential_id,
            seeds = settings.seeds().len(),
            read_preference = %settings.read_preference(),
            "Routing client created"
        );

        Self {
            inner: Arc::new(ClientInner {
                sequential_id,
                settings,
                cluster,
                registry,
                factory,
                bridge,
                metrics,
                subscription,
            }),
        }
    }

    /// Returns a new client over the same cluster with a different default
    /// read preference.
    #[must_use]
    pub fn with_read_preference(&self, read_preference: ReadPreference) -> Self {
        Self::with_metrics(
            self.inner.settings.with_read_preference(read_preference),
            Arc::clone(&self.inner.cluster),
            Arc::clone(&self.inner.metrics),
        )
    }

    /// Returns the process-unique creation number of this client.
    #[must_use]
    pub fn sequential_id(&self) -> u64 {
        self.inner.sequential_id
    }

    /// Returns the client's settings.
    #[must_use]
    pub fn settings(&self) -> &ClientSettings {
        &self.inner.settings
    }

    /// Returns the client's default read preference.
    #[must_use]
    pub fn read_preference(&self) -> &ReadPreference {
        self.inner.settings.read_preference()
    }

    /// Returns the member registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ServerInstanceRegistry> {
        &self.inner.registry
    }

    /// Returns the factory minting this client's handles.
    #[must_use]
    pub fn binding_factory(&self) -> &Arc<BindingFactory> {
        &self.inner.factory
    }

    /// Waits until a member satisfying the default read preference is
    /// available.
    ///
    /// # Errors
    ///
    /// Returns `SelectionTimeout` if none appears within `timeout`.
    pub fn connect(&self, timeout: Duration) -> Result<()> {
        let selector = self.inner.factory.selector_for(self.read_preference(), Intent::Read);
        let deadline = Deadline::after(timeout);
        let server =
            self.inner.factory.select(selector.as_ref(), SelectionPurpose::Connect, &deadline)?;
        tracing::info!(
            client = self.inner.sequential_id,
            endpoint = %server.description().endpoint(),
            state = %self.state(),
            "Connected"
        );
        Ok(())
    }

    /// Starts a scope pinned to a writable member.
    ///
    /// # Errors
    ///
    /// See [`start_scope_with`](Self::start_scope_with).
    pub fn start_scope<'a>(&self, context: &'a mut RequestContext) -> Result<ScopeGuard<'a>> {
        self.start_scope_with(context, ScopeSelector::Primary, &Deadline::none())
    }

    /// Starts a scope pinned to a member satisfying `read_preference`.
    ///
    /// # Errors
    ///
    /// See [`start_scope_with`](Self::start_scope_with).
    pub fn start_scope_with_read_preference<'a>(
        &self,
        context: &'a mut RequestContext,
        read_preference: ReadPreference,
    ) -> Result<ScopeGuard<'a>> {
        let selector = ScopeSelector::ReadPreference(read_preference);
        self.start_scope_with(context, selector, &Deadline::none())
    }

    /// Starts a scope pinned to `instance`.
    ///
    /// # Errors
    ///
    /// See [`start_scope_with`](Self::start_scope_with).
    pub fn start_scope_on_instance<'a>(
        &self,
        context: &'a mut RequestContext,
        instance: Arc<ServerInstance>,
    ) -> Result<ScopeGuard<'a>> {
        self.start_scope_with(context, ScopeSelector::Instance(instance), &Deadline::none())
    }

    /// Starts a scope on `context`.
    ///
    /// An unpinned context is pinned to a freshly selected server. A pinned
    /// context stays on its server and only gains one nesting level, provided
    /// `selector` accepts that server. The returned guard ends the scope when
    /// dropped.
    ///
    /// # Errors
    ///
    /// - `SelectionTimeout` / `Cancelled` when no server qualifies in time
    /// - `IncompatibleNestedScope` when the pinned server does not satisfy
    ///   `selector`
    /// - `ForeignContext` when another client pinned `context`
    /// - connection errors from the cluster
    ///
    /// The context is unchanged on every error.
    pub fn start_scope_with<'a>(
        &self,
        context: &'a mut RequestContext,
        selector: ScopeSelector,
        deadline: &Deadline,
    ) -> Result<ScopeGuard<'a>> {
        context.enter(
            self.inner.sequential_id,
            &selector,
            &self.inner.factory,
            &self.inner.registry,
            self.inner.metrics.as_ref(),
            deadline,
        )?;
        Ok(ScopeGuard::new(context, self.inner.sequential_id, Arc::clone(&self.inner.metrics)))
    }

    /// Ends the innermost scope on `context` without a guard.
    ///
    /// # Errors
    ///
    /// Returns `UnbalancedEndScope` if no scope is active and
    /// `ForeignContext` if another client pinned `context`.
    pub fn end_scope(&self, context: &mut RequestContext) -> Result<()> {
        context.leave(self.inner.sequential_id, self.inner.metrics.as_ref())
    }

    /// Returns a handle for reading with `read_preference`.
    ///
    /// Inside a scope this is a fork of the pinned handle and
    /// `read_preference` is ignored.
    ///
    /// # Errors
    ///
    /// Returns selection errors or `ForeignContext`.
    pub fn read_handle(
        &self,
        context: &RequestContext,
        read_preference: &ReadPreference,
        deadline: &Deadline,
    ) -> Result<RoutingHandle> {
        self.inner.bridge.acquire(context, read_preference, Intent::Read, deadline)
    }

    /// Returns a handle for writing.
    ///
    /// # Errors
    ///
    /// Returns `WriteOnReadOnlyPin` when `context` is pinned to a member
    /// that cannot take writes, selection errors, or `ForeignContext`.
    pub fn write_handle(
        &self,
        context: &RequestContext,
        deadline: &Deadline,
    ) -> Result<RoutingHandle> {
        self.inner.bridge.acquire(context, &ReadPreference::primary(), Intent::Write, deadline)
    }

    /// Runs a read operation with `read_preference`.
    ///
    /// # Errors
    ///
    /// Returns handle acquisition errors or the operation's own error.
    pub fn execute_read<O: ReadOperation + ?Sized>(
        &self,
        context: &RequestContext,
        operation: &O,
        read_preference: &ReadPreference,
        deadline: &Deadline,
    ) -> Result<O::Output> {
        self.inner.bridge.execute_read(context, operation, read_preference, deadline)
    }

    /// Runs a write operation.
    ///
    /// # Errors
    ///
    /// Returns handle acquisition errors or the operation's own error.
    pub fn execute_write<O: WriteOperation + ?Sized>(
        &self,
        context: &RequestContext,
        operation: &O,
        deadline: &Deadline,
    ) -> Result<O::Output> {
        self.inner.bridge.execute_write(context, operation, deadline)
    }

    /// Returns the latest reconciled topology.
    #[must_use]
    pub fn description(&self) -> Arc<ClusterDescription> {
        self.inner.registry.description()
    }

    /// Returns the member acting as primary, if any.
    #[must_use]
    pub fn primary(&self) -> Option<Arc<ServerInstance>> {
        self.inner.registry.primary()
    }

    /// Returns the replica set secondaries.
    #[must_use]
    pub fn secondaries(&self) -> Vec<Arc<ServerInstance>> {
        self.inner.registry.secondaries()
    }

    /// Returns the replica set arbiters.
    #[must_use]
    pub fn arbiters(&self) -> Vec<Arc<ServerInstance>> {
        self.inner.registry.arbiters()
    }

    /// Returns passive members (always empty).
    #[must_use]
    pub fn passives(&self) -> Vec<Arc<ServerInstance>> {
        self.inner.registry.passives()
    }

    /// Returns every known member, sorted by endpoint.
    #[must_use]
    pub fn instances(&self) -> Vec<Arc<ServerInstance>> {
        self.inner.registry.instances()
    }

    /// Returns the single known member.
    ///
    /// # Errors
    ///
    /// Returns `MultipleInstances` when more than one member is known.
    pub fn instance(&self) -> Result<Option<Arc<ServerInstance>>> {
        self.inner.registry.instance()
    }

    /// Returns the member at `endpoint`, if known.
    #[must_use]
    pub fn instance_at(&self, endpoint: &Endpoint) -> Option<Arc<ServerInstance>> {
        self.inner.registry.get(endpoint)
    }

    /// Returns the aggregate connection state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        self.inner.registry.state()
    }

    /// Returns the replica set name, preferring the topology's report over
    /// the configured one.
    #[must_use]
    pub fn replica_set_name(&self) -> Option<String> {
        self.inner
            .registry
            .replica_set_name()
            .or_else(|| self.inner.settings.replica_set_name().map(str::to_owned))
    }
}

impl fmt::Debug for RoutingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingClient")
            .field("sequential_id", &self.inner.sequential_id)
            .field("settings", &self.inner.settings)
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}
