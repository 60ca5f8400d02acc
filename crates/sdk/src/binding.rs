//! Routing handles and the factory that mints them.
//!
//! A [`RoutingHandle`] is the capability an operation is dispatched through:
//! one selected server, the read preference that selected it, and the
//! channel to it. Handles are reference counted; [`RoutingHandle::fork`]
//! shares the same server and channel, and the channel goes back to the pool
//! when the last fork is dropped.
//!
//! Ad-hoc handles open their channel lazily on first use. Pinned handles are
//! created by a request scope with their channel already open.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use replica_routing_types::{Endpoint, ReadPreference, ServerDescription};

use crate::{
    cluster::{Channel, Cluster, ConnectionId, Server},
    config::ClientSettings,
    deadline::Deadline,
    error::Result,
    metrics::{RoutingMetrics, SelectionPurpose, default_metrics},
    selector::{ReadPreferenceServerSelector, ServerSelector, WritableServerSelector},
};

/// What an operation intends to do with its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    /// The operation only reads.
    Read,
    /// The operation modifies data.
    Write,
}

/// How a handle's lifetime is managed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// Minted for one unit of work and disposed right after it.
    AdHoc,
    /// Owned by a request scope and shared by forking.
    Pinned,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdHoc => write!(f, "ad-hoc"),
            Self::Pinned => write!(f, "pinned"),
        }
    }
}

#[derive(Debug)]
struct HandleInner {
    server: Arc<dyn Server>,
    description: ServerDescription,
    read_preference: ReadPreference,
    writable: bool,
    kind: HandleKind,
    connect_timeout: Duration,
    channel: Mutex<Option<Channel>>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        tracing::trace!(
            endpoint = %self.description.endpoint(),
            kind = %self.kind,
            "Routing handle disposed"
        );
    }
}

/// Reference-counted capability to run operations against one server.
///
/// Not `Clone`: use [`fork`](Self::fork) to share it, and drop every fork
/// to dispose it.
#[derive(Debug)]
pub struct RoutingHandle {
    inner: Arc<HandleInner>,
}

impl RoutingHandle {
    fn new(
        server: Arc<dyn Server>,
        read_preference: ReadPreference,
        writable: bool,
        kind: HandleKind,
        connect_timeout: Duration,
        channel: Option<Channel>,
    ) -> Self {
        let description = server.description();
        let writable = writable && description.server_type().is_writable();
        Self {
            inner: Arc::new(HandleInner {
                server,
                description,
                read_preference,
                writable,
                kind,
                connect_timeout,
                channel: Mutex::new(channel),
            }),
        }
    }

    /// Returns another reference to this handle. No network resource is
    /// opened.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }

    /// Returns how many forks of this handle are alive.
    #[must_use]
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Returns the selected server's address.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        self.inner.description.endpoint()
    }

    /// Returns the selected server's description at selection time.
    #[must_use]
    pub fn description(&self) -> &ServerDescription {
        &self.inner.description
    }

    /// Returns the selected server.
    #[must_use]
    pub fn server(&self) -> &Arc<dyn Server> {
        &self.inner.server
    }

    /// Returns the read preference that selected the server.
    #[must_use]
    pub fn read_preference(&self) -> &ReadPreference {
        &self.inner.read_preference
    }

    /// Returns whether writes may be sent through this handle.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.inner.writable
    }

    /// Returns whether the handle is ad hoc or pinned.
    #[must_use]
    pub fn kind(&self) -> HandleKind {
        self.inner.kind
    }

    /// Returns whether both handles are forks of one another.
    #[must_use]
    pub fn shares_with(&self, other: &RoutingHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns the id of the open channel's connection, if one is open.
    #[must_use]
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.inner.channel.lock().as_ref().map(Channel::connection_id)
    }

    /// Returns a channel to the selected server, opening it on first use.
    ///
    /// Every fork of this handle gets the same connection.
    ///
    /// # Errors
    ///
    /// Returns the cluster's connection or authentication error, or
    /// `SelectionTimeout`/`Cancelled` when the deadline runs out first.
    pub fn channel(&self, deadline: &Deadline) -> Result<Channel> {
        let mut channel = self.inner.channel.lock();
        if let Some(open) = channel.as_ref() {
            return Ok(open.fork());
        }
        let opened = self.inner.server.open_channel(&deadline.effective(self.inner.connect_timeout))?;
        tracing::trace!(
            endpoint = %self.endpoint(),
            connection = %opened.connection_id(),
            "Opened channel for routing handle"
        );
        let forked = opened.fork();
        *channel = Some(opened);
        Ok(forked)
    }
}

/// Mints routing handles from the cluster.
#[derive(Debug)]
pub struct BindingFactory {
    cluster: Arc<dyn Cluster>,
    server_selection_timeout: Duration,
    connect_timeout: Duration,
    local_threshold: Duration,
    metrics: Arc<dyn RoutingMetrics>,
}

impl BindingFactory {
    /// Creates a factory selecting from `cluster` with the timeouts in
    /// `settings`.
    #[must_use]
    pub fn new(cluster: Arc<dyn Cluster>, settings: &ClientSettings) -> Self {
        Self {
            cluster,
            server_selection_timeout: settings.server_selection_timeout(),
            connect_timeout: settings.connect_timeout(),
            local_threshold: settings.local_threshold(),
            metrics: default_metrics(),
        }
    }

    /// Reports selections to `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn RoutingMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the cluster handles are minted from.
    #[must_use]
    pub fn cluster(&self) -> &Arc<dyn Cluster> {
        &self.cluster
    }

    /// Returns the selector used for `read_preference` and `intent`.
    ///
    /// Writes and primary reads need a writable member; every other read is
    /// constrained by the read preference.
    #[must_use]
    pub fn selector_for(
        &self,
        read_preference: &ReadPreference,
        intent: Intent,
    ) -> Box<dyn ServerSelector> {
        if intent == Intent::Write || read_preference.is_primary() {
            Box::new(WritableServerSelector)
        } else {
            Box::new(
                ReadPreferenceServerSelector::new(read_preference.clone())
                    .with_local_threshold(self.local_threshold),
            )
        }
    }

    /// Selects a server and wraps it in a new ad-hoc handle.
    ///
    /// The caller owns the only reference. Selection is bounded by the
    /// earlier of `deadline` and the server selection timeout.
    ///
    /// # Errors
    ///
    /// Returns `SelectionTimeout` when no member qualifies in time and
    /// `Cancelled` when the deadline's token fires.
    pub fn create_ad_hoc(
        &self,
        read_preference: &ReadPreference,
        intent: Intent,
        deadline: &Deadline,
    ) -> Result<RoutingHandle> {
        let selector = self.selector_for(read_preference, intent);
        let purpose = match intent {
            Intent::Read => SelectionPurpose::Read,
            Intent::Write => SelectionPurpose::Write,
        };
        let server = self.select(selector.as_ref(), purpose, deadline)?;
        let read_preference =
            if intent == Intent::Write { ReadPreference::primary() } else { read_preference.clone() };
        let writable = read_preference.is_primary();
        Ok(RoutingHandle::new(
            server,
            read_preference,
            writable,
            HandleKind::AdHoc,
            self.connect_timeout,
            None,
        ))
    }

    /// Selects a server, opens a channel to it, and wraps both in a pinned
    /// handle. Nothing is retained on failure.
    pub(crate) fn create_pinned(
        &self,
        selector: &dyn ServerSelector,
        read_preference: ReadPreference,
        deadline: &Deadline,
    ) -> Result<(RoutingHandle, ConnectionId)> {
        let server = self.select(selector, SelectionPurpose::Scope, deadline)?;
        let channel = server.open_channel(&deadline.effective(self.connect_timeout))?;
        let connection_id = channel.connection_id();
        let writable = read_preference.is_primary();
        let handle = RoutingHandle::new(
            server,
            read_preference,
            writable,
            HandleKind::Pinned,
            self.connect_timeout,
            Some(channel),
        );
        Ok((handle, connection_id))
    }

    /// Runs one bounded server selection, recording its outcome.
    pub(crate) fn select(
        &self,
        selector: &dyn ServerSelector,
        purpose: SelectionPurpose,
        deadline: &Deadline,
    ) -> Result<Arc<dyn Server>> {
        let started = Instant::now();
        let result =
            self.cluster.select_server(selector, &deadline.effective(self.server_selection_timeout));
        let elapsed = started.elapsed();
        self.metrics.record_selection(purpose, elapsed, result.is_ok());
        match &result {
            Ok(server) => tracing::debug!(
                selector = %selector,
                endpoint = %server.description().endpoint(),
                elapsed_ms = elapsed.as_millis(),
                "Selected server"
            ),
            Err(error) => tracing::debug!(
                selector = %selector,
                elapsed_ms = elapsed.as_millis(),
                error = %error,
                "Server selection failed"
            ),
        }
        result
    }
}
