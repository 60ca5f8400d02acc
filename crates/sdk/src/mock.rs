//! In-process mock cluster for routing tests.
//!
//! [`MockCluster`] implements the cluster collaborator contracts without any
//! network: the topology is set by the test, server selection blocks until
//! the topology offers an eligible member, and channels are counted so tests
//! can assert that every connection is released exactly once.
//!
//! # Features
//!
//! - **Settable topology**: [`MockCluster::set_description`] publishes a new
//!   snapshot, wakes blocked selections, and notifies subscribers on the
//!   caller's thread
//! - **Deadline-aware selection**: blocked selections return
//!   `SelectionTimeout` or `Cancelled` promptly
//! - **Failure injection**: make channel opening fail with a connection or
//!   authentication error
//! - **Counters**: selections, opened and released connections
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use replica_routing_sdk::{ClientSettings, RequestContext, RoutingClient, mock::MockCluster};
//! use replica_routing_types::{ClusterDescription, ClusterType, Endpoint, ServerDescription, ServerType};
//!
//! let cluster = MockCluster::new(
//!     ClusterDescription::builder()
//!         .cluster_type(ClusterType::Standalone)
//!         .servers(vec![ServerDescription::connected(Endpoint::new("db1", 27017), ServerType::Standalone)])
//!         .build(),
//! );
//! let settings = ClientSettings::builder().with_seed("db1").build().unwrap();
//! let client = RoutingClient::new(settings, cluster.clone());
//!
//! let mut context = RequestContext::new();
//! let scope = client.start_scope(&mut context).unwrap();
//! assert_eq!(cluster.open_connections(), 1);
//! drop(scope);
//! assert_eq!(cluster.open_connections(), 0);
//! ```

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use parking_lot::{Condvar, Mutex, RwLock};
use replica_routing_types::{ClusterDescription, ServerDescription};

use crate::{
    cluster::{
        Channel, Cluster, Connection, ConnectionId, DescriptionListener, Server, SubscriptionId,
    },
    config::ClientSettings,
    deadline::Deadline,
    error::{AuthenticationSnafu, ConnectionSnafu, Result},
    factory::ClusterConnector,
    selector::ServerSelector,
};

/// Failure injected into channel opening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    /// The server could not be reached.
    Connection(String),
    /// The server rejected the handshake.
    Authentication(String),
}

#[derive(Debug, Default)]
struct MockShared {
    selections: AtomicUsize,
    opened: AtomicUsize,
    released: AtomicUsize,
    next_connection: AtomicU64,
    failure: RwLock<Option<MockFailure>>,
}

/// Controllable in-process cluster.
pub struct MockCluster {
    description: Mutex<Arc<ClusterDescription>>,
    changed: Condvar,
    listeners: Mutex<BTreeMap<SubscriptionId, DescriptionListener>>,
    next_subscription: AtomicU64,
    shared: Arc<MockShared>,
}

impl MockCluster {
    /// Creates a cluster reporting `description`.
    #[must_use]
    pub fn new(description: ClusterDescription) -> Arc<Self> {
        Arc::new(Self {
            description: Mutex::new(Arc::new(description)),
            changed: Condvar::new(),
            listeners: Mutex::new(BTreeMap::new()),
            next_subscription: AtomicU64::new(1),
            shared: Arc::new(MockShared::default()),
        })
    }

    /// Publishes a new topology.
    ///
    /// Blocked selections re-evaluate immediately. Subscribers are invoked
    /// on the calling thread before this returns, outside every internal
    /// lock.
    pub fn set_description(&self, description: ClusterDescription) {
        let description = Arc::new(description);
        *self.description.lock() = Arc::clone(&description);
        self.changed.notify_all();

        let listeners: Vec<DescriptionListener> = self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener(&description);
        }
    }

    /// Makes every subsequent channel open fail, or clears the failure.
    pub fn set_open_failure(&self, failure: Option<MockFailure>) {
        *self.shared.failure.write() = failure;
    }

    /// Returns how many selections succeeded.
    #[must_use]
    pub fn selections(&self) -> usize {
        self.shared.selections.load(Ordering::SeqCst)
    }

    /// Returns how many connections were opened.
    #[must_use]
    pub fn opened_connections(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Returns how many connections were released.
    #[must_use]
    pub fn released_connections(&self) -> usize {
        self.shared.released.load(Ordering::SeqCst)
    }

    /// Returns how many connections are currently open.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.opened_connections().saturating_sub(self.released_connections())
    }

    /// Returns how many listeners are subscribed.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl Cluster for MockCluster {
    fn description(&self) -> Arc<ClusterDescription> {
        Arc::clone(&*self.description.lock())
    }

    fn subscribe(&self, listener: DescriptionListener) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().insert(id, listener);
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.lock().remove(&id);
    }

    fn select_server(
        &self,
        selector: &dyn ServerSelector,
        deadline: &Deadline,
    ) -> Result<Arc<dyn Server>> {
        let waiting_for = selector.to_string();
        let mut description = self.description.lock();
        loop {
            let current = Arc::clone(&*description);
            if let Some(selected) = selector.select(&current, current.servers()).first() {
                self.shared.selections.fetch_add(1, Ordering::SeqCst);
                return Ok(Arc::new(MockServer {
                    description: (*selected).clone(),
                    shared: Arc::clone(&self.shared),
                }));
            }
            deadline.check(&waiting_for)?;
            self.changed.wait_for(&mut description, deadline.next_wait());
        }
    }
}

impl fmt::Debug for MockCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockCluster")
            .field("description", &self.description.lock())
            .field("listeners", &self.listener_count())
            .field("selections", &self.selections())
            .field("open_connections", &self.open_connections())
            .finish()
    }
}

/// Server handed out by [`MockCluster::select_server`].
#[derive(Debug)]
pub struct MockServer {
    description: ServerDescription,
    shared: Arc<MockShared>,
}

impl Server for MockServer {
    fn description(&self) -> ServerDescription {
        self.description.clone()
    }

    fn open_channel(&self, deadline: &Deadline) -> Result<Channel> {
        deadline.check(&format!("a connection to {}", self.description.endpoint()))?;
        let endpoint = self.description.endpoint().clone();
        match self.shared.failure.read().clone() {
            Some(MockFailure::Connection(message)) => {
                return ConnectionSnafu { endpoint, message }.fail();
            },
            Some(MockFailure::Authentication(message)) => {
                return AuthenticationSnafu { endpoint, message }.fail();
            },
            None => {},
        }

        let local_value = self.shared.next_connection.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Channel::new(Box::new(MockConnection {
            id: ConnectionId::new(endpoint, local_value),
            shared: Arc::clone(&self.shared),
        })))
    }
}

#[derive(Debug)]
struct MockConnection {
    id: ConnectionId,
    shared: Arc<MockShared>,
}

impl Connection for MockConnection {
    fn id(&self) -> ConnectionId {
        self.id.clone()
    }

    fn release(&self) {
        self.shared.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector that hands out one new [`MockCluster`] per settings value.
#[derive(Debug)]
pub struct MockConnector {
    description: ClusterDescription,
    connected: Mutex<Vec<Arc<MockCluster>>>,
}

impl MockConnector {
    /// Creates a connector whose clusters start with `description`.
    #[must_use]
    pub fn new(description: ClusterDescription) -> Self {
        Self { description, connected: Mutex::new(Vec::new()) }
    }

    /// Returns every cluster created so far.
    #[must_use]
    pub fn clusters(&self) -> Vec<Arc<MockCluster>> {
        self.connected.lock().clone()
    }
}

impl ClusterConnector for MockConnector {
    fn connect(&self, _settings: &ClientSettings) -> Result<Arc<dyn Cluster>> {
        let cluster = MockCluster::new(self.description.clone());
        self.connected.lock().push(Arc::clone(&cluster));
        Ok(cluster)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{
        thread,
        time::{Duration, Instant},
    };

    use replica_routing_test_utils::fixtures::{member, replica_set};
    use replica_routing_types::ServerType;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        error::ErrorKind,
        selector::{EndpointServerSelector, WritableServerSelector},
    };

    #[test]
    fn test_select_returns_first_eligible() {
        let cluster = MockCluster::new(replica_set(&[
            member("a", ServerType::ReplicaSetSecondary),
            member("b", ServerType::ReplicaSetPrimary),
        ]));
        let server = cluster.select_server(&WritableServerSelector, &Deadline::none()).unwrap();

        assert_eq!(server.description().endpoint().host(), "b");
        assert_eq!(cluster.selections(), 1);
    }

    #[test]
    fn test_select_wakes_on_topology_change() {
        let cluster = MockCluster::new(replica_set(&[member("a", ServerType::ReplicaSetSecondary)]));
        let publisher = Arc::clone(&cluster);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            publisher.set_description(replica_set(&[member("a", ServerType::ReplicaSetPrimary)]));
        });

        let server = cluster
            .select_server(&WritableServerSelector, &Deadline::after(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(server.description().endpoint().host(), "a");
        handle.join().unwrap();
    }

    #[test]
    fn test_select_honours_cancellation() {
        let cluster = MockCluster::new(replica_set(&[]));
        let token = CancellationToken::new();
        let canceller = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            canceller.cancel();
        });

        let started = Instant::now();
        let err = cluster
            .select_server(&WritableServerSelector, &Deadline::none().with_cancellation(token))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(2));
        handle.join().unwrap();
    }

    #[test]
    fn test_injected_failures_pass_through() {
        let cluster = MockCluster::new(replica_set(&[member("a", ServerType::ReplicaSetPrimary)]));
        let selector = EndpointServerSelector::new(replica_routing_types::Endpoint::new("a", 27017));
        let server = cluster.select_server(&selector, &Deadline::none()).unwrap();

        cluster.set_open_failure(Some(MockFailure::Authentication("bad credentials".to_owned())));
        let err = server.open_channel(&Deadline::none()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cluster);
        assert!(err.to_string().contains("bad credentials"));

        cluster.set_open_failure(None);
        let channel = server.open_channel(&Deadline::none()).unwrap();
        assert_eq!(channel.connection_id().local_value(), 1);
        assert_eq!(cluster.open_connections(), 1);
        drop(channel);
        assert_eq!(cluster.open_connections(), 0);
    }

    #[test]
    fn test_listeners_fire_until_unsubscribed() {
        let cluster = MockCluster::new(replica_set(&[]));
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let id = cluster.subscribe(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        cluster.set_description(replica_set(&[member("a", ServerType::ReplicaSetPrimary)]));
        cluster.unsubscribe(id);
        cluster.set_description(replica_set(&[]));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(cluster.listener_count(), 0);
    }
}
