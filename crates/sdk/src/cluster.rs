//! Contracts of the cluster collaborator.
//!
//! The wire protocol, authentication handshake, socket pooling, and
//! heartbeat monitoring live behind these traits. The routing layer only
//! reads topology snapshots, asks for a server that satisfies a selector,
//! and opens channels to it.
//!
//! ```text
//! Cluster ──select_server(selector, deadline)──► Server ──open_channel(deadline)──► Channel
//!    │                                                                                │
//!    └──subscribe(listener): topology change notifications                   fork() / drop
//! ```

use std::{fmt, sync::Arc};

use replica_routing_types::{ClusterDescription, Endpoint, ServerDescription};

use crate::{deadline::Deadline, error::Result, selector::ServerSelector};

/// Identifier returned by [`Cluster::subscribe`].
pub type SubscriptionId = u64;

/// Callback invoked with every new topology snapshot.
///
/// Listeners run on a thread owned by the cluster and must not block.
pub type DescriptionListener = Arc<dyn Fn(&Arc<ClusterDescription>) + Send + Sync>;

/// A monitored cluster of servers.
pub trait Cluster: Send + Sync + fmt::Debug {
    /// Returns the current topology snapshot. Thread-safe.
    fn description(&self) -> Arc<ClusterDescription>;

    /// Registers a listener for topology changes.
    fn subscribe(&self, listener: DescriptionListener) -> SubscriptionId;

    /// Removes a listener. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Blocks until a server satisfying `selector` is known, or the deadline
    /// passes.
    ///
    /// # Errors
    ///
    /// Returns `SelectionTimeout` when the deadline expires and `Cancelled`
    /// when the caller's token fires.
    fn select_server(
        &self,
        selector: &dyn ServerSelector,
        deadline: &Deadline,
    ) -> Result<Arc<dyn Server>>;
}

/// One selected cluster member.
pub trait Server: Send + Sync + fmt::Debug {
    /// Returns the member's description at selection time.
    fn description(&self) -> ServerDescription;

    /// Opens a channel to the member.
    ///
    /// # Errors
    ///
    /// Returns collaborator errors (connection, authentication) unchanged.
    fn open_channel(&self, deadline: &Deadline) -> Result<Channel>;
}

/// Identifier of one physical connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    endpoint: Endpoint,
    local_value: u64,
}

impl ConnectionId {
    /// Creates a connection id for the `local_value`-th connection to `endpoint`.
    #[must_use]
    pub fn new(endpoint: Endpoint, local_value: u64) -> Self {
        Self { endpoint, local_value }
    }

    /// Returns the server the connection goes to.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the client-assigned connection number.
    #[must_use]
    pub fn local_value(&self) -> u64 {
        self.local_value
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}@{}", self.local_value, self.endpoint)
    }
}

/// A physical connection owned by the cluster's pool.
pub trait Connection: Send + Sync + fmt::Debug {
    /// Returns the connection's identifier.
    fn id(&self) -> ConnectionId;

    /// Returns the connection to its pool. Called exactly once, when the
    /// last [`Channel`] sharing it is dropped.
    fn release(&self);
}

#[derive(Debug)]
struct ChannelInner {
    connection: Box<dyn Connection>,
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        self.connection.release();
    }
}

/// Reference-counted access to one physical connection.
///
/// [`fork`](Self::fork) hands out another reference to the same connection
/// without opening a new one. The connection is released when the last
/// reference is dropped, on every exit path.
#[derive(Debug)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Wraps a freshly opened connection.
    #[must_use]
    pub fn new(connection: Box<dyn Connection>) -> Self {
        Self { inner: Arc::new(ChannelInner { connection }) }
    }

    /// Returns another reference to the same connection.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }

    /// Returns the id of the underlying connection.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.inner.connection.id()
    }

    /// Returns how many channels currently share the connection.
    #[must_use]
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Returns whether both channels share one connection.
    #[must_use]
    pub fn shares_connection_with(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug)]
    struct CountingConnection {
        releases: Arc<AtomicUsize>,
    }

    impl Connection for CountingConnection {
        fn id(&self) -> ConnectionId {
            ConnectionId::new(Endpoint::new("db1", 27017), 7)
        }

        fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_fork_shares_connection_and_releases_once() {
        let releases = Arc::new(AtomicUsize::new(0));
        let channel = Channel::new(Box::new(CountingConnection { releases: Arc::clone(&releases) }));
        let fork = channel.fork();

        assert_eq!(channel.reference_count(), 2);
        assert!(channel.shares_connection_with(&fork));
        assert_eq!(fork.connection_id(), channel.connection_id());

        drop(channel);
        assert_eq!(releases.load(Ordering::SeqCst), 0);
        assert_eq!(fork.reference_count(), 1);

        drop(fork);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(Endpoint::new("db1", 27017), 3);
        assert_eq!(id.to_string(), "conn-3@db1:27017");
        assert_eq!(id.local_value(), 3);
    }
}
