//! Explicit client cache owned by application startup code.
//!
//! A [`ClientFactory`] hands out one [`RoutingClient`] per distinct
//! [`ClientSettings`] value. Clusters are obtained through an injected
//! [`ClusterConnector`], so the factory never reaches for global state and
//! tests can run several independent factories side by side.

use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::Mutex;
use snafu::ensure;

use crate::{
    client::RoutingClient,
    cluster::Cluster,
    config::ClientSettings,
    error::{ClientLimitSnafu, ConfigSnafu, Result},
    metrics::{RoutingMetrics, default_metrics},
};

/// Default upper bound on clients held by one factory.
pub const DEFAULT_MAX_CLIENTS: usize = 100;

/// Opens the cluster collaborator for a settings value.
pub trait ClusterConnector: Send + Sync + fmt::Debug {
    /// Returns a monitored cluster seeded from `settings`.
    ///
    /// # Errors
    ///
    /// Returns the collaborator's error when the cluster cannot be set up.
    fn connect(&self, settings: &ClientSettings) -> Result<Arc<dyn Cluster>>;
}

/// Cache of routing clients keyed by settings.
pub struct ClientFactory {
    connector: Arc<dyn ClusterConnector>,
    clients: Mutex<HashMap<ClientSettings, RoutingClient>>,
    max_clients: usize,
    metrics: Arc<dyn RoutingMetrics>,
}

impl ClientFactory {
    /// Creates an empty factory using `connector`.
    #[must_use]
    pub fn new(connector: Arc<dyn ClusterConnector>) -> Self {
        Self {
            connector,
            clients: Mutex::new(HashMap::new()),
            max_clients: DEFAULT_MAX_CLIENTS,
            metrics: default_metrics(),
        }
    }

    /// Sets the maximum number of clients.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `max_clients` is zero.
    pub fn with_max_clients(mut self, max_clients: usize) -> Result<Self> {
        ensure!(max_clients > 0, ConfigSnafu { message: "max_clients cannot be zero" });
        self.max_clients = max_clients;
        Ok(self)
    }

    /// Sets the metrics sink handed to every client created afterwards.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn RoutingMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the client for `settings`, creating it on first use.
    ///
    /// Equal settings always yield clones of the same client.
    ///
    /// # Errors
    ///
    /// Returns `ClientLimit` when a new client would exceed the maximum, or
    /// the connector's error.
    pub fn get_or_create(&self, settings: &ClientSettings) -> Result<RoutingClient> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(settings) {
            return Ok(client.clone());
        }
        ensure!(clients.len() < self.max_clients, ClientLimitSnafu { max: self.max_clients });

        let cluster = self.connector.connect(settings)?;
        let client = RoutingClient::with_metrics(settings.clone(), cluster, Arc::clone(&self.metrics));
        tracing::info!(
            client = client.sequential_id(),
            clients = clients.len() + 1,
            "Registered routing client"
        );
        clients.insert(settings.clone(), client.clone());
        Ok(client)
    }

    /// Forgets the client for `settings`, returning it if present.
    ///
    /// Outstanding clones keep working; the next `get_or_create` with equal
    /// settings builds a new client.
    pub fn unregister(&self, settings: &ClientSettings) -> Option<RoutingClient> {
        let removed = self.clients.lock().remove(settings);
        if let Some(client) = &removed {
            tracing::debug!(client = client.sequential_id(), "Unregistered routing client");
        }
        removed
    }

    /// Forgets every client.
    pub fn unregister_all(&self) {
        let drained: Vec<RoutingClient> =
            self.clients.lock().drain().map(|(_, client)| client).collect();
        tracing::debug!(count = drained.len(), "Unregistered all routing clients");
    }

    /// Returns every registered client, ordered by sequential id.
    #[must_use]
    pub fn clients(&self) -> Vec<RoutingClient> {
        let mut clients: Vec<_> = self.clients.lock().values().cloned().collect();
        clients.sort_by_key(RoutingClient::sequential_id);
        clients
    }

    /// Returns the number of registered clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    /// Returns true if no client is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Returns the maximum number of clients.
    #[must_use]
    pub fn max_clients(&self) -> usize {
        self.max_clients
    }
}

impl fmt::Debug for ClientFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientFactory")
            .field("connector", &self.connector)
            .field("clients", &self.len())
            .field("max_clients", &self.max_clients)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use replica_routing_test_utils::fixtures::{member, replica_set};
    use replica_routing_types::{ReadPreference, ServerType};

    use super::*;
    use crate::{error::ErrorKind, mock::MockConnector};

    fn connector() -> Arc<MockConnector> {
        Arc::new(MockConnector::new(replica_set(&[member("a", ServerType::ReplicaSetPrimary)])))
    }

    fn settings(seed: &str) -> ClientSettings {
        ClientSettings::builder().with_seed(seed).build().unwrap()
    }

    #[test]
    fn test_equal_settings_share_client() {
        let connector = connector();
        let factory = ClientFactory::new(connector.clone());

        let first = factory.get_or_create(&settings("a")).unwrap();
        let second = factory.get_or_create(&settings("a:27017")).unwrap();

        assert_eq!(first.sequential_id(), second.sequential_id());
        assert_eq!(factory.len(), 1);
        assert_eq!(connector.clusters().len(), 1);
    }

    #[test]
    fn test_distinct_settings_get_distinct_clients() {
        let factory = ClientFactory::new(connector());
        let primary = settings("a");
        let secondary = primary.with_read_preference(ReadPreference::secondary());

        let a = factory.get_or_create(&primary).unwrap();
        let b = factory.get_or_create(&secondary).unwrap();

        assert_ne!(a.sequential_id(), b.sequential_id());
        let ids: Vec<u64> = factory.clients().iter().map(RoutingClient::sequential_id).collect();
        assert_eq!(ids, vec![a.sequential_id(), b.sequential_id()]);
    }

    #[test]
    fn test_client_limit() {
        let factory = ClientFactory::new(connector()).with_max_clients(2).unwrap();
        factory.get_or_create(&settings("a")).unwrap();
        factory.get_or_create(&settings("b")).unwrap();

        let err = factory.get_or_create(&settings("c")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClientLimit);
        assert!(err.to_string().contains('2'));

        // Existing settings still resolve at the limit.
        factory.get_or_create(&settings("a")).unwrap();
    }

    #[test]
    fn test_zero_max_clients_rejected() {
        let err = ClientFactory::new(connector()).with_max_clients(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_unregister_makes_room() {
        let factory = ClientFactory::new(connector()).with_max_clients(1).unwrap();
        let first = factory.get_or_create(&settings("a")).unwrap();

        let removed = factory.unregister(&settings("a")).unwrap();
        assert_eq!(removed.sequential_id(), first.sequential_id());
        assert!(factory.is_empty());

        let replacement = factory.get_or_create(&settings("a")).unwrap();
        assert_ne!(replacement.sequential_id(), first.sequential_id());
        assert!(factory.unregister(&settings("b")).is_none());
    }

    #[test]
    fn test_unregister_all() {
        let factory = ClientFactory::new(connector());
        factory.get_or_create(&settings("a")).unwrap();
        factory.get_or_create(&settings("b")).unwrap();

        factory.unregister_all();
        assert!(factory.is_empty());
        assert_eq!(factory.max_clients(), DEFAULT_MAX_CLIENTS);
    }
}
