//! Whole-topology snapshots.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{endpoint::Endpoint, server::ServerDescription};

/// Deployment shape of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterType {
    /// A single standalone server.
    Standalone,
    /// A replica set.
    ReplicaSet,
    /// A sharded deployment reached through routers.
    Sharded,
    /// Monitoring has not determined the shape yet.
    #[default]
    Unknown,
}

/// Immutable snapshot of every member the cluster currently knows about.
///
/// A new snapshot is published on every topology change. Duplicate
/// endpoints are tolerated; the first description for an endpoint wins.
#[derive(Debug, Clone, PartialEq, Eq, Default, bon::Builder, Serialize, Deserialize)]
#[builder(derive(Debug))]
pub struct ClusterDescription {
    /// Deployment shape.
    #[builder(default)]
    #[serde(default)]
    cluster_type: ClusterType,

    /// Replica set name, when the deployment is a replica set.
    #[builder(into)]
    #[serde(default)]
    replica_set_name: Option<String>,

    /// Member descriptions.
    #[builder(default)]
    #[serde(default)]
    servers: Vec<ServerDescription>,
}

impl ClusterDescription {
    /// Returns the deployment shape.
    #[must_use]
    pub fn cluster_type(&self) -> ClusterType {
        self.cluster_type
    }

    /// Returns the replica set name, if any.
    #[must_use]
    pub fn replica_set_name(&self) -> Option<&str> {
        self.replica_set_name.as_deref()
    }

    /// Returns all member descriptions in reported order.
    #[must_use]
    pub fn servers(&self) -> &[ServerDescription] {
        &self.servers
    }

    /// Returns the set of distinct member endpoints.
    #[must_use]
    pub fn endpoints(&self) -> BTreeSet<Endpoint> {
        self.servers.iter().map(|server| server.endpoint().clone()).collect()
    }

    /// Returns the description for `endpoint`, if it is a member.
    #[must_use]
    pub fn server(&self, endpoint: &Endpoint) -> Option<&ServerDescription> {
        self.servers.iter().find(|server| server.endpoint() == endpoint)
    }

    /// Returns whether the snapshot has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::server::ServerType;

    fn member(host: &str, server_type: ServerType) -> ServerDescription {
        ServerDescription::connected(Endpoint::new(host, 27017), server_type)
    }

    #[test]
    fn test_default_is_empty_unknown() {
        let description = ClusterDescription::default();
        assert_eq!(description.cluster_type(), ClusterType::Unknown);
        assert!(description.is_empty());
        assert!(description.endpoints().is_empty());
    }

    #[test]
    fn test_endpoints_are_deduplicated() {
        let description = ClusterDescription::builder()
            .cluster_type(ClusterType::ReplicaSet)
            .replica_set_name("rs0")
            .servers(vec![
                member("b", ServerType::ReplicaSetSecondary),
                member("a", ServerType::ReplicaSetPrimary),
                member("b", ServerType::ReplicaSetArbiter),
            ])
            .build();

        let endpoints: Vec<Endpoint> = description.endpoints().into_iter().collect();
        assert_eq!(endpoints, vec![Endpoint::new("a", 27017), Endpoint::new("b", 27017)]);
        assert_eq!(description.replica_set_name(), Some("rs0"));
    }

    #[test]
    fn test_server_lookup_returns_first_match() {
        let description = ClusterDescription::builder()
            .servers(vec![
                member("b", ServerType::ReplicaSetSecondary),
                member("b", ServerType::ReplicaSetArbiter),
            ])
            .build();

        let found = description.server(&Endpoint::new("b", 27017)).unwrap();
        assert_eq!(found.server_type(), ServerType::ReplicaSetSecondary);
        assert!(description.server(&Endpoint::new("z", 27017)).is_none());
    }
}
