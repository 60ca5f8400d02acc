//! Topology fixtures.
//!
//! Every member built here is connected and listens on the default port, so
//! tests only spell out what they are about: host names and roles.

use std::time::Duration;

use replica_routing_types::{
    ClusterDescription, ClusterType, DEFAULT_PORT, Endpoint, ServerDescription, ServerState,
    ServerType,
};

/// Replica set name used by [`replica_set`].
pub const REPLICA_SET_NAME: &str = "rs0";

/// A connected member at `host:27017`.
pub fn member(host: &str, server_type: ServerType) -> ServerDescription {
    ServerDescription::connected(Endpoint::new(host, DEFAULT_PORT), server_type)
}

/// A connected member carrying `tags`.
pub fn tagged_member(
    host: &str,
    server_type: ServerType,
    tags: &[(&str, &str)],
) -> ServerDescription {
    ServerDescription::builder()
        .endpoint(Endpoint::new(host, DEFAULT_PORT))
        .server_type(server_type)
        .state(ServerState::Connected)
        .tags(tags.iter().map(|(key, value)| ((*key).to_owned(), (*value).to_owned())).collect())
        .build()
}

/// A connected member with a measured round-trip time.
pub fn member_with_latency(
    host: &str,
    server_type: ServerType,
    round_trip_time: Duration,
) -> ServerDescription {
    ServerDescription::builder()
        .endpoint(Endpoint::new(host, DEFAULT_PORT))
        .server_type(server_type)
        .state(ServerState::Connected)
        .round_trip_time(round_trip_time)
        .build()
}

/// A member that is known but not connected.
pub fn disconnected(host: &str, server_type: ServerType) -> ServerDescription {
    ServerDescription::builder()
        .endpoint(Endpoint::new(host, DEFAULT_PORT))
        .server_type(server_type)
        .build()
}

/// A replica set named [`REPLICA_SET_NAME`].
pub fn replica_set(servers: &[ServerDescription]) -> ClusterDescription {
    ClusterDescription::builder()
        .cluster_type(ClusterType::ReplicaSet)
        .replica_set_name(REPLICA_SET_NAME)
        .servers(servers.to_vec())
        .build()
}

/// A sharded deployment reached through `routers`.
pub fn sharded(routers: &[ServerDescription]) -> ClusterDescription {
    ClusterDescription::builder()
        .cluster_type(ClusterType::Sharded)
        .servers(routers.to_vec())
        .build()
}

/// A single-server deployment.
pub fn standalone(server: ServerDescription) -> ClusterDescription {
    ClusterDescription::builder()
        .cluster_type(ClusterType::Standalone)
        .servers(vec![server])
        .build()
}
