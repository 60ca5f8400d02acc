//! Per-member descriptions as reported by cluster monitoring.

use std::{collections::BTreeMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;

/// Role a member plays in its deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerType {
    /// A single server that is not part of a replica set.
    Standalone,
    /// A query router in a sharded deployment.
    ShardRouter,
    /// The replica set member currently accepting writes.
    ReplicaSetPrimary,
    /// A replica set member replicating from the primary.
    ReplicaSetSecondary,
    /// A voting member that holds no data.
    ReplicaSetArbiter,
    /// A hidden, starting-up, or otherwise non-routable member.
    ReplicaSetOther,
    /// A member that is reachable but has no replica set configuration yet.
    ReplicaSetGhost,
    /// Monitoring has not classified the member.
    #[default]
    Unknown,
}

impl ServerType {
    /// Returns whether the member accepts writes.
    #[must_use]
    pub fn is_writable(self) -> bool {
        matches!(self, Self::Standalone | Self::ShardRouter | Self::ReplicaSetPrimary)
    }

    /// Returns whether the member holds data that reads can be served from.
    #[must_use]
    pub fn is_data_bearing(self) -> bool {
        matches!(
            self,
            Self::Standalone | Self::ShardRouter | Self::ReplicaSetPrimary | Self::ReplicaSetSecondary
        )
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Standalone => "standalone",
            Self::ShardRouter => "shard_router",
            Self::ReplicaSetPrimary => "rs_primary",
            Self::ReplicaSetSecondary => "rs_secondary",
            Self::ReplicaSetArbiter => "rs_arbiter",
            Self::ReplicaSetOther => "rs_other",
            Self::ReplicaSetGhost => "rs_ghost",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Connection state of a member as last observed by monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    /// No monitoring connection.
    #[default]
    Disconnected,
    /// A monitoring connection is being established.
    Connecting,
    /// The member answered its most recent heartbeat.
    Connected,
}

/// Snapshot of one member's monitored state.
///
/// Descriptions are immutable values; monitoring publishes a fresh one on
/// every change.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[builder(derive(Debug))]
pub struct ServerDescription {
    /// Address of the member.
    endpoint: Endpoint,

    /// Role classification.
    #[builder(default)]
    #[serde(default)]
    server_type: ServerType,

    /// Connection state.
    #[builder(default)]
    #[serde(default)]
    state: ServerState,

    /// Replica set member tags used by tag-set read preferences.
    #[builder(default)]
    #[serde(default)]
    tags: BTreeMap<String, String>,

    /// Average heartbeat round-trip time, when measured.
    #[serde(default)]
    round_trip_time: Option<Duration>,
}

impl ServerDescription {
    /// Creates a connected member description with no tags or latency data.
    #[must_use]
    pub fn connected(endpoint: Endpoint, server_type: ServerType) -> Self {
        Self::builder().endpoint(endpoint).server_type(server_type).state(ServerState::Connected).build()
    }

    /// Returns the member's address.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the member's role.
    #[must_use]
    pub fn server_type(&self) -> ServerType {
        self.server_type
    }

    /// Returns the member's connection state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Returns whether the member answered its last heartbeat.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ServerState::Connected
    }

    /// Returns the member's tags.
    #[must_use]
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Returns the measured round-trip time, if any.
    #[must_use]
    pub fn round_trip_time(&self) -> Option<Duration> {
        self.round_trip_time
    }
}
