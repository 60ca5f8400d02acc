//! Server selection policies.
//!
//! A [`ServerSelector`] narrows a candidate list to the members acceptable
//! for one unit of work. Selectors are pure: they read the cluster snapshot
//! for deployment context and return a subset of the candidates they were
//! given, so the same selector can be evaluated against the whole topology
//! or against a single already-pinned member.
//!
//! Only connected members whose role fits the deployment shape are ever
//! eligible.

use std::{fmt, time::Duration};

use replica_routing_types::{
    ClusterDescription, ClusterType, Endpoint, ReadPreference, ReadPreferenceMode,
    ServerDescription, ServerType,
};

/// Default width of the latency window above the fastest eligible member.
pub const DEFAULT_LOCAL_THRESHOLD: Duration = Duration::from_millis(15);

/// Narrows candidate members to those acceptable for an operation.
pub trait ServerSelector: Send + Sync + fmt::Debug + fmt::Display {
    /// Returns the acceptable subset of `candidates`, in preference order.
    fn select<'a>(
        &self,
        cluster: &ClusterDescription,
        candidates: &'a [ServerDescription],
    ) -> Vec<&'a ServerDescription>;
}

/// Returns whether a member with `server_type` can serve traffic in a
/// deployment of `cluster_type`.
fn fits_deployment(cluster_type: ClusterType, server_type: ServerType) -> bool {
    match cluster_type {
        ClusterType::Standalone => server_type == ServerType::Standalone,
        ClusterType::Sharded => server_type == ServerType::ShardRouter,
        ClusterType::ReplicaSet => matches!(
            server_type,
            ServerType::ReplicaSetPrimary | ServerType::ReplicaSetSecondary
        ),
        ClusterType::Unknown => false,
    }
}

fn eligible<'a>(
    cluster: &ClusterDescription,
    candidates: &'a [ServerDescription],
) -> impl Iterator<Item = &'a ServerDescription> {
    let cluster_type = cluster.cluster_type();
    candidates
        .iter()
        .filter(move |server| server.is_connected() && fits_deployment(cluster_type, server.server_type()))
}

/// Selects members that accept writes: the standalone server, any router,
/// or the replica set primary.
#[derive(Debug, Clone, Copy, Default)]
pub struct WritableServerSelector;

impl ServerSelector for WritableServerSelector {
    fn select<'a>(
        &self,
        cluster: &ClusterDescription,
        candidates: &'a [ServerDescription],
    ) -> Vec<&'a ServerDescription> {
        eligible(cluster, candidates).filter(|server| server.server_type().is_writable()).collect()
    }
}

impl fmt::Display for WritableServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a writable server")
    }
}

/// Selects members according to a [`ReadPreference`].
///
/// Against a replica set the mode decides between primary and secondaries,
/// tag sets are tried in order, and the survivors are cut to a latency
/// window `local_threshold` wide above the fastest one. Standalone and
/// sharded deployments ignore the mode: every eligible member qualifies.
#[derive(Debug, Clone)]
pub struct ReadPreferenceServerSelector {
    read_preference: ReadPreference,
    local_threshold: Duration,
}

impl ReadPreferenceServerSelector {
    /// Creates a selector with the default latency window.
    #[must_use]
    pub fn new(read_preference: ReadPreference) -> Self {
        Self { read_preference, local_threshold: DEFAULT_LOCAL_THRESHOLD }
    }

    /// Overrides the latency window width.
    #[must_use]
    pub fn with_local_threshold(mut self, local_threshold: Duration) -> Self {
        self.local_threshold = local_threshold;
        self
    }

    /// Returns the read preference this selector enforces.
    #[must_use]
    pub fn read_preference(&self) -> &ReadPreference {
        &self.read_preference
    }

    fn matching_tags<'a>(&self, servers: Vec<&'a ServerDescription>) -> Vec<&'a ServerDescription> {
        let tag_sets = self.read_preference.tag_sets();
        if tag_sets.is_empty() {
            return servers;
        }
        for tag_set in tag_sets {
            let matching: Vec<_> =
                servers.iter().copied().filter(|server| tag_set.matches(server)).collect();
            if !matching.is_empty() {
                return matching;
            }
        }
        Vec::new()
    }

    fn within_latency_window<'a>(
        &self,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        let Some(fastest) = servers.iter().filter_map(|server| server.round_trip_time()).min() else {
            return servers;
        };
        let ceiling = fastest.saturating_add(self.local_threshold);
        servers
            .into_iter()
            .filter(|server| server.round_trip_time().is_none_or(|rtt| rtt <= ceiling))
            .collect()
    }
}

impl ServerSelector for ReadPreferenceServerSelector {
    fn select<'a>(
        &self,
        cluster: &ClusterDescription,
        candidates: &'a [ServerDescription],
    ) -> Vec<&'a ServerDescription> {
        let eligible: Vec<_> = eligible(cluster, candidates).collect();
        if cluster.cluster_type() != ClusterType::ReplicaSet {
            return self.within_latency_window(eligible);
        }

        let (primaries, secondaries): (Vec<_>, Vec<_>) = eligible
            .iter()
            .copied()
            .partition(|server| server.server_type() == ServerType::ReplicaSetPrimary);

        let selected = match self.read_preference.mode() {
            ReadPreferenceMode::Primary => primaries,
            ReadPreferenceMode::PrimaryPreferred if !primaries.is_empty() => primaries,
            ReadPreferenceMode::PrimaryPreferred | ReadPreferenceMode::Secondary => {
                self.matching_tags(secondaries)
            },
            ReadPreferenceMode::SecondaryPreferred => {
                let secondaries = self.matching_tags(secondaries);
                if secondaries.is_empty() { primaries } else { secondaries }
            },
            ReadPreferenceMode::Nearest => self.matching_tags(eligible),
        };

        self.within_latency_window(selected)
    }
}

impl fmt::Display for ReadPreferenceServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a server matching read preference {}", self.read_preference)
    }
}

/// Selects one specific member by address.
#[derive(Debug, Clone)]
pub struct EndpointServerSelector {
    endpoint: Endpoint,
}

impl EndpointServerSelector {
    /// Creates a selector for `endpoint`.
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }
}

impl ServerSelector for EndpointServerSelector {
    fn select<'a>(
        &self,
        _cluster: &ClusterDescription,
        candidates: &'a [ServerDescription],
    ) -> Vec<&'a ServerDescription> {
        candidates
            .iter()
            .filter(|server| server.is_connected() && server.endpoint() == &self.endpoint)
            .collect()
    }
}

impl fmt::Display for EndpointServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server {}", self.endpoint)
    }
}
