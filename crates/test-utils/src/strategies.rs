//! Proptest strategies for replica routing value types.
//!
//! Reusable generators for property-based testing across crates. Strategies produce
//! well-formed topology values while exploring edge cases through random variation.
//!
//! # Usage
//!
//! ```no_run
//! use replica_routing_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(description in strategies::arb_replica_set()) {
//!         // test invariant with a randomly generated topology
//!     }
//! }
//! ```

use std::time::Duration;

use proptest::prelude::*;
use replica_routing_types::{
    ClusterDescription, ClusterType, Endpoint, ReadPreference, ReadPreferenceMode,
    ServerDescription, ServerState, ServerType, TagSet,
};

use crate::fixtures::REPLICA_SET_NAME;

/// Generates a host name from a small pool so collisions are common.
pub fn arb_host() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "b", "c", "d", "e", "f"]).prop_map(str::to_owned)
}

/// Generates an endpoint on one of two ports.
pub fn arb_endpoint() -> impl Strategy<Value = Endpoint> {
    (arb_host(), prop::sample::select(vec![27017u16, 27018]))
        .prop_map(|(host, port)| Endpoint::new(host, port))
}

/// Generates any server type.
pub fn arb_server_type() -> impl Strategy<Value = ServerType> {
    prop::sample::select(vec![
        ServerType::Standalone,
        ServerType::ShardRouter,
        ServerType::ReplicaSetPrimary,
        ServerType::ReplicaSetSecondary,
        ServerType::ReplicaSetArbiter,
        ServerType::ReplicaSetOther,
        ServerType::ReplicaSetGhost,
        ServerType::Unknown,
    ])
}

/// Generates a replica set role: secondary, arbiter, or other.
pub fn arb_non_primary_role() -> impl Strategy<Value = ServerType> {
    prop::sample::select(vec![
        ServerType::ReplicaSetSecondary,
        ServerType::ReplicaSetArbiter,
        ServerType::ReplicaSetOther,
    ])
}

/// Generates a `dc` tag map with zero or one entry.
pub fn arb_tags() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::option::of(prop::sample::select(vec!["east", "west"])).prop_map(|dc| {
        dc.map(|dc| vec![("dc".to_owned(), dc.to_owned())]).unwrap_or_default()
    })
}

/// Generates a member description with arbitrary role, state, tags and latency.
pub fn arb_server_description() -> impl Strategy<Value = ServerDescription> {
    (
        arb_endpoint(),
        arb_server_type(),
        any::<bool>(),
        arb_tags(),
        prop::option::of(1u64..200),
    )
        .prop_map(|(endpoint, server_type, connected, tags, rtt)| {
            let state = if connected { ServerState::Connected } else { ServerState::Disconnected };
            let builder = ServerDescription::builder()
                .endpoint(endpoint)
                .server_type(server_type)
                .state(state)
                .tags(tags.into_iter().collect());
            match rtt {
                Some(ms) => builder.round_trip_time(Duration::from_millis(ms)).build(),
                None => builder.build(),
            }
        })
}

/// Generates a replica set with at most one primary and 0-5 other members.
///
/// Endpoints may repeat; the first description for an endpoint wins.
pub fn arb_replica_set() -> impl Strategy<Value = ClusterDescription> {
    (
        prop::option::of(arb_host()),
        prop::collection::vec((arb_host(), arb_non_primary_role()), 0..6),
    )
        .prop_map(|(primary, others)| {
            let mut servers = Vec::with_capacity(others.len() + 1);
            if let Some(host) = primary {
                servers.push(ServerDescription::connected(
                    Endpoint::new(host, replica_routing_types::DEFAULT_PORT),
                    ServerType::ReplicaSetPrimary,
                ));
            }
            servers.extend(others.into_iter().map(|(host, role)| {
                ServerDescription::connected(
                    Endpoint::new(host, replica_routing_types::DEFAULT_PORT),
                    role,
                )
            }));
            ClusterDescription::builder()
                .cluster_type(ClusterType::ReplicaSet)
                .replica_set_name(REPLICA_SET_NAME)
                .servers(servers)
                .build()
        })
}

/// Generates any read preference mode.
pub fn arb_read_preference_mode() -> impl Strategy<Value = ReadPreferenceMode> {
    prop::sample::select(vec![
        ReadPreferenceMode::Primary,
        ReadPreferenceMode::PrimaryPreferred,
        ReadPreferenceMode::Secondary,
        ReadPreferenceMode::SecondaryPreferred,
        ReadPreferenceMode::Nearest,
    ])
}

/// Generates a valid read preference.
///
/// Primary never carries tag sets; other modes carry up to two.
pub fn arb_read_preference() -> impl Strategy<Value = ReadPreference> {
    (arb_read_preference_mode(), prop::collection::vec(arb_tags(), 0..3)).prop_map(
        |(mode, tag_sets)| {
            let preference = ReadPreference::new(mode);
            if mode == ReadPreferenceMode::Primary || tag_sets.is_empty() {
                return preference;
            }
            let tag_sets = tag_sets.into_iter().map(|tags| {
                tags.into_iter().fold(TagSet::new(), |set, (key, value)| set.with_tag(key, value))
            });
            match preference.clone().with_tag_sets(tag_sets) {
                Ok(tagged) => tagged,
                Err(_) => preference,
            }
        },
    )
}
