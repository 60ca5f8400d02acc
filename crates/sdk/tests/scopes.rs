//! Request scope behaviour through the public client API.
//!
//! Every test runs against the in-memory [`MockCluster`], so connection
//! accounting (`opened_connections` / `released_connections`) shows exactly
//! when a pinned connection is acquired and when it is let go.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use proptest::prelude::*;
use replica_routing_sdk::{
    Cluster, Deadline, ErrorKind, ReadPreference, RequestContext, RoutingClient, RoutingHandle,
    ScopeSelector, ServerType, mock::MockCluster,
};
use replica_routing_test_utils::fixtures::{member, replica_set};

// ============================================================================
// Helpers
// ============================================================================

fn three_members() -> Arc<MockCluster> {
    MockCluster::new(replica_set(&[
        member("a", ServerType::ReplicaSetPrimary),
        member("b", ServerType::ReplicaSetSecondary),
        member("c", ServerType::ReplicaSetSecondary),
    ]))
}

fn client_for(cluster: &Arc<MockCluster>) -> RoutingClient {
    let settings = replica_routing_sdk::ClientSettings::builder()
        .with_seeds(["a", "b", "c"])
        .with_server_selection_timeout(Duration::from_millis(300))
        .build()
        .unwrap();
    RoutingClient::new(settings, Arc::clone(cluster) as Arc<dyn Cluster>)
}

fn host_of(handle: &RoutingHandle, _: &Deadline) -> replica_routing_sdk::Result<String> {
    Ok(handle.endpoint().host().to_owned())
}

// ============================================================================
// Pinning and nesting
// ============================================================================

#[test]
fn nested_primary_scopes_share_one_connection() {
    let cluster = three_members();
    let client = client_for(&cluster);
    let mut context = RequestContext::new();

    {
        let mut outer = client.start_scope(&mut context).unwrap();
        assert_eq!(outer.nesting_level(), 1);
        assert_eq!(outer.pinned_endpoint().unwrap().host(), "a");
        assert_eq!(cluster.opened_connections(), 1);

        {
            let inner = client.start_scope(&mut outer).unwrap();
            assert_eq!(inner.nesting_level(), 2);
            assert_eq!(cluster.opened_connections(), 1, "nesting must not reconnect");
        }

        assert_eq!(outer.nesting_level(), 1);
        assert!(outer.is_pinned());
        assert_eq!(cluster.released_connections(), 0);
    }

    assert_eq!(context.nesting_level(), 0);
    assert!(!context.is_pinned());
    assert_eq!(cluster.released_connections(), 1);
    assert_eq!(cluster.open_connections(), 0);
}

#[test]
fn pinned_operations_reuse_the_pinned_connection() {
    let cluster = three_members();
    let client = client_for(&cluster);
    let mut context = RequestContext::new();
    let scope = client.start_scope(&mut context).unwrap();
    let pinned_connection = scope.connection_id().cloned().unwrap();

    // The read preference passed to a pinned read is ignored.
    let read = client.read_handle(&scope, &ReadPreference::secondary(), &Deadline::none()).unwrap();
    let write = client.write_handle(&scope, &Deadline::none()).unwrap();

    assert_eq!(read.endpoint().host(), "a");
    assert_eq!(read.connection_id(), Some(pinned_connection.clone()));
    assert_eq!(write.connection_id(), Some(pinned_connection));
    assert!(read.shares_with(&write));

    let host = client.execute_write(&scope, &host_of, &Deadline::none()).unwrap();
    assert_eq!(host, "a");

    drop(read);
    drop(write);
    assert_eq!(cluster.released_connections(), 0, "forks must not release the pin");
    drop(scope);
    assert_eq!(cluster.opened_connections(), 1);
    assert_eq!(cluster.released_connections(), 1);
}

#[test]
fn write_through_secondary_pin_fails_without_network_access() {
    let cluster = three_members();
    let client = client_for(&cluster);
    let mut context = RequestContext::new();
    let scope =
        client.start_scope_with_read_preference(&mut context, ReadPreference::secondary()).unwrap();
    assert_ne!(scope.pinned_endpoint().unwrap().host(), "a");

    let opened = cluster.opened_connections();
    let selections = cluster.selections();

    let err = client.write_handle(&scope, &Deadline::none()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WriteOnReadOnlyPin);

    let err = client.execute_write(&scope, &host_of, &Deadline::none()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WriteOnReadOnlyPin);

    assert_eq!(cluster.opened_connections(), opened);
    assert_eq!(cluster.selections(), selections);
    assert!(scope.is_pinned());
}

#[test]
fn incompatible_nested_scope_leaves_pin_intact() {
    let cluster = three_members();
    let client = client_for(&cluster);
    let mut context = RequestContext::new();
    let mut scope =
        client.start_scope_with_read_preference(&mut context, ReadPreference::secondary()).unwrap();
    let pinned = scope.pinned_endpoint().cloned().unwrap();

    let err = client.start_scope(&mut scope).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IncompatibleNestedScope);
    assert!(err.to_string().contains(pinned.host()));

    assert_eq!(scope.nesting_level(), 1);
    assert_eq!(scope.pinned_endpoint(), Some(&pinned));

    // A compatible nested scope is still accepted.
    let nested = client
        .start_scope_with_read_preference(&mut scope, ReadPreference::secondary_preferred())
        .unwrap();
    assert_eq!(nested.nesting_level(), 2);
}

#[test]
fn scope_on_instance_pins_that_member() {
    let cluster = three_members();
    let client = client_for(&cluster);
    let target = client.instance_at(&"c".parse().unwrap()).unwrap();
    let mut context = RequestContext::new();

    let scope = client.start_scope_on_instance(&mut context, Arc::clone(&target)).unwrap();

    assert_eq!(scope.pinned_endpoint(), Some(target.endpoint()));
    assert!(Arc::ptr_eq(scope.pinned_instance().unwrap(), &target));
    let host = client
        .execute_read(&scope, &host_of, &ReadPreference::primary(), &Deadline::none())
        .unwrap();
    assert_eq!(host, "c");
}

#[test]
fn failed_pin_leaves_context_unpinned() {
    let cluster = MockCluster::new(replica_set(&[member("b", ServerType::ReplicaSetSecondary)]));
    let client = client_for(&cluster);
    let mut context = RequestContext::new();

    let err = client
        .start_scope_with(
            &mut context,
            ScopeSelector::Primary,
            &Deadline::after(Duration::from_millis(50)),
        )
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SelectionTimeout);
    assert!(!context.is_pinned());
    assert_eq!(context.nesting_level(), 0);
}

// ============================================================================
// Ending scopes
// ============================================================================

#[test]
fn ending_unstarted_scope_is_unbalanced() {
    let client = client_for(&three_members());
    let mut context = RequestContext::new();

    let err = client.end_scope(&mut context).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnbalancedEndScope);
}

#[test]
fn explicit_end_scope_releases_once() {
    let cluster = three_members();
    let client = client_for(&cluster);
    let mut context = RequestContext::new();

    let scope = client.start_scope(&mut context).unwrap();
    scope.end().unwrap();

    assert!(!context.is_pinned());
    assert_eq!(cluster.released_connections(), 1);
    assert_eq!(client.end_scope(&mut context).unwrap_err().kind(), ErrorKind::UnbalancedEndScope);
    assert_eq!(cluster.released_connections(), 1);
}

#[test]
fn guard_after_manual_end_does_not_release_twice() {
    let cluster = three_members();
    let client = client_for(&cluster);
    let mut context = RequestContext::new();

    let mut scope = client.start_scope(&mut context).unwrap();
    client.end_scope(&mut scope).unwrap();
    assert_eq!(cluster.released_connections(), 1);

    let err = scope.end().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnbalancedEndScope);
    assert_eq!(cluster.released_connections(), 1);
    assert!(!context.is_pinned());
}

#[test]
fn dropped_guard_after_manual_end_only_warns() {
    let cluster = three_members();
    let client = client_for(&cluster);
    let mut context = RequestContext::new();

    {
        let mut scope = client.start_scope(&mut context).unwrap();
        client.end_scope(&mut scope).unwrap();
    }

    assert_eq!(cluster.released_connections(), 1);
    assert!(!context.is_pinned());

    // The context is reusable afterwards.
    let scope = client.start_scope(&mut context).unwrap();
    assert_eq!(scope.nesting_level(), 1);
}

// ============================================================================
// Start/Done sequences
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Nesting never goes negative; the connection is acquired on every
    /// 0 -> 1 transition and released on every 1 -> 0 transition.
    #[test]
    fn start_done_sequences_balance(ops in prop::collection::vec(any::<bool>(), 0..40)) {
        let cluster = three_members();
        let client = client_for(&cluster);
        let mut context = RequestContext::new();
        let mut depth = 0usize;
        let mut pins = 0usize;
        let mut releases = 0usize;

        for start in ops {
            if start {
                let guard = client.start_scope(&mut context).unwrap();
                // Drive nesting by hand below instead of through guard lifetimes.
                std::mem::forget(guard);
                if depth == 0 {
                    pins += 1;
                }
                depth += 1;
            } else {
                let result = client.end_scope(&mut context);
                if depth == 0 {
                    prop_assert_eq!(result.unwrap_err().kind(), ErrorKind::UnbalancedEndScope);
                } else {
                    prop_assert!(result.is_ok());
                    depth -= 1;
                    if depth == 0 {
                        releases += 1;
                    }
                }
            }

            prop_assert_eq!(context.nesting_level(), depth);
            prop_assert_eq!(context.is_pinned(), depth > 0);
            prop_assert_eq!(cluster.opened_connections(), pins);
            prop_assert_eq!(cluster.released_connections(), releases);
        }
    }
}
