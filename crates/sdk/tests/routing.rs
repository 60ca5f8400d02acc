//! Ad-hoc routing, deadlines and topology tracking through the public client API.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::{
    sync::{Arc, Barrier},
    thread,
    time::{Duration, Instant},
};

use replica_routing_sdk::{
    CancellationToken, ClientSettings, ClientState, Cluster, ClusterDescription, Deadline,
    ErrorKind, ReadPreference, RequestContext, RoutingClient, RoutingHandle, ServerType,
    mock::{MockCluster, MockFailure},
};
use replica_routing_test_utils::{
    assert_eventually,
    fixtures::{member, replica_set},
};

fn settings(selection_timeout: Duration) -> ClientSettings {
    ClientSettings::builder()
        .with_seeds(["a", "b"])
        .with_server_selection_timeout(selection_timeout)
        .build()
        .unwrap()
}

fn client_for(cluster: &Arc<MockCluster>, selection_timeout: Duration) -> RoutingClient {
    RoutingClient::new(settings(selection_timeout), Arc::clone(cluster) as Arc<dyn Cluster>)
}

fn primary_and_secondary() -> Arc<MockCluster> {
    MockCluster::new(replica_set(&[
        member("a", ServerType::ReplicaSetPrimary),
        member("b", ServerType::ReplicaSetSecondary),
    ]))
}

/// Opens the channel and reports where it went.
fn touch(handle: &RoutingHandle, deadline: &Deadline) -> replica_routing_sdk::Result<String> {
    let channel = handle.channel(deadline)?;
    Ok(channel.connection_id().endpoint().host().to_owned())
}

// ============================================================================
// Ad-hoc routing
// ============================================================================

#[test]
fn ad_hoc_reads_follow_read_preference() {
    let cluster = primary_and_secondary();
    let client = client_for(&cluster, Duration::from_secs(1));
    let context = RequestContext::new();

    let secondary = client
        .execute_read(&context, &touch, &ReadPreference::secondary(), &Deadline::none())
        .unwrap();
    let primary = client
        .execute_read(&context, &touch, &ReadPreference::primary(), &Deadline::none())
        .unwrap();

    assert_eq!(secondary, "b");
    assert_eq!(primary, "a");
    assert_eq!(cluster.opened_connections(), 2);
    assert_eq!(cluster.open_connections(), 0);
}

#[test]
fn concurrent_ad_hoc_reads_use_separate_connections() {
    let cluster = primary_and_secondary();
    let client = client_for(&cluster, Duration::from_secs(1));
    let barrier = Barrier::new(2);
    let (client, barrier) = (&client, &barrier);

    let connections: Vec<_> = thread::scope(|scope| {
        let workers: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(move || {
                    let context = RequestContext::new();
                    let handle = client
                        .read_handle(&context, &ReadPreference::primary(), &Deadline::none())
                        .unwrap();
                    let channel = handle.channel(&Deadline::none()).unwrap();
                    // Both handles are alive at the same time.
                    barrier.wait();
                    channel.connection_id()
                })
            })
            .collect();
        workers.into_iter().map(|worker| worker.join().unwrap()).collect()
    });

    assert_eq!(connections.len(), 2);
    assert_ne!(connections[0], connections[1]);
    assert_eq!(cluster.opened_connections(), 2);
    assert_eq!(cluster.released_connections(), 2);
}

#[test]
fn connection_failures_surface_unchanged() {
    let cluster = primary_and_secondary();
    cluster.set_open_failure(Some(MockFailure::Authentication("bad credentials".to_owned())));
    let client = client_for(&cluster, Duration::from_secs(1));

    let err = client
        .execute_read(&RequestContext::new(), &touch, &ReadPreference::primary(), &Deadline::none())
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cluster);
    assert!(err.to_string().contains("bad credentials"));
}

// ============================================================================
// Deadlines
// ============================================================================

#[test]
fn selection_times_out_on_empty_topology() {
    let cluster = MockCluster::new(ClusterDescription::default());
    let client = client_for(&cluster, Duration::from_millis(500));
    let started = Instant::now();

    let err = client
        .execute_read(&RequestContext::new(), &touch, &ReadPreference::primary(), &Deadline::none())
        .unwrap_err();

    let elapsed = started.elapsed();
    assert_eq!(err.kind(), ErrorKind::SelectionTimeout);
    assert!(err.is_timeout());
    assert!(elapsed >= Duration::from_millis(450), "returned too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "returned too late: {elapsed:?}");
}

#[test]
fn unrepresentable_timeouts_do_not_overflow() {
    let cluster = primary_and_secondary();
    let settings = ClientSettings::builder()
        .with_seeds(["a", "b"])
        .with_server_selection_timeout(Duration::MAX)
        .with_connect_timeout(Duration::MAX)
        .with_local_threshold(Duration::MAX)
        .build()
        .unwrap();
    let client = RoutingClient::new(settings, Arc::clone(&cluster) as Arc<dyn Cluster>);
    let context = RequestContext::new();

    client.connect(Duration::MAX).unwrap();
    let primary = client
        .execute_read(&context, &touch, &ReadPreference::primary(), &Deadline::none())
        .unwrap();
    let secondary = client
        .execute_read(&context, &touch, &ReadPreference::secondary(), &Deadline::after(Duration::MAX))
        .unwrap();

    assert_eq!(primary, "a");
    assert_eq!(secondary, "b");
}

#[test]
fn caller_deadline_shorter_than_configured_wins() {
    let cluster = MockCluster::new(ClusterDescription::default());
    let client = client_for(&cluster, Duration::from_secs(30));
    let started = Instant::now();

    let err = client
        .write_handle(&RequestContext::new(), &Deadline::after(Duration::from_millis(50)))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SelectionTimeout);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn cancellation_interrupts_selection() {
    let cluster = MockCluster::new(ClusterDescription::default());
    let client = client_for(&cluster, Duration::from_secs(30));
    let token = CancellationToken::new();
    let deadline = Deadline::none().with_cancellation(token.clone());

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        token.cancel();
    });

    let started = Instant::now();
    let err = client.write_handle(&RequestContext::new(), &deadline).unwrap_err();
    canceller.join().unwrap();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn selection_waits_for_a_primary_to_appear() {
    let cluster = MockCluster::new(replica_set(&[member("b", ServerType::ReplicaSetSecondary)]));
    let client = client_for(&cluster, Duration::from_secs(5));

    let publisher = {
        let cluster = Arc::clone(&cluster);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            cluster.set_description(replica_set(&[
                member("a", ServerType::ReplicaSetPrimary),
                member("b", ServerType::ReplicaSetSecondary),
            ]));
        })
    };

    let handle = client.write_handle(&RequestContext::new(), &Deadline::none()).unwrap();
    publisher.join().unwrap();
    assert_eq!(handle.endpoint().host(), "a");
    assert!(handle.is_writable());
}

// ============================================================================
// Topology tracking
// ============================================================================

#[test]
fn role_changes_are_visible_through_existing_instances() {
    let cluster = primary_and_secondary();
    let client = client_for(&cluster, Duration::from_secs(1));
    let a = client.primary().unwrap();
    let b = client.secondaries().pop().unwrap();

    cluster.set_description(replica_set(&[
        member("a", ServerType::ReplicaSetSecondary),
        member("b", ServerType::ReplicaSetPrimary),
    ]));

    assert!(assert_eventually(Duration::from_secs(1), || b.is_primary()));
    assert!(a.is_secondary());
    assert!(Arc::ptr_eq(&client.primary().unwrap(), &b));
    assert_eq!(client.state(), ClientState::Connected);
}

#[test]
fn departed_members_leave_the_registry() {
    let cluster = primary_and_secondary();
    let client = client_for(&cluster, Duration::from_secs(1));
    let departed = client.secondaries().pop().unwrap();

    cluster.set_description(replica_set(&[member("a", ServerType::ReplicaSetPrimary)]));

    assert!(assert_eventually(Duration::from_secs(1), || client.instances().len() == 1));
    assert_eq!(departed.server_type(), ServerType::Unknown);
    assert!(client.instance_at(departed.endpoint()).is_none());
    assert_eq!(client.instance().unwrap().unwrap().endpoint().host(), "a");
}

#[test]
fn pinned_scope_survives_topology_change() {
    let cluster = primary_and_secondary();
    let client = client_for(&cluster, Duration::from_secs(1));
    let mut context = RequestContext::new();
    let scope = client.start_scope(&mut context).unwrap();

    cluster.set_description(replica_set(&[
        member("a", ServerType::ReplicaSetSecondary),
        member("b", ServerType::ReplicaSetPrimary),
    ]));

    // Writability was decided when the scope was pinned.
    let handle = client.write_handle(&scope, &Deadline::none()).unwrap();
    assert_eq!(handle.endpoint().host(), "a");
    assert_eq!(handle.connection_id(), scope.connection_id().cloned());
}
