//! Integration tests for the membership overlay.
//!
//! These tests drive real nodes over localhost: an in-process CA admits
//! members, nodes gossip over mutual-TLS QUIC and probe each other over
//! UDP. Timing-sensitive assertions poll with generous deadlines instead
//! of sleeping fixed amounts.

use std::sync::Arc;
use std::time::Duration;

use firemesh::{Config, LocalCa, Node};

/// Deployment-table defaults are too slow for tests; tick everything fast.
fn fast_config() -> Config {
    Config {
        gossip_interval: 1,
        monitor_interval: 1,
        view_update_interval: 1,
        ping_limit: 2,
        removal_timeout: 3,
        ..Config::default()
    }
}

async fn spawn_node(ca: &LocalCa, config: Config, seeds: Vec<Vec<u8>>) -> Arc<Node> {
    let node = Node::new(
        config,
        ca,
        "127.0.0.1:0".parse().unwrap(),
        "127.0.0.1:0".parse().unwrap(),
        seeds,
        Box::new(|old: &[u8], new: &[u8]| new > old),
    )
    .await
    .expect("node creation failed");
    node.start();
    node
}

/// Poll until `predicate` holds or the deadline passes.
async fn wait_for<F: Fn() -> bool>(deadline: Duration, what: &str, predicate: F) {
    let result = tokio::time::timeout(deadline, async {
        loop {
            if predicate() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for: {}", what);
}

#[tokio::test]
async fn two_nodes_converge_to_mutual_live_membership() {
    let ca = LocalCa::new(3).expect("ca creation failed");

    let node_a = spawn_node(&ca, fast_config(), vec![]).await;
    let node_b = spawn_node(&ca, fast_config(), vec![node_a.cert_der().to_vec()]).await;

    wait_for(Duration::from_secs(30), "a sees b live", || {
        node_a
            .live_members()
            .contains(&node_b.gossip_addr().to_string())
    })
    .await;
    wait_for(Duration::from_secs(30), "b sees a live", || {
        node_b
            .live_members()
            .contains(&node_a.gossip_addr().to_string())
    })
    .await;

    node_a.shutdown().await;
    node_b.shutdown().await;
}

#[tokio::test]
async fn certificates_propagate_through_gossip() {
    // C only knows B; A's certificate and note must reach it via gossip.
    let ca = LocalCa::new(3).expect("ca creation failed");

    let node_a = spawn_node(&ca, fast_config(), vec![]).await;
    let node_b = spawn_node(&ca, fast_config(), vec![node_a.cert_der().to_vec()]).await;
    let node_c = spawn_node(&ca, fast_config(), vec![node_b.cert_der().to_vec()]).await;

    for (name, node) in [("a", &node_a), ("b", &node_b), ("c", &node_c)] {
        wait_for(
            Duration::from_secs(60),
            &format!("{} sees both other members live", name),
            || node.live_count() == 2,
        )
        .await;
    }

    node_a.shutdown().await;
    node_b.shutdown().await;
    node_c.shutdown().await;
}

#[tokio::test]
async fn gossip_data_disseminates_to_neighbors() {
    let ca = LocalCa::new(3).expect("ca creation failed");

    let node_a = spawn_node(&ca, fast_config(), vec![]).await;
    let node_b = spawn_node(&ca, fast_config(), vec![node_a.cert_der().to_vec()]).await;

    node_a
        .append_gossip_data(b"announcement".to_vec(), b"hello overlay".to_vec())
        .expect("append failed");

    wait_for(Duration::from_secs(30), "b receives the data entry", || {
        node_b.get_gossip_data(b"announcement") == Some(b"hello overlay".to_vec())
    })
    .await;

    node_a.shutdown().await;
    node_b.shutdown().await;
}

#[tokio::test]
async fn silent_node_is_accused_and_evicted() {
    let ca = LocalCa::new(3).expect("ca creation failed");

    let node_a = spawn_node(&ca, fast_config(), vec![]).await;
    let node_b = spawn_node(&ca, fast_config(), vec![node_a.cert_der().to_vec()]).await;
    let node_c = spawn_node(&ca, fast_config(), vec![node_a.cert_der().to_vec()]).await;

    for node in [&node_a, &node_b, &node_c] {
        wait_for(Duration::from_secs(60), "overlay converges", || {
            node.live_count() == 2
        })
        .await;
    }

    // Kill b: its ping responder and gossip server go away, so its ring
    // predecessors accumulate probe failures, accuse it, and - with no
    // rebuttal coming - evict it after the removal timeout.
    let b_addr = node_b.gossip_addr().to_string();
    node_b.shutdown().await;
    drop(node_b);

    wait_for(Duration::from_secs(90), "a evicts the silent node", || {
        !node_a.live_members().contains(&b_addr)
    })
    .await;
    wait_for(Duration::from_secs(90), "c evicts the silent node", || {
        !node_c.live_members().contains(&b_addr)
    })
    .await;

    node_a.shutdown().await;
    node_c.shutdown().await;
}

#[tokio::test]
async fn monitor_rpc_answers_over_reliable_channel() {
    let ca = LocalCa::new(3).expect("ca creation failed");

    let node_a = spawn_node(&ca, fast_config(), vec![]).await;
    let node_b = spawn_node(&ca, fast_config(), vec![node_a.cert_der().to_vec()]).await;

    // b knows a from its seed; the probe opens a mutually authenticated
    // connection and exchanges the empty ping/pong.
    tokio::time::timeout(Duration::from_secs(15), node_b.probe(&node_a.id()))
        .await
        .expect("probe must not hang")
        .expect("probe failed");

    node_a.shutdown().await;
    node_b.shutdown().await;
}

#[tokio::test]
async fn shutdown_terminates_cleanly() {
    let ca = LocalCa::new(2).expect("ca creation failed");
    let node = spawn_node(&ca, fast_config(), vec![]).await;

    tokio::time::timeout(Duration::from_secs(10), node.shutdown())
        .await
        .expect("shutdown must not hang");
}
