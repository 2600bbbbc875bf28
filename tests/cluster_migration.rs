// tests/cluster_migration.rs

//! End-to-end coverage of the migration scenario over real TCP sockets:
//! two nodes, a slot migrated from one to the other, with MOVE/ASK
//! redirection observed from a plain client.

use std::time::Duration;

use slotkv::client::{Client, Outcome};
use slotkv::config::Config;
use slotkv::core::cluster::slot::get_slot;
use slotkv::server;
use tokio::sync::broadcast;

async fn spawn_node(name: &str, client_port: u16, cluster_port: u16) -> broadcast::Sender<()> {
    let config = Config {
        name: name.to_string(),
        ip: "127.0.0.1".to_string(),
        client_port,
        cluster_port,
        serve_all_slots: false,
        log_level: "error".to_string(),
    };
    let (tx, rx) = broadcast::channel(1);
    tokio::spawn(server::run(config, rx));
    // Give the listener a moment to bind before the test dials in.
    tokio::time::sleep(Duration::from_millis(50)).await;
    tx
}

#[tokio::test]
async fn put_get_erase_round_trip_on_a_single_node() {
    let _shutdown = spawn_node_all_slots("solo", 15100, 25100).await;

    let mut client = Client::new();
    client.connect("127.0.0.1:15100").await.unwrap();

    client.put("hello", bytes::Bytes::from_static(b"world")).await.unwrap();
    let value = client.get("hello").await.unwrap();
    assert_eq!(value, bytes::Bytes::from_static(b"world"));

    client.erase("hello").await.unwrap();
    let err = client.get("hello").await.unwrap_err();
    assert!(err.to_string().contains("not found"));
}

async fn spawn_node_all_slots(name: &str, client_port: u16, cluster_port: u16) -> broadcast::Sender<()> {
    let config = Config {
        name: name.to_string(),
        ip: "127.0.0.1".to_string(),
        client_port,
        cluster_port,
        serve_all_slots: true,
        log_level: "error".to_string(),
    };
    let (tx, rx) = broadcast::channel(1);
    tokio::spawn(server::run(config, rx));
    tokio::time::sleep(Duration::from_millis(50)).await;
    tx
}

#[tokio::test]
async fn move_redirects_client_to_the_owning_node() {
    let _a = spawn_node_all_slots("node-a", 15200, 25200).await;
    let _b = spawn_node("node-b", 15201, 25201).await;

    let mut client = Client::new();
    client.connect("127.0.0.1:15200").await.unwrap();
    client.connect("127.0.0.1:15201").await.unwrap();

    // node-b has no slots yet; asking it for any key should MOVE to node-a,
    // which owns everything, and the client should transparently retry.
    let mut client_to_b_only = Client::new();
    client_to_b_only.connect("127.0.0.1:15201").await.unwrap();
    client_to_b_only.put("k", bytes::Bytes::from_static(b"v")).await.unwrap();
    let value = client_to_b_only.get("k").await.unwrap();
    assert_eq!(value, bytes::Bytes::from_static(b"v"));
}

#[tokio::test]
async fn migrating_slot_redirects_a_new_key_via_ask() {
    let _a = spawn_node_all_slots("node-a2", 15300, 25300).await;
    let _b = spawn_node("node-b2", 15301, 25301).await;

    let mut admin = Client::new();
    admin.connect("127.0.0.1:15300").await.unwrap();
    admin.connect("127.0.0.1:15301").await.unwrap();

    admin
        .add_node_to_cluster("node-b2", "127.0.0.1", 15301, 25301)
        .await
        .unwrap();

    let key = "k";
    let slot = get_slot(&bytes::Bytes::from_static(b"k"));
    admin.put(key, bytes::Bytes::from_static(b"v")).await.unwrap();

    admin
        .migrate_slot(slot, "127.0.0.1:15300", "127.0.0.1", 15301)
        .await
        .unwrap();
    admin
        .import_slot(slot, "127.0.0.1:15301", "127.0.0.1", 15300)
        .await
        .unwrap();

    // Find a second key landing on the same slot but absent from node-a;
    // writing it must be ASK-redirected to node-b (the migration partner)
    // rather than accepted locally.
    let key2 = (0..100_000u32)
        .map(|i| format!("key-{i}"))
        .find(|candidate| get_slot(&bytes::Bytes::from(candidate.clone().into_bytes())) == slot && candidate != key)
        .expect("a colliding key exists within the search space");

    let mut client = Client::new();
    client.connect("127.0.0.1:15300").await.unwrap();

    let outcome = client.put(&key2, bytes::Bytes::from_static(b"v2")).await;
    assert!(outcome.is_ok());

    // node-a never accepted key2 locally; node-b (post-ASK) did.
    let mut probe_b = Client::new();
    probe_b.connect("127.0.0.1:15301").await.unwrap();
    let value = probe_b.get(&key2).await.unwrap();
    assert_eq!(value, bytes::Bytes::from_static(b"v2"));
}
