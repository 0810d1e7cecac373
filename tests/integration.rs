//! Integration Tests for Shard Cache
//!
//! This module contains the tests that need a real Redis server.
//! Tests use testcontainers for portability - no external docker-compose required.
//!
//! # Running Tests
//! ```bash
//! # Run all integration tests (requires Docker)
//! cargo test --test integration -- --ignored
//!
//! # Run only happy-path tests
//! cargo test --test integration happy -- --ignored
//!
//! # Run only failure scenario tests
//! cargo test --test integration failure -- --ignored
//! ```
//!
//! # Test Organization
//! - `happy_*` - Normal operation: hash storage, pub/sub framing, two-server convergence
//! - `failure_*` - Failure scenarios: Redis unreachable, Redis dies mid-operation

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use shard_cache::{
    CacheError, CachedRepository, Entity, RedisStorage, RedisSync, RedisTransport, RepoConfig, Storage,
    TransportConfig,
};

use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

// =============================================================================
// Container Helpers
// =============================================================================

/// Create a Redis container with health check
fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

fn transport_config(port: u16, server: &str) -> TransportConfig {
    TransportConfig {
        subscribe_settle_ms: 20,
        subscribe_poll_ms: 50,
        subscribe_retry_delay_ms: 200,
        connect_timeout_ms: 2_000,
        ..TransportConfig::new(format!("redis://127.0.0.1:{}", port), server)
    }
}

async fn connected_transport(port: u16, server: &str) -> Arc<RedisTransport> {
    let transport = Arc::new(RedisTransport::new(transport_config(port, server)).unwrap());
    transport.connect().await.expect("connect to test Redis");
    transport
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Farm {
    id: String,
    crop: String,
    yield_kg: u32,
}

impl Entity for Farm {
    fn id(&self) -> &str {
        &self.id
    }
}

fn farm(id: &str, crop: &str, yield_kg: u32) -> Farm {
    Farm {
        id: id.to_string(),
        crop: crop.to_string(),
        yield_kg,
    }
}

fn repo_config() -> RepoConfig {
    RepoConfig {
        save_interval_ms: 60_000,
        cleanup_enabled: false,
        retry_base_delay_ms: 10,
        ..RepoConfig::new("farms")
    }
}

async fn repository(transport: &Arc<RedisTransport>) -> Arc<CachedRepository<Farm>> {
    let config = repo_config();
    let storage = Arc::new(RedisStorage::<Farm>::new(transport.clone(), config.storage_key.clone()));
    let sync = Arc::new(RedisSync::<Farm>::new(transport.clone(), config.update_channel.clone()));
    let repo = CachedRepository::with_sync(config, storage, sync).unwrap();
    repo.init().await.unwrap();
    repo
}

/// Give the subscriber thread time to settle and (re)subscribe.
async fn wait_for_subscriptions() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition never became true: {what}");
}

// =============================================================================
// Happy Path Tests - Normal Operation
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_transport_hash_operations() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let transport = connected_transport(redis.get_host_port_ipv4(6379), "survival-1").await;

    assert!(transport.is_connected());
    transport.ping().await.unwrap();

    let entries = vec![
        ("a".to_string(), Some("1".to_string())),
        ("b".to_string(), Some("2".to_string())),
        ("c".to_string(), Some("3".to_string())),
    ];
    transport.save_map_entries("plots", &entries).await.unwrap();

    // A None value deletes in the same round trip as the upserts.
    let mixed = vec![
        ("a".to_string(), None),
        ("b".to_string(), Some("20".to_string())),
        ("d".to_string(), Some("4".to_string())),
    ];
    transport.save_map_entries("plots", &mixed).await.unwrap();

    let all = transport.map_get_all("plots").await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all.get("b").map(String::as_str), Some("20"));
    assert!(!all.contains_key("a"));

    let fields = vec!["a".to_string(), "b".to_string(), "d".to_string()];
    assert_eq!(
        transport.map_get_many("plots", &fields).await.unwrap(),
        vec![None, Some("20".to_string()), Some("4".to_string())]
    );
    assert!(transport.map_exists("plots", "c").await.unwrap());

    transport.delete_map_entries("plots", &["c".to_string()]).await.unwrap();
    assert_eq!(transport.map_get("plots", "c").await.unwrap(), None);

    transport.disconnect().await;
    assert!(!transport.is_connected());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_redis_storage_round_trip() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let transport = connected_transport(redis.get_host_port_ipv4(6379), "survival-1").await;
    let storage: RedisStorage<Farm> = RedisStorage::new(transport.clone(), "farms");

    storage
        .save_many(&[farm("f1", "wheat", 10), farm("f2", "carrot", 4)])
        .await
        .unwrap();
    storage.save(&farm("f3", "potato", 7)).await.unwrap();

    assert_eq!(storage.load("f2").await.unwrap(), Some(farm("f2", "carrot", 4)));
    assert_eq!(storage.load("missing").await.unwrap(), None);
    assert_eq!(storage.load_all().await.unwrap().len(), 3);

    storage.delete("f1").await.unwrap();
    assert!(!storage.exists("f1").await.unwrap());
    assert!(storage.exists("f3").await.unwrap());

    // Entities are stored as JSON under their id.
    let raw = transport.map_get("farms", "f3").await.unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["crop"], "potato");
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_pubsub_filters_self_messages() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);
    let one = connected_transport(port, "survival-1").await;
    let two = connected_transport(port, "survival-2").await;

    let mut one_rx = one.register_channel("events");
    let mut two_rx = two.register_channel("events");
    wait_for_subscriptions().await;

    two.publish("events", r#"{"hello":"from two"}"#).await.unwrap();

    let envelope = tokio::time::timeout(Duration::from_secs(2), one_rx.recv())
        .await
        .expect("peer message delivered")
        .unwrap();
    assert_eq!(envelope.origin, "survival-2");
    assert_eq!(envelope.payload, r#"{"hello":"from two"}"#);

    // The publisher's own subscription never sees its message.
    assert!(tokio::time::timeout(Duration::from_millis(300), two_rx.recv())
        .await
        .is_err());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_subscription_follows_channel_changes() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);
    let listener = connected_transport(port, "survival-1").await;
    let publisher = connected_transport(port, "survival-2").await;

    let mut first = listener.register_channel("first");
    wait_for_subscriptions().await;
    let mut second = listener.register_channel("second");
    wait_for_subscriptions().await;
    assert_eq!(listener.channels().len(), 2);

    publisher.publish("first", "1").await.unwrap();
    publisher.publish("second", "2").await.unwrap();

    let got_first = tokio::time::timeout(Duration::from_secs(2), first.recv()).await.unwrap().unwrap();
    let got_second = tokio::time::timeout(Duration::from_secs(2), second.recv()).await.unwrap().unwrap();
    assert_eq!(got_first.payload, "1");
    assert_eq!(got_second.payload, "2");

    assert!(listener.unregister_channel("first"));
    wait_for_subscriptions().await;
    assert_eq!(publisher.publish("first", "gone").await.unwrap(), 0);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_two_servers_converge() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);
    let one = connected_transport(port, "survival-1").await;
    let two = connected_transport(port, "survival-2").await;

    let farms_one = repository(&one).await;
    let farms_two = repository(&two).await;
    wait_for_subscriptions().await;

    farms_one.save(farm("f1", "wheat", 1)).unwrap();
    farms_one.save_dirty().await.unwrap();
    assert_eq!(farms_two.get("f1").await.unwrap(), Some(farm("f1", "wheat", 1)));

    farms_one.save(farm("f1", "wheat", 50)).unwrap();
    farms_one.save_dirty().await.unwrap();
    eventually("server two sees the harvest", || {
        farms_two.all() == vec![farm("f1", "wheat", 50)]
    })
    .await;

    farms_two.delete("f1").await.unwrap();
    eventually("server one drops the farm", || !farms_one.is_cached("f1")).await;
    assert_eq!(farms_one.get("f1").await.unwrap(), None);

    farms_one.shutdown().await.unwrap();
    farms_two.shutdown().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_restart_reloads_from_redis() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);

    let transport = connected_transport(port, "survival-1").await;
    let farms = repository(&transport).await;
    farms.save(farm("f9", "melon", 3)).unwrap();
    farms.shutdown().await.unwrap();
    drop(farms);
    transport.disconnect().await;

    let transport = connected_transport(port, "survival-1").await;
    let config = RepoConfig {
        load_all_on_start: true,
        ..repo_config()
    };
    let storage = Arc::new(RedisStorage::<Farm>::new(transport.clone(), config.storage_key.clone()));
    let farms = CachedRepository::new(config, storage).unwrap();
    farms.init().await.unwrap();

    assert!(farms.is_cached("f9"));
    assert_eq!(farms.get("f9").await.unwrap(), Some(farm("f9", "melon", 3)));
}

// =============================================================================
// Failure Scenario Tests
// =============================================================================

#[tokio::test]
#[ignore] // Slow: exhausts the startup retry schedule
async fn failure_redis_unreachable_at_connect() {
    let transport = RedisTransport::new(TransportConfig {
        connect_timeout_ms: 200,
        ..TransportConfig::new("redis://127.0.0.1:1", "survival-1")
    })
    .unwrap();

    let result = transport.connect().await;

    assert!(result.is_err());
    assert!(!transport.is_connected());
    assert!(matches!(transport.ping().await, Err(CacheError::Disconnected)));
}

#[tokio::test]
#[ignore] // Requires Docker
async fn failure_redis_dies_mid_operation() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let transport = connected_transport(redis.get_host_port_ipv4(6379), "survival-1").await;
    let farms = repository(&transport).await;

    farms.save(farm("f1", "wheat", 1)).unwrap();
    farms.save_dirty().await.unwrap();

    drop(redis);
    tokio::time::sleep(Duration::from_millis(500)).await;

    // Writes keep landing locally; write-back fails and keeps them dirty.
    farms.save(farm("f1", "wheat", 2)).unwrap();
    assert_eq!(farms.get("f1").await.unwrap(), Some(farm("f1", "wheat", 2)));
    assert!(farms.save_dirty().await.is_err());
    assert!(farms.is_dirty("f1"));

    // No automatic reconnect.
    assert!(!transport.is_connected());
}
