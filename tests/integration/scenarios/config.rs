//! Building a registry from a YAML topology

use crate::integration::MockCluster;
use shardpool::config::{Config, ConfigError};
use shardpool::core::{Endpoint, PoolError, PoolRegistry, Role, ShardStatus};

const TOPOLOGY: &str = r#"
seed: 9
keepalive_interval_secs: 15
cache_types:
  - id: 0
    hash_base: 2
    nodes:
      - { shard: 0, host: "m0", port: 6379, pool_size: 2, role: master }
      - { shard: 0, host: "r0", port: 6379, pool_size: 2, role: replica }
      - { shard: 1, host: "m1", port: 6379, pool_size: 2, role: master }
  - id: 1
    hash_base: 1
    nodes:
      - { shard: 0, host: "sessions", port: 6380, password: "pw", pool_size: 3, role: master }
"#;

#[tokio::test]
async fn test_build_from_config() {
    let cluster = MockCluster::new();
    cluster.require_password(&Endpoint::new("sessions", 6380), "pw");
    let config = Config::from_yaml_str(TOPOLOGY).expect("Failed to parse config");
    assert_eq!(config.keepalive_interval().as_secs(), 15);

    let registry = PoolRegistry::builder()
        .build_from_config(&config, cluster.transport())
        .await
        .expect("Failed to build registry");

    assert_eq!(registry.type_count(), 2);
    assert_eq!(registry.hash_base(0), 2);
    assert_eq!(registry.hash_base(1), 1);
    assert_eq!(registry.group_sizes(0, 0).unwrap().replicas, vec![2]);
    assert_eq!(registry.group_sizes(1, 0).unwrap().master, 3);

    let conn = registry.acquire(0, 0, Role::Replica).unwrap();
    assert_eq!(conn.endpoint().host, "r0");
    registry.release(conn);

    let conn = registry.acquire(0, 1, Role::Replica).unwrap();
    assert_eq!(conn.endpoint().host, "m1");
    registry.release(conn);
}

#[tokio::test]
async fn test_build_from_config_skips_dead_nodes() {
    let cluster = MockCluster::new();
    cluster.set_unreachable(&Endpoint::new("m1", 6379), true);
    cluster.require_password(&Endpoint::new("sessions", 6380), "pw");
    let config = Config::from_yaml_str(TOPOLOGY).unwrap();

    let registry = PoolRegistry::from_config(&config, cluster.transport())
        .await
        .expect("A dead node must not fail the build");

    assert_eq!(registry.shard_status(0, 0).unwrap(), ShardStatus::Working);
    assert_eq!(registry.shard_status(0, 1).unwrap(), ShardStatus::Unconnected);
    assert!(matches!(
        registry.acquire(0, 1, Role::Master),
        Err(PoolError::Exhausted { .. })
    ));
}

#[tokio::test]
async fn test_config_file_roundtrip() {
    let mut path = std::env::temp_dir();
    path.push(format!("shardpool_test_{}.yaml", std::process::id()));
    tokio::fs::write(&path, TOPOLOGY).await.unwrap();

    let config = Config::from_yaml_file(path.to_str().unwrap()).await.unwrap();
    assert_eq!(config.cache_types.len(), 2);
    assert_eq!(config.cache_types[1].nodes[0].password, "pw");

    let _ = tokio::fs::remove_file(&path).await;
}

#[test]
fn test_config_rejects_empty_host() {
    let yaml = r#"
cache_types:
  - id: 0
    hash_base: 1
    nodes:
      - { shard: 0, host: "", port: 6379, role: master }
"#;

    match Config::from_yaml_str(yaml) {
        Err(ConfigError::ValidationError(msg)) => assert!(msg.contains("without host")),
        other => panic!("Expected validation error, got {:?}", other),
    }
}
