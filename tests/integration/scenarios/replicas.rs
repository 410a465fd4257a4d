//! Replica selection and release routing tests

use crate::integration::MockCluster;
use shardpool::core::{NodeSettings, PoolError, PoolRegistry, Role};
use std::sync::atomic::{AtomicUsize, Ordering};

async fn shard_with_replicas(cluster: &MockCluster, replicas: &[(&str, usize)]) -> PoolRegistry {
    let registry = PoolRegistry::builder()
        .seed(42)
        .init(1, cluster.transport())
        .unwrap();
    registry.register_shard_count(0, 1).unwrap();
    registry
        .connect_node(0, 0, &NodeSettings::master("master", 6379).with_pool_size(2))
        .await
        .unwrap();
    for (host, pool_size) in replicas {
        let settings = NodeSettings::replica(*host, 6379).with_pool_size(*pool_size);
        let _ = registry.connect_node(0, 0, &settings).await;
    }
    registry
}

#[tokio::test]
async fn test_reads_use_master_without_replicas() {
    let cluster = MockCluster::new();
    let registry = shard_with_replicas(&cluster, &[]).await;

    let conn = registry.acquire(0, 0, Role::Replica).unwrap();
    assert_eq!(conn.role(), Role::Master);
    assert_eq!(conn.endpoint().host, "master");
    assert_eq!(registry.group_sizes(0, 0).unwrap().master, 1);

    registry.release(conn);
    assert_eq!(registry.group_sizes(0, 0).unwrap().master, 2);
}

#[tokio::test]
async fn test_empty_replica_group_has_no_fallback() {
    let cluster = MockCluster::new();
    cluster.set_unreachable(&shardpool::core::Endpoint::new("dead-replica", 6379), true);
    let registry = shard_with_replicas(&cluster, &[("live-replica", 2), ("dead-replica", 2)]).await;
    assert_eq!(registry.group_sizes(0, 0).unwrap().replicas, vec![2, 0]);

    let mut hits = 0;
    let mut misses = 0;
    for _ in 0..200 {
        match registry.acquire(0, 0, Role::Replica) {
            Ok(conn) => {
                assert_eq!(conn.endpoint().host, "live-replica");
                assert_eq!(conn.replica_group(), 0);
                hits += 1;
                registry.release(conn);
            }
            Err(PoolError::Exhausted { role, .. }) => {
                assert_eq!(role, Role::Replica);
                misses += 1;
            }
            Err(other) => panic!("Unexpected error: {}", other),
        }
    }

    assert!(hits > 0, "Never drew from the live replica group");
    assert!(misses > 0, "Never drew the empty replica group");
    // Misses on replicas never touch the master queue
    assert_eq!(registry.group_sizes(0, 0).unwrap().master, 2);
}

#[tokio::test]
async fn test_replica_selection_reaches_every_group() {
    let cluster = MockCluster::new();
    let registry = shard_with_replicas(&cluster, &[("r0", 1), ("r1", 1), ("r2", 1)]).await;

    let mut seen = [0usize; 3];
    for _ in 0..300 {
        if let Ok(conn) = registry.acquire(0, 0, Role::Replica) {
            seen[conn.replica_group()] += 1;
            registry.release(conn);
        }
    }
    assert!(seen.iter().all(|&count| count > 0), "Selection skewed: {:?}", seen);
}

#[tokio::test]
async fn test_same_seed_same_selection() {
    let run = || async {
        let cluster = MockCluster::new();
        let registry = shard_with_replicas(&cluster, &[("r0", 1), ("r1", 1), ("r2", 1)]).await;
        let mut picks = Vec::new();
        for _ in 0..20 {
            let conn = registry.acquire(0, 0, Role::Replica).unwrap();
            picks.push(conn.replica_group());
            registry.release(conn);
        }
        picks
    };

    assert_eq!(run().await, run().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_release_returns_to_origin_group_under_load() {
    let cluster = MockCluster::new();
    let hosts = ["r0", "r1", "r2"];
    let registry = shard_with_replicas(&cluster, &[("r0", 4), ("r1", 4), ("r2", 4)]).await;
    let acquired = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                for _ in 0..500 {
                    let Ok(conn) = registry.acquire(0, 0, Role::Replica) else {
                        continue;
                    };
                    assert_eq!(conn.role(), Role::Replica);
                    assert_eq!(conn.endpoint().host, hosts[conn.replica_group()]);
                    acquired.fetch_add(1, Ordering::Relaxed);
                    registry.release(conn);
                }
            });
        }
    });

    assert!(acquired.load(Ordering::Relaxed) > 0);
    assert_eq!(registry.group_sizes(0, 0).unwrap().replicas, vec![4, 4, 4]);

    // Every connection sits in the group matching its recorded index
    let mut held = Vec::new();
    for _ in 0..200 {
        if let Ok(conn) = registry.acquire(0, 0, Role::Replica) {
            assert_eq!(conn.endpoint().host, hosts[conn.replica_group()]);
            held.push(conn);
        }
    }
    assert_eq!(held.len(), 12);
    for conn in held {
        registry.release(conn);
    }
}
