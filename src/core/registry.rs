use super::cache_type::CacheType;
use super::connection::{Connection, NodeSettings, Role};
use super::group::SweepReport;
use super::shard::{GroupSizes, ShardSlice, ShardStatus};
use super::transport::Transport;
use crate::config::Config;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Upper bounds enforced at the registry boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Limits {
    #[serde(default = "default_limit")]
    pub max_cache_types: usize,
    #[serde(default = "default_limit")]
    pub max_hash_base: usize,
    #[serde(default = "default_limit")]
    pub max_pool_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_cache_types: default_limit(),
            max_hash_base: default_limit(),
            max_pool_size: default_limit(),
        }
    }
}

fn default_limit() -> usize {
    128
}

/// Top-level pool: a fixed table of cache types, each split into shards,
/// each shard holding a master queue and one queue per replica host.
///
/// Acquire and release never block on the network. Keepalive and shutdown
/// do, bounded by each connection's timeout.
pub struct PoolRegistry {
    limits: Limits,
    // None once shut down
    types: RwLock<Option<Arc<[CacheType]>>>,
    rng: Mutex<StdRng>,
    transport: Arc<dyn Transport>,
}

/// Builder for creating a registry
#[derive(Debug, Default)]
pub struct PoolRegistryBuilder {
    limits: Limits,
    seed: Option<u64>,
}

impl PoolRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Seed the replica selection so tests can reproduce a run
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Allocate `type_count` cache type slots
    pub fn init(
        self,
        type_count: usize,
        transport: Arc<dyn Transport>,
    ) -> Result<PoolRegistry, PoolError> {
        if type_count > self.limits.max_cache_types {
            return Err(PoolError::TooManyCacheTypes {
                requested: type_count,
                max: self.limits.max_cache_types,
            });
        }

        let types: Arc<[CacheType]> = (0..type_count).map(CacheType::new).collect();
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        info!(type_count, "pool registry initialised");

        Ok(PoolRegistry {
            limits: self.limits,
            types: RwLock::new(Some(types)),
            rng: Mutex::new(rng),
            transport,
        })
    }

    /// Build a registry and connect every node listed in `config`.
    ///
    /// Bound violations abort the build. A node that yields no connection
    /// is logged and skipped so one dead host does not keep the pool down.
    pub async fn build_from_config(
        self,
        config: &Config,
        transport: Arc<dyn Transport>,
    ) -> Result<PoolRegistry, PoolError> {
        let mut builder = self.limits(config.limits);
        if let Some(seed) = config.seed {
            builder = builder.seed(seed);
        }
        let registry = builder.init(config.cache_types.len(), transport)?;

        for cache in &config.cache_types {
            registry.register_shard_count(cache.id, cache.hash_base)?;
            for node in &cache.nodes {
                let settings = NodeSettings::new(node.host.clone(), node.port, node.role)
                    .with_password(node.password.clone())
                    .with_pool_size(node.pool_size)
                    .with_timeout(Duration::from_secs(node.timeout_secs));
                match registry.connect_node(cache.id, node.shard, &settings).await {
                    Ok(_) => {}
                    Err(e @ PoolError::NoConnectionEstablished { .. }) => {
                        warn!(
                            cache_type = cache.id,
                            shard = node.shard,
                            error = %e,
                            "skipping node"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(registry)
    }
}

impl PoolRegistry {
    pub fn builder() -> PoolRegistryBuilder {
        PoolRegistryBuilder::new()
    }

    /// Allocate `type_count` cache types with default limits
    pub fn init(type_count: usize, transport: Arc<dyn Transport>) -> Result<Self, PoolError> {
        PoolRegistryBuilder::new().init(type_count, transport)
    }

    /// Build a registry from a topology file's contents, taking limits and
    /// seed from the config. See [`PoolRegistryBuilder::build_from_config`].
    pub async fn from_config(
        config: &Config,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, PoolError> {
        PoolRegistryBuilder::new()
            .build_from_config(config, transport)
            .await
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Number of cache type slots, 0 after shutdown
    pub fn type_count(&self) -> usize {
        self.table().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_shut_down(&self) -> bool {
        self.table().is_err()
    }

    /// Fix the number of shards of a cache type. Can only be done once.
    pub fn register_shard_count(
        &self,
        cache_type: usize,
        hash_base: usize,
    ) -> Result<(), PoolError> {
        let table = self.table()?;
        let cache = cache_at(&table, cache_type)?;
        if hash_base == 0 || hash_base > self.limits.max_hash_base {
            return Err(PoolError::InvalidShardCount {
                hash_base,
                max: self.limits.max_hash_base,
            });
        }
        if !cache.register(hash_base) {
            return Err(PoolError::ShardCountAlreadySet(cache_type));
        }
        debug!(cache_type, hash_base, "shard count registered");
        Ok(())
    }

    /// Shard count of a cache type, 0 if unknown or unregistered
    pub fn hash_base(&self, cache_type: usize) -> usize {
        self.table()
            .ok()
            .and_then(|t| t.get(cache_type).map(|c| c.hash_base()))
            .unwrap_or(0)
    }

    /// Open `settings.pool_size` connections to one master or replica node
    /// of a shard. Returns the number of connections established, which is
    /// never 0 on success.
    pub async fn connect_node(
        &self,
        cache_type: usize,
        shard: usize,
        settings: &NodeSettings,
    ) -> Result<usize, PoolError> {
        if settings.endpoint.host.is_empty() {
            error!(cache_type, shard, "empty host");
            return Err(PoolError::EmptyHost);
        }
        if settings.pool_size > self.limits.max_pool_size {
            error!(cache_type, shard, pool_size = settings.pool_size, "pool size over limit");
            return Err(PoolError::PoolSizeTooLarge {
                pool_size: settings.pool_size,
                max: self.limits.max_pool_size,
            });
        }
        let table = self.table()?;
        let slice = shard_at(&table, cache_type, shard)?;

        info!(
            cache_type,
            shard,
            host = %settings.endpoint.host,
            port = settings.endpoint.port,
            pool_size = settings.pool_size,
            timeout_secs = settings.timeout.as_secs(),
            role = %settings.role,
            "connecting node"
        );
        let established = slice
            .connect_node(settings, Arc::clone(&self.transport))
            .await;

        if established == 0 {
            return Err(PoolError::NoConnectionEstablished {
                endpoint: settings.endpoint.to_string(),
                role: settings.role,
            });
        }
        Ok(established)
    }

    /// Check out an idle connection. Never waits: an empty queue is reported
    /// as [`PoolError::Exhausted`].
    pub fn acquire(
        &self,
        cache_type: usize,
        shard: usize,
        role: Role,
    ) -> Result<Connection, PoolError> {
        let table = self.table()?;
        let slice = shard_at(&table, cache_type, shard)?;
        slice
            .acquire(role, |groups| self.pick(groups))
            .ok_or(PoolError::Exhausted {
                cache_type,
                shard,
                role,
            })
    }

    /// Return a checked-out connection to the queue it came from. After
    /// shutdown the connection is dropped instead.
    pub fn release(&self, conn: Connection) {
        let table = match self.table() {
            Ok(table) => table,
            Err(_) => {
                debug!(
                    cache_type = conn.cache_type(),
                    shard = conn.shard(),
                    "registry shut down, dropping released connection"
                );
                return;
            }
        };
        match shard_at(&table, conn.cache_type(), conn.shard()) {
            Ok(slice) => slice.release(conn),
            Err(e) => warn!(error = %e, "released connection does not belong to this registry"),
        }
    }

    /// Health-check every idle connection of every registered cache type.
    /// Meant to be called periodically; see [`crate::core::KeepaliveTask`].
    pub async fn keepalive(&self) -> SweepReport {
        let Ok(table) = self.table() else {
            return SweepReport::default();
        };

        let mut report = SweepReport::default();
        for cache in table.iter().filter(|c| c.hash_base() > 0) {
            report.merge(cache.keepalive().await);
        }
        debug!(
            alive = report.alive,
            repaired = report.repaired,
            unhealthy = report.unhealthy,
            "keepalive sweep done"
        );
        report
    }

    /// Disconnect every idle connection and drop the tables. Later calls
    /// fail with [`PoolError::ShutDown`]; calling this again is a no-op.
    pub async fn shutdown(&self) {
        let taken = self
            .types
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(table) = taken else {
            return;
        };

        for cache in table.iter().filter(|c| c.hash_base() > 0) {
            cache.close().await;
        }
        info!("pool registry shut down");
    }

    pub fn shard_status(&self, cache_type: usize, shard: usize) -> Result<ShardStatus, PoolError> {
        let table = self.table()?;
        Ok(shard_at(&table, cache_type, shard)?.status())
    }

    /// Idle connection counts of one shard
    pub fn group_sizes(&self, cache_type: usize, shard: usize) -> Result<GroupSizes, PoolError> {
        let table = self.table()?;
        Ok(shard_at(&table, cache_type, shard)?.group_sizes())
    }

    fn table(&self) -> Result<Arc<[CacheType]>, PoolError> {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PoolError::ShutDown)
    }

    fn pick(&self, groups: usize) -> usize {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(0..groups)
    }
}

fn cache_at(table: &[CacheType], cache_type: usize) -> Result<&CacheType, PoolError> {
    table.get(cache_type).ok_or(PoolError::InvalidCacheType {
        cache_type,
        type_count: table.len(),
    })
}

fn shard_at(
    table: &[CacheType],
    cache_type: usize,
    shard: usize,
) -> Result<&ShardSlice, PoolError> {
    let cache = cache_at(table, cache_type)?;
    if cache.hash_base() == 0 {
        return Err(PoolError::UnregisteredCacheType(cache_type));
    }
    cache.shard(shard).ok_or(PoolError::InvalidShard {
        cache_type,
        shard,
        hash_base: cache.hash_base(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Requested {requested} cache types, at most {max} allowed")]
    TooManyCacheTypes { requested: usize, max: usize },
    #[error("Cache type {cache_type} out of range (registry has {type_count})")]
    InvalidCacheType { cache_type: usize, type_count: usize },
    #[error("Shard count {hash_base} outside 1..={max}")]
    InvalidShardCount { hash_base: usize, max: usize },
    #[error("Shard count of cache type {0} is already set")]
    ShardCountAlreadySet(usize),
    #[error("Cache type {0} has no shard count registered")]
    UnregisteredCacheType(usize),
    #[error("Shard {shard} out of range for cache type {cache_type} (hash base {hash_base})")]
    InvalidShard {
        cache_type: usize,
        shard: usize,
        hash_base: usize,
    },
    #[error("Pool size {pool_size} exceeds the limit of {max}")]
    PoolSizeTooLarge { pool_size: usize, max: usize },
    #[error("Node host is empty")]
    EmptyHost,
    #[error("No {role} connection could be established to {endpoint}")]
    NoConnectionEstablished { endpoint: String, role: Role },
    #[error("No idle {role} connection for cache type {cache_type} shard {shard}")]
    Exhausted {
        cache_type: usize,
        shard: usize,
        role: Role,
    },
    #[error("Pool registry has been shut down")]
    ShutDown,
}
