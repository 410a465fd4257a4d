use super::connection::{Connection, NodeSettings, Role};
use super::group::{ConnectionGroup, SweepReport};
use super::transport::Transport;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, PoisonError};
use tracing::{debug, info, warn};

/// Health of a shard as seen by the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShardStatus {
    /// No master connection has ever been established
    Unconnected = 0,
    /// At least one master connection has been established
    Working = 1,
    /// An acquire found the master queue empty
    Dead = 2,
}

impl ShardStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ShardStatus::Working,
            2 => ShardStatus::Dead,
            _ => ShardStatus::Unconnected,
        }
    }
}

impl fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardStatus::Unconnected => f.write_str("unconnected"),
            ShardStatus::Working => f.write_str("working"),
            ShardStatus::Dead => f.write_str("dead"),
        }
    }
}

/// Idle connection counts of one shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSizes {
    pub master: usize,
    pub replicas: Vec<usize>,
}

/// Master queue plus one queue per registered replica host for a single
/// shard of a cache type.
pub struct ShardSlice {
    cache_type: usize,
    index: usize,
    status: AtomicU8,
    master: ConnectionGroup,
    // indexed by registration order; groups are never merged or removed
    replicas: RwLock<Vec<Arc<ConnectionGroup>>>,
    // serialises replica registration so group indexes are handed out once
    registration: tokio::sync::Mutex<()>,
}

impl ShardSlice {
    pub fn new(cache_type: usize, index: usize) -> Self {
        Self {
            cache_type,
            index,
            status: AtomicU8::new(ShardStatus::Unconnected as u8),
            master: ConnectionGroup::new(),
            replicas: RwLock::new(Vec::new()),
            registration: tokio::sync::Mutex::new(()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn status(&self) -> ShardStatus {
        ShardStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn has_replicas(&self) -> bool {
        !self.replica_list().is_empty()
    }

    pub fn group_sizes(&self) -> GroupSizes {
        GroupSizes {
            master: self.master.len(),
            replicas: self.replica_list().iter().map(|g| g.len()).collect(),
        }
    }

    /// Open `settings.pool_size` connections to one node.
    ///
    /// Master connections join the shard's master queue. A replica node gets
    /// a queue of its own, appended after the replica queues registered
    /// before it. Returns how many connections were established.
    pub async fn connect_node(
        &self,
        settings: &NodeSettings,
        transport: Arc<dyn Transport>,
    ) -> usize {
        match settings.role {
            Role::Master => self.connect_master(settings, transport).await,
            Role::Replica => self.connect_replica(settings, transport).await,
        }
    }

    async fn connect_master(
        &self,
        settings: &NodeSettings,
        transport: Arc<dyn Transport>,
    ) -> usize {
        if self.master.is_closed() {
            return 0;
        }
        let mut established = 0;
        for _ in 0..settings.pool_size {
            let conn = Connection::new(
                self.cache_type,
                self.index,
                0,
                settings,
                Arc::clone(&transport),
            );
            if let Some(conn) = open(conn).await {
                match self.master.push(conn) {
                    Ok(()) => {
                        self.set_status(ShardStatus::Working);
                        established += 1;
                    }
                    Err(mut conn) => {
                        conn.disconnect().await;
                        break;
                    }
                }
            }
        }
        established
    }

    async fn connect_replica(
        &self,
        settings: &NodeSettings,
        transport: Arc<dyn Transport>,
    ) -> usize {
        let _registering = self.registration.lock().await;
        if self.master.is_closed() {
            return 0;
        }
        let group_index = self.replica_list().len();

        let group = ConnectionGroup::new();
        let mut established = 0;
        for _ in 0..settings.pool_size {
            let conn = Connection::new(
                self.cache_type,
                self.index,
                group_index,
                settings,
                Arc::clone(&transport),
            );
            if let Some(conn) = open(conn).await {
                if group.push(conn).is_ok() {
                    established += 1;
                }
            }
        }

        // The group is registered even when empty so that indexes keep
        // following registration order.
        self.replicas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(group));
        debug!(
            cache_type = self.cache_type,
            shard = self.index,
            replica_group = group_index,
            established,
            "replica group registered"
        );
        established
    }

    /// Take an idle connection for `role`.
    ///
    /// Reads fall back to the master queue when the shard has no replicas.
    /// Otherwise `pick` chooses one replica group out of `n`, and an empty
    /// chosen group yields `None` without trying any other group.
    pub fn acquire(&self, role: Role, pick: impl FnOnce(usize) -> usize) -> Option<Connection> {
        let group = {
            let replicas = self.replica_list();
            if role == Role::Master || replicas.is_empty() {
                None
            } else {
                let chosen = pick(replicas.len()).min(replicas.len() - 1);
                Some(Arc::clone(&replicas[chosen]))
            }
        };

        match group {
            Some(group) => group.pop(),
            None => self.acquire_master(),
        }
    }

    fn acquire_master(&self) -> Option<Connection> {
        match self.master.pop() {
            Some(conn) => {
                let revived = self
                    .status
                    .compare_exchange(
                        ShardStatus::Dead as u8,
                        ShardStatus::Working as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok();
                if revived {
                    info!(cache_type = self.cache_type, shard = self.index, "shard working again");
                }
                Some(conn)
            }
            None => {
                if self.master.checking() == 0 && self.status() != ShardStatus::Dead {
                    self.set_status(ShardStatus::Dead);
                    warn!(
                        cache_type = self.cache_type,
                        shard = self.index,
                        "no master connection available, shard dead"
                    );
                }
                None
            }
        }
    }

    /// Put a connection back into the queue it was taken from. Once the
    /// shard is closed the connection is dropped, which releases its link.
    pub fn release(&self, conn: Connection) {
        let returned = match conn.role() {
            Role::Master => self.master.push(conn),
            Role::Replica => {
                let group = self.replica_list().get(conn.replica_group()).cloned();
                match group {
                    Some(group) => group.push(conn),
                    None => {
                        warn!(
                            cache_type = self.cache_type,
                            shard = self.index,
                            replica_group = conn.replica_group(),
                            "released connection has no replica group, dropping it"
                        );
                        return;
                    }
                }
            }
        };
        if returned.is_err() {
            debug!(
                cache_type = self.cache_type,
                shard = self.index,
                "shard closed, dropping released connection"
            );
        }
    }

    /// Ping every idle connection, reconnecting the ones that fail
    pub async fn keepalive(&self) -> SweepReport {
        info!(
            cache_type = self.cache_type,
            shard = self.index,
            status = %self.status(),
            "keepalive"
        );

        let mut report = self.master.sweep().await;
        let replicas: Vec<Arc<ConnectionGroup>> = self.replica_list().clone();
        for group in replicas {
            report.merge(group.sweep().await);
        }

        if report.repaired > 0 || report.unhealthy > 0 {
            info!(
                cache_type = self.cache_type,
                shard = self.index,
                repaired = report.repaired,
                unhealthy = report.unhealthy,
                "keepalive finished"
            );
        }
        report
    }

    /// Disconnect every idle connection and mark the shard dead. Waits for
    /// a replica registration in flight; connections out for a health check
    /// are disconnected when their check ends.
    pub async fn close(&self) {
        let _registering = self.registration.lock().await;
        let mut idle = self.master.close();
        let replicas: Vec<Arc<ConnectionGroup>> = self.replica_list().clone();
        for group in replicas {
            idle.extend(group.close());
        }
        for mut conn in idle {
            conn.disconnect().await;
        }
        self.set_status(ShardStatus::Dead);
    }

    fn set_status(&self, status: ShardStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    fn replica_list(&self) -> RwLockReadGuard<'_, Vec<Arc<ConnectionGroup>>> {
        self.replicas.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Connect a fresh connection, discarding it when connect or auth fails
async fn open(mut conn: Connection) -> Option<Connection> {
    match conn.connect().await {
        Ok(()) => Some(conn),
        Err(_) => {
            conn.disconnect().await;
            None
        }
    }
}
