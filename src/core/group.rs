use super::connection::{Connection, Health};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// FIFO queue of idle connections sharing one role (the master queue of a
/// shard, or the queue of one replica host).
///
/// Connections are appended on release and popped from the front on
/// acquire, so the connection idle the longest is reused first.
#[derive(Debug, Default)]
pub struct ConnectionGroup {
    inner: Mutex<GroupInner>,
}

#[derive(Debug, Default)]
struct GroupInner {
    idle: VecDeque<Connection>,
    // taken out by the keepalive sweep, not by callers
    checking: usize,
    // id of the latest keepalive pass
    pass: u64,
    closed: bool,
}

impl GroupInner {
    fn offer(&mut self, conn: Connection) -> Result<(), Connection> {
        if self.closed {
            return Err(conn);
        }
        self.idle.push_back(conn);
        Ok(())
    }
}

/// Tally of one keepalive pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub alive: usize,
    pub repaired: usize,
    pub unhealthy: usize,
}

impl SweepReport {
    pub fn checked(&self) -> usize {
        self.alive + self.repaired + self.unhealthy
    }

    pub fn merge(&mut self, other: SweepReport) {
        self.alive += other.alive;
        self.repaired += other.repaired;
        self.unhealthy += other.unhealthy;
    }

    fn record(&mut self, health: Health) {
        match health {
            Health::Alive => self.alive += 1,
            Health::Repaired => self.repaired += 1,
            Health::Unhealthy => self.unhealthy += 1,
        }
    }
}

impl ConnectionGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the oldest idle connection, if any
    pub fn pop(&self) -> Option<Connection> {
        self.lock().idle.pop_front()
    }

    /// Return a connection to the back of the queue. A closed group hands
    /// the connection back instead.
    pub fn push(&self, conn: Connection) -> Result<(), Connection> {
        self.lock().offer(conn)
    }

    pub fn len(&self) -> usize {
        self.lock().idle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().idle.is_empty()
    }

    /// Connections currently out for a health check
    pub fn checking(&self) -> usize {
        self.lock().checking
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Stop accepting connections and remove every idle one. Connections
    /// pushed afterwards, including those out for a health check, are
    /// handed back to whoever returns them.
    pub fn close(&self) -> Vec<Connection> {
        let mut inner = self.lock();
        inner.closed = true;
        inner.idle.drain(..).collect()
    }

    /// Health-check every idle connection once.
    ///
    /// Connections are taken out one at a time and the lock is released
    /// while the network round trips run, so callers can keep acquiring and
    /// releasing during a slow sweep. Each connection is tagged with the
    /// pass that checked it, so one returned by a caller mid-sweep is still
    /// checked and one already checked is skipped. A connection whose group
    /// closed during its check is disconnected.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let pass = {
            let mut inner = self.lock();
            inner.pass += 1;
            inner.pass
        };

        loop {
            let taken = {
                let mut inner = self.lock();
                let next = inner.idle.iter().position(|c| c.swept_in() != pass);
                let conn = next.and_then(|at| inner.idle.remove(at));
                if conn.is_some() {
                    inner.checking += 1;
                }
                conn
            };
            let Some(mut conn) = taken else {
                break;
            };

            report.record(conn.check_health().await);
            conn.mark_swept(pass);

            let rejected = {
                let mut inner = self.lock();
                inner.checking -= 1;
                inner.offer(conn).err()
            };
            if let Some(mut conn) = rejected {
                conn.disconnect().await;
            }
        }

        report
    }

    fn lock(&self) -> MutexGuard<'_, GroupInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
