use super::transport::{Endpoint, Link, Reply, Transport, TransportError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Emit a tracing event carrying the node identity of a connection
macro_rules! node_event {
    ($level:ident, $conn:expr, $($msg:tt)+) => {
        tracing::$level!(
            cache_type = $conn.cache_type,
            shard = $conn.shard,
            host = %$conn.endpoint.host,
            port = $conn.endpoint.port,
            pool_size = $conn.pool_size,
            timeout_secs = $conn.timeout.as_secs(),
            role = %$conn.role,
            $($msg)+
        )
    };
}

/// Read/write role of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Master,
    Replica,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => f.write_str("master"),
            Role::Replica => f.write_str("replica"),
        }
    }
}

/// Numeric role codes: 0 is master, 1 is replica
impl TryFrom<u32> for Role {
    type Error = InvalidRole;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Role::Master),
            1 => Ok(Role::Replica),
            other => Err(InvalidRole(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid role code: {0}")]
pub struct InvalidRole(pub u32);

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    Reconnecting,
}

/// Result of one health check performed by the keepalive sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// Ping answered
    Alive,
    /// Ping failed, reconnect succeeded
    Repaired,
    /// Ping and reconnect both failed
    Unhealthy,
}

/// Everything needed to open connections to one node
#[derive(Clone)]
pub struct NodeSettings {
    pub endpoint: Endpoint,
    pub password: String,
    pub pool_size: usize,
    pub timeout: Duration,
    pub role: Role,
}

impl NodeSettings {
    pub fn new(host: impl Into<String>, port: u16, role: Role) -> Self {
        Self {
            endpoint: Endpoint::new(host, port),
            password: String::new(),
            pool_size: 1,
            timeout: Duration::from_secs(5),
            role,
        }
    }

    pub fn master(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port, Role::Master)
    }

    pub fn replica(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port, Role::Replica)
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// The password is deliberately left out.
impl fmt::Debug for NodeSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSettings")
            .field("endpoint", &self.endpoint)
            .field("pool_size", &self.pool_size)
            .field("timeout", &self.timeout)
            .field("role", &self.role)
            .finish()
    }
}

/// One pooled link to a master or replica node.
///
/// A connection knows where it belongs (cache type, shard, role and, for
/// replicas, the replica group it was opened for) so that it can be routed
/// back to the right queue on release.
pub struct Connection {
    cache_type: usize,
    shard: usize,
    role: Role,
    replica_group: usize,
    endpoint: Endpoint,
    password: String,
    pool_size: usize,
    timeout: Duration,
    state: ConnectionState,
    link: Option<Box<dyn Link>>,
    transport: Arc<dyn Transport>,
    // keepalive pass that last checked this connection
    swept_in: u64,
}

impl Connection {
    pub fn new(
        cache_type: usize,
        shard: usize,
        replica_group: usize,
        settings: &NodeSettings,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            cache_type,
            shard,
            role: settings.role,
            replica_group,
            endpoint: settings.endpoint.clone(),
            password: settings.password.clone(),
            pool_size: settings.pool_size,
            timeout: settings.timeout,
            state: ConnectionState::Disconnected,
            link: None,
            transport,
            swept_in: 0,
        }
    }

    pub fn cache_type(&self) -> usize {
        self.cache_type
    }

    pub fn shard(&self) -> usize {
        self.shard
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Replica group index recorded at connect time; meaningless for masters
    pub fn replica_group(&self) -> usize {
        self.replica_group
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Open a fresh link and authenticate on it. Any link held before is
    /// closed first.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        if let Some(mut old) = self.link.take() {
            old.close().await;
        }
        self.state = ConnectionState::Connecting;

        match self.open_link().await {
            Ok(link) => self.link = Some(link),
            Err(e) => {
                node_event!(error, self, error = %e, "connect failed");
                self.state = ConnectionState::Disconnected;
                return Err(ConnectionError::ConnectFailed(e));
            }
        }

        self.authenticate().await?;
        node_event!(info, self, "connected");
        Ok(())
    }

    /// Authenticate the current link. Without a password this succeeds
    /// immediately; otherwise the node has to acknowledge with `OK`.
    pub async fn authenticate(&mut self) -> Result<(), ConnectionError> {
        self.state = ConnectionState::Authenticating;
        if self.password.is_empty() {
            self.state = ConnectionState::Ready;
            return Ok(());
        }

        let password = self.password.clone();
        let accepted = match self.request("AUTH", &[password.as_str()]).await {
            Ok(reply) => reply.is_token("OK"),
            Err(_) => false,
        };

        if accepted {
            node_event!(debug, self, "authenticated");
            self.state = ConnectionState::Ready;
            Ok(())
        } else {
            // The link stays open but must not be handed to callers.
            node_event!(error, self, "authentication rejected");
            self.state = ConnectionState::Disconnected;
            Err(ConnectionError::AuthRejected(self.endpoint.to_string()))
        }
    }

    /// Liveness probe on a ready connection: the node must answer `PONG`.
    ///
    /// Only confirms a connection that is already ready. Anything else is
    /// reported as not connected without touching the link, since only
    /// `authenticate` may move a connection to ready.
    pub async fn ping(&mut self) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Ready {
            return Err(ConnectionError::NotConnected);
        }

        let alive = match self.request("PING", &[]).await {
            Ok(reply) => reply.is_token("PONG"),
            Err(_) => false,
        };

        if alive {
            node_event!(debug, self, "ping ok");
            Ok(())
        } else {
            node_event!(warn, self, "ping failed");
            self.state = ConnectionState::Disconnected;
            Err(ConnectionError::PingFailed(self.endpoint.to_string()))
        }
    }

    /// Replace the link with a new one. The old link is only torn down once
    /// the new one is open; if opening fails the old link is kept as is.
    pub async fn reconnect(&mut self) -> Result<(), ConnectionError> {
        self.state = ConnectionState::Reconnecting;

        let fresh = match self.open_link().await {
            Ok(link) => link,
            Err(e) => {
                node_event!(warn, self, error = %e, "reconnect failed");
                self.state = ConnectionState::Disconnected;
                return Err(ConnectionError::ConnectFailed(e));
            }
        };

        if let Some(mut old) = self.link.replace(fresh) {
            old.close().await;
        }
        self.authenticate().await?;
        node_event!(info, self, "reconnected");
        Ok(())
    }

    /// Ping a ready connection. A failed ping, or a connection that is not
    /// ready to begin with, gets exactly one reconnect.
    pub async fn check_health(&mut self) -> Health {
        if self.is_connected() && self.ping().await.is_ok() {
            return Health::Alive;
        }
        match self.reconnect().await {
            Ok(()) => Health::Repaired,
            Err(_) => Health::Unhealthy,
        }
    }

    /// Issue a command on a checked-out connection. The raw reply is
    /// returned; use [`Reply::is_success`] to apply the acceptance rule.
    pub async fn issue(&mut self, command: &str, args: &[&str]) -> Result<Reply, ConnectionError> {
        if self.state != ConnectionState::Ready {
            return Err(ConnectionError::NotConnected);
        }
        self.request(command, args).await
    }

    /// Close the link and forget it
    pub async fn disconnect(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close().await;
            node_event!(debug, self, "disconnected");
        }
        self.state = ConnectionState::Disconnected;
    }

    async fn open_link(&self) -> Result<Box<dyn Link>, TransportError> {
        match timeout(self.timeout, self.transport.open(&self.endpoint, self.timeout)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        }
    }

    async fn request(&mut self, command: &str, args: &[&str]) -> Result<Reply, ConnectionError> {
        let limit = self.timeout;
        let link = self.link.as_mut().ok_or(ConnectionError::NotConnected)?;
        match timeout(limit, link.issue(command, args)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(ConnectionError::Transport(e)),
            Err(_) => Err(ConnectionError::Timeout(limit)),
        }
    }

    pub(crate) fn swept_in(&self) -> u64 {
        self.swept_in
    }

    pub(crate) fn mark_swept(&mut self, pass: u64) {
        self.swept_in = pass;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("cache_type", &self.cache_type)
            .field("shard", &self.shard)
            .field("role", &self.role)
            .field("replica_group", &self.replica_group)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection failed: {0}")]
    ConnectFailed(TransportError),
    #[error("Authentication rejected by {0}")]
    AuthRejected(String),
    #[error("Ping to {0} failed")]
    PingFailed(String),
    #[error("Connection is not ready")]
    NotConnected,
    #[error("No reply within {0:?}")]
    Timeout(Duration),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}
