use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Address of one remote node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Reply returned by the remote store for one issued command
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    String(String),
    Array(Vec<Reply>),
    Integer(i64),
    Status(String),
    Nil,
    Error(String),
}

impl Reply {
    /// The single acceptance rule for replies: string, array, integer and
    /// status replies succeed; nil and error replies fail.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Reply::String(_) | Reply::Array(_) | Reply::Integer(_) | Reply::Status(_)
        )
    }

    /// Textual payload of string and status replies
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Reply::String(s) | Reply::Status(s) => Some(s),
            _ => None,
        }
    }

    /// True when the reply carries `token` as its payload, ignoring ASCII case
    pub fn is_token(&self, token: &str) -> bool {
        self.as_text()
            .map(|text| text.eq_ignore_ascii_case(token))
            .unwrap_or(false)
    }
}

/// Wire client used to open links to remote nodes.
///
/// The pool never speaks the store's protocol itself; it only opens links,
/// issues the handful of commands it needs (`AUTH`, `PING`) and closes them.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new link to `endpoint`, giving up after `timeout`
    async fn open(&self, endpoint: &Endpoint, timeout: Duration)
        -> Result<Box<dyn Link>, TransportError>;
}

/// One open link to a remote node, exclusively owned by a `Connection`.
///
/// Implementations must release the underlying socket on drop. The pool
/// calls `close` wherever it can await, but a connection returned to a
/// shard that has been closed is dropped without it.
#[async_trait]
pub trait Link: Send + Sync {
    /// Send one command and wait for its reply
    async fn issue(&mut self, command: &str, args: &[&str]) -> Result<Reply, TransportError>;

    /// Tear the link down. Dropping a link must also release it.
    async fn close(&mut self);
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Node {0} unreachable: {1}")]
    Unreachable(String, String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Link closed")]
    Closed,
}
