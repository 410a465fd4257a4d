//! In-memory mock of a key-value cluster for integration testing
//!
//! Implements the pool's `Transport` so tests can:
//! - Make nodes unreachable or slow to accept links
//! - Require a password and reject anything else
//! - Fail a number of upcoming pings
//! - Count opens, closes and commands per node for assertions

use async_trait::async_trait;
use shardpool::core::{Endpoint, Link, Reply, Transport, TransportError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Behaviour of one mock node
#[derive(Debug, Clone, Default)]
pub struct NodeBehaviour {
    pub unreachable: bool,
    pub password: Option<String>,
    pub failing_pings: usize,
    pub open_delay: Option<Duration>,
}

/// Statistics tracked per node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub opens: usize,
    pub closes: usize,
    pub pings: usize,
    pub auths: usize,
    pub commands: usize,
}

#[derive(Debug, Default)]
struct NodeState {
    behaviour: NodeBehaviour,
    stats: NodeStats,
}

/// Mock cluster shared by every link it opens
#[derive(Clone, Default)]
pub struct MockCluster {
    nodes: Arc<Mutex<HashMap<Endpoint, NodeState>>>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cluster as the trait object the registry expects
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }

    pub fn configure(&self, endpoint: &Endpoint, f: impl FnOnce(&mut NodeBehaviour)) {
        let mut nodes = self.nodes.lock().unwrap();
        f(&mut nodes.entry(endpoint.clone()).or_default().behaviour);
    }

    pub fn set_unreachable(&self, endpoint: &Endpoint, unreachable: bool) {
        self.configure(endpoint, |b| b.unreachable = unreachable);
    }

    pub fn require_password(&self, endpoint: &Endpoint, password: &str) {
        self.configure(endpoint, |b| b.password = Some(password.to_string()));
    }

    pub fn fail_next_pings(&self, endpoint: &Endpoint, count: usize) {
        self.configure(endpoint, |b| b.failing_pings = count);
    }

    pub fn set_open_delay(&self, endpoint: &Endpoint, delay: Duration) {
        self.configure(endpoint, |b| b.open_delay = Some(delay));
    }

    pub fn stats(&self, endpoint: &Endpoint) -> NodeStats {
        let nodes = self.nodes.lock().unwrap();
        nodes
            .get(endpoint)
            .map(|n| n.stats.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transport for MockCluster {
    async fn open(
        &self,
        endpoint: &Endpoint,
        _timeout: Duration,
    ) -> Result<Box<dyn Link>, TransportError> {
        // Read behaviour without holding the lock across await
        let behaviour = {
            let mut nodes = self.nodes.lock().unwrap();
            nodes.entry(endpoint.clone()).or_default().behaviour.clone()
        };

        if let Some(delay) = behaviour.open_delay {
            tokio::time::sleep(delay).await;
        }
        if behaviour.unreachable {
            return Err(TransportError::Unreachable(
                endpoint.to_string(),
                "connection refused".to_string(),
            ));
        }

        let mut nodes = self.nodes.lock().unwrap();
        nodes.entry(endpoint.clone()).or_default().stats.opens += 1;
        Ok(Box::new(MockLink {
            endpoint: endpoint.clone(),
            nodes: Arc::clone(&self.nodes),
        }))
    }
}

struct MockLink {
    endpoint: Endpoint,
    nodes: Arc<Mutex<HashMap<Endpoint, NodeState>>>,
}

#[async_trait]
impl Link for MockLink {
    async fn issue(&mut self, command: &str, args: &[&str]) -> Result<Reply, TransportError> {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes.entry(self.endpoint.clone()).or_default();

        let reply = match command.to_uppercase().as_str() {
            "PING" => {
                node.stats.pings += 1;
                if node.behaviour.failing_pings > 0 {
                    node.behaviour.failing_pings -= 1;
                    return Err(TransportError::Io("connection reset by peer".to_string()));
                }
                Reply::Status("PONG".to_string())
            }
            "AUTH" => {
                node.stats.auths += 1;
                match (&node.behaviour.password, args.first()) {
                    (Some(expected), Some(given)) if expected == given => {
                        Reply::Status("OK".to_string())
                    }
                    (None, _) => Reply::Error("ERR no password is set".to_string()),
                    _ => Reply::Error("WRONGPASS invalid username-password pair".to_string()),
                }
            }
            "GET" => {
                node.stats.commands += 1;
                Reply::Nil
            }
            _ => {
                node.stats.commands += 1;
                Reply::Status("OK".to_string())
            }
        };
        Ok(reply)
    }

    async fn close(&mut self) {
        let mut nodes = self.nodes.lock().unwrap();
        nodes.entry(self.endpoint.clone()).or_default().stats.closes += 1;
    }
}
