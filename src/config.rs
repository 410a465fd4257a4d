use crate::core::{Limits, Role};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Static pool topology: which nodes serve which shard of which cache type
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub limits: Limits,
    /// Seed for replica selection; random when absent
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
    pub cache_types: Vec<CacheTypeConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheTypeConfig {
    pub id: usize,
    pub hash_base: usize,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
    pub shard: usize,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub role: Role,
}

fn default_keepalive_interval_secs() -> u64 {
    30
}
fn default_pool_size() -> usize {
    4
}
fn default_timeout_secs() -> u64 {
    5
}

impl Config {
    /// Load configuration from a YAML file
    pub async fn from_yaml_file(path: &str) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Self::from_yaml_str(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    /// Validate configuration for common errors
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.limits;
        if self.cache_types.len() > limits.max_cache_types {
            return Err(ConfigError::ValidationError(format!(
                "{} cache types configured, at most {} allowed",
                self.cache_types.len(),
                limits.max_cache_types
            )));
        }
        if self.keepalive_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "keepalive_interval_secs must be positive".to_string(),
            ));
        }

        // Cache type ids index a dense table
        let mut seen = HashSet::new();
        for cache in &self.cache_types {
            if cache.id >= self.cache_types.len() || !seen.insert(cache.id) {
                return Err(ConfigError::ValidationError(format!(
                    "Cache type ids must be unique and below {}, got {}",
                    self.cache_types.len(),
                    cache.id
                )));
            }
            if cache.hash_base == 0 || cache.hash_base > limits.max_hash_base {
                return Err(ConfigError::ValidationError(format!(
                    "Cache type {} has hash_base {}, expected 1..={}",
                    cache.id, cache.hash_base, limits.max_hash_base
                )));
            }

            for node in &cache.nodes {
                if node.host.is_empty() {
                    return Err(ConfigError::ValidationError(format!(
                        "Cache type {} shard {} has a node without host",
                        cache.id, node.shard
                    )));
                }
                if node.shard >= cache.hash_base {
                    return Err(ConfigError::ValidationError(format!(
                        "Node {}:{} references shard {} but cache type {} has {} shards",
                        node.host, node.port, node.shard, cache.id, cache.hash_base
                    )));
                }
                if node.pool_size > limits.max_pool_size {
                    return Err(ConfigError::ValidationError(format!(
                        "Node {}:{} pool_size {} exceeds {}",
                        node.host, node.port, node.pool_size, limits.max_pool_size
                    )));
                }
                if node.timeout_secs == 0 {
                    return Err(ConfigError::ValidationError(format!(
                        "Node {}:{} needs a positive timeout_secs",
                        node.host, node.port
                    )));
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}
