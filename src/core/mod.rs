pub mod cache_type;
pub mod connection;
pub mod group;
pub mod keepalive;
pub mod registry;
pub mod shard;
pub mod transport;


// Re-export core types
pub use cache_type::CacheType;
pub use connection::{Connection, ConnectionError, ConnectionState, Health, NodeSettings, Role};
pub use group::{ConnectionGroup, SweepReport};
pub use keepalive::KeepaliveTask;
pub use registry::{Limits, PoolError, PoolRegistry, PoolRegistryBuilder};
pub use shard::{GroupSizes, ShardSlice, ShardStatus};
pub use transport::{Endpoint, Link, Reply, Transport, TransportError};
