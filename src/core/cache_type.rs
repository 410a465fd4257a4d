use super::group::SweepReport;
use super::shard::ShardSlice;
use futures::future::join_all;
use std::sync::OnceLock;

/// One logical cache split into a fixed number of shards
pub struct CacheType {
    id: usize,
    shards: OnceLock<Box<[ShardSlice]>>,
}

impl CacheType {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            shards: OnceLock::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Allocate the shard table. Returns false if it was already allocated.
    pub fn register(&self, hash_base: usize) -> bool {
        let shards: Box<[ShardSlice]> = (0..hash_base)
            .map(|index| ShardSlice::new(self.id, index))
            .collect();
        self.shards.set(shards).is_ok()
    }

    /// Number of shards, 0 while unregistered
    pub fn hash_base(&self) -> usize {
        self.shards().len()
    }

    pub fn shards(&self) -> &[ShardSlice] {
        self.shards.get().map(|s| &s[..]).unwrap_or(&[])
    }

    pub fn shard(&self, index: usize) -> Option<&ShardSlice> {
        self.shards().get(index)
    }

    /// Sweep all shards concurrently
    pub async fn keepalive(&self) -> SweepReport {
        let reports = join_all(self.shards().iter().map(|shard| shard.keepalive())).await;
        reports.into_iter().fold(SweepReport::default(), |mut total, report| {
            total.merge(report);
            total
        })
    }

    pub async fn close(&self) {
        join_all(self.shards().iter().map(|shard| shard.close())).await;
    }
}
