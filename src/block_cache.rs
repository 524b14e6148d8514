//! An in-memory ordered list of serialized settled blocks for client catch-up (spec.md §4.6).
//!
//! Unlike the teacher's `block_cache.rs` (which buffers out-of-order blocks awaiting a
//! contiguous prefix before execution), this cache is purely append-only: the synchronizer is
//! the sole, serialized writer and only ever appends the block it just settled, so there is
//! nothing to reorder. The "reject a gap ahead of the next expected position" idiom is kept
//! from the teacher's cache since it is still the right guard against a caller skipping ahead;
//! a position that is already present, on the other hand, is a no-op success (spec.md §8
//! testable property 3, "idempotent replay ... leaves tree sizes, roots, and relational contents
//! unchanged" applies here too — a replayed block must not turn the whole `update_dbs` pass into
//! an error).

use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum BlockCacheError {
    #[error("block at position {position} leaves a gap (cache holds {len} blocks)")]
    OutOfOrder { position: u64, len: u64 },
}

/// Ordered list indexed by position (`= rollupId`), append-only during normal operation,
/// rebuilt at startup from `get_settled_rollups(0)` (spec.md §4.5 step 5).
#[derive(Debug, Default)]
pub struct BlockCache {
    blocks: RwLock<Vec<bytes::Bytes>>,
}

impl BlockCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the next settled block. A `position` already present in the cache is treated as
    /// an already-applied replay and is a no-op success; a `position` beyond the cache's current
    /// length leaves a gap and is rejected.
    pub async fn append(&self, position: u64, block: bytes::Bytes) -> Result<(), BlockCacheError> {
        let mut blocks = self.blocks.write().await;
        let len = blocks.len() as u64;
        if position < len {
            return Ok(());
        }
        if position > len {
            return Err(BlockCacheError::OutOfOrder {
                position,
                len,
            });
        }
        blocks.push(block);
        Ok(())
    }

    /// Rebuilds the cache wholesale at startup (spec.md §4.5 step 5). Replaces any existing
    /// content.
    pub async fn rebuild(&self, blocks: Vec<bytes::Bytes>) {
        *self.blocks.write().await = blocks;
    }

    /// Returns the suffix `[n..)` (spec.md §4.6 `get_from`).
    pub async fn get_from(&self, n: u64) -> Vec<bytes::Bytes> {
        let blocks = self.blocks.read().await;
        let n = n.min(blocks.len() as u64) as usize;
        blocks[n..].to_vec()
    }

    pub async fn len(&self) -> u64 {
        self.blocks.read().await.len() as u64
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_empty() {
        let cache = BlockCache::new();
        assert!(cache.is_empty().await);
        assert!(cache.get_from(0).await.is_empty());
    }

    #[tokio::test]
    async fn appends_are_prefix_consistent() {
        let cache = BlockCache::new();
        cache.append(0, bytes::Bytes::from_static(b"a")).await.unwrap();
        cache.append(1, bytes::Bytes::from_static(b"b")).await.unwrap();
        assert_eq!(cache.get_from(0).await.len(), 2);
        assert_eq!(cache.get_from(1).await, vec![bytes::Bytes::from_static(b"b")]);
        assert!(cache.get_from(10).await.is_empty());
    }

    #[tokio::test]
    async fn a_gap_ahead_of_the_next_position_is_rejected() {
        let cache = BlockCache::new();
        cache.append(0, bytes::Bytes::from_static(b"a")).await.unwrap();
        assert!(cache.append(5, bytes::Bytes::from_static(b"gap")).await.is_err());
    }

    #[tokio::test]
    async fn reappending_an_already_present_position_is_a_no_op() {
        let cache = BlockCache::new();
        cache.append(0, bytes::Bytes::from_static(b"a")).await.unwrap();
        cache.append(0, bytes::Bytes::from_static(b"dup")).await.unwrap();
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get_from(0).await, vec![bytes::Bytes::from_static(b"a")]);
    }

    #[tokio::test]
    async fn rebuild_replaces_contents() {
        let cache = BlockCache::new();
        cache.append(0, bytes::Bytes::from_static(b"a")).await.unwrap();
        cache
            .rebuild(vec![bytes::Bytes::from_static(b"x"), bytes::Bytes::from_static(b"y")])
            .await;
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get_from(0).await[0], bytes::Bytes::from_static(b"x"));
    }
}
