//! Four independent append-only authenticated trees (spec.md §4.1).
//!
//! The hashing scheme (`SHA256(0x00 | leaf)` for leaves, `SHA256(0x01 | left | right)` for
//! internal nodes) is lifted from the teacher workspace's `astria-merkle` crate, which documents
//! the identical RFC 6962-style domain separation. That crate has no notion of staged-vs-
//! committed writes; the layering here is new structure this spec requires (spec.md §4.1, §9
//! "staged tree writes"). The NULL tree is additionally sparse (indices come from nullifiers, not
//! a dense counter), so root computation walks only the written leaves' paths rather than
//! materializing every leaf in range — see [`Layer::root`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use sha2::{
    Digest as _,
    Sha256,
};
use tracing::debug;

use crate::types::{
    Hash,
    TreeTag,
    ZERO_HASH,
};

/// `SHA256(0x00 | leaf)`, mirroring `astria_merkle::hash_leaf`.
#[must_use]
fn hash_leaf(leaf: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([0x00_u8]);
    hasher.update(leaf);
    hasher.finalize().into()
}

/// `SHA256(0x01 | left | right)`, mirroring `astria_merkle::combine`.
#[must_use]
fn combine(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([0x01_u8]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

#[derive(Debug, thiserror::Error)]
pub enum TreeStoreError {
    #[error("tree store writer is not started")]
    NotStarted,
    #[error("failed to persist staged writes durably")]
    CommitFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// The contract the synchronizer requires of a tree store (spec.md §4.1). Modeled as a trait so
/// the backing persistence (flat file, rocksdb, ...) is swappable, per spec.md §9's dynamic
/// dispatch design note.
#[async_trait]
pub trait TreeStore: Send + Sync {
    async fn start(&self) -> Result<(), TreeStoreError>;
    async fn stop(&self) -> Result<(), TreeStoreError>;

    fn get_size(&self, tag: TreeTag) -> u64;
    fn get_root(&self, tag: TreeTag) -> Hash;

    /// Stages a write at `index` in the tree identified by `tag`. The write is visible to
    /// subsequent reads on this writer but not durable until `commit`.
    fn put(&self, tag: TreeTag, index: u64, leaf_bytes: &[u8]) -> Result<(), TreeStoreError>;

    /// Durably persists all staged writes across all four trees atomically.
    async fn commit(&self) -> Result<(), TreeStoreError>;

    /// Discards all staged writes, reverting to the last committed state.
    fn rollback(&self);
}

/// One append-only, sparsely-indexed authenticated tree. Leaves not yet written hash to
/// `ZERO_HASH` and combine normally, so the tree has a well-defined root at any size.
#[derive(Debug, Default, Clone)]
struct Layer {
    leaves: BTreeMap<u64, Hash>,
    /// One past the highest index ever written; spec.md's tree "size".
    size: u64,
}

impl Layer {
    fn put(&mut self, index: u64, leaf_bytes: &[u8]) {
        self.leaves.insert(index, hash_leaf(leaf_bytes));
        self.size = self.size.max(index + 1);
    }

    /// Depth of the smallest power-of-two-width tree that covers `size` leaves.
    fn depth(size: u64) -> usize {
        let mut width = 1u64;
        let mut depth = 0usize;
        while width < size {
            width *= 2;
            depth += 1;
        }
        depth
    }

    /// Root over `[0, 2^depth(size))`, recomputed fresh each call (spec.md §9 explicitly permits,
    /// but does not require, a more efficient incremental/batched path).
    ///
    /// The tree is sparse: most leaves in that range were never written and default to
    /// `ZERO_HASH`. Rather than materializing a dense `2^depth`-wide array (infeasible once an
    /// index is derived from something like a 256-bit nullifier — `depth` alone can still be
    /// large, but the *leaf count* actually written never is), this combines only the nodes on a
    /// path from a written leaf to the root, defaulting untouched siblings from a
    /// precomputed per-level default hash. Cost is `O(leaves written * depth)`, independent of how
    /// sparse the index space is.
    fn root(&self) -> Hash {
        if self.size == 0 {
            return ZERO_HASH;
        }
        let depth = Self::depth(self.size);

        let mut default_at = Vec::with_capacity(depth + 1);
        default_at.push(ZERO_HASH);
        for level in 0..depth {
            let prev = default_at[level];
            default_at.push(combine(&prev, &prev));
        }

        let mut level: BTreeMap<u64, Hash> = self.leaves.clone();
        for default in default_at.iter().take(depth) {
            let parents: std::collections::BTreeSet<u64> =
                level.keys().map(|index| index >> 1).collect();
            let mut next = BTreeMap::new();
            for parent in parents {
                let left = level.get(&(parent * 2)).copied().unwrap_or(*default);
                let right = level.get(&(parent * 2 + 1)).copied().unwrap_or(*default);
                next.insert(parent, combine(&left, &right));
            }
            level = next;
        }
        level.get(&0).copied().unwrap_or(default_at[depth])
    }
}

/// Union of a committed base layer and the current writer's staged overlay. Reads see staged
/// writes on top of committed ones; `commit` flattens the overlay into the base, `rollback`
/// discards it.
#[derive(Debug, Default)]
struct TreeState {
    committed: Layer,
    staged: Layer,
}

impl TreeState {
    fn effective_size(&self) -> u64 {
        self.committed.size.max(self.staged.size)
    }

    fn effective_root(&self) -> Hash {
        if self.staged.size == 0 {
            self.committed.root()
        } else {
            let mut merged = self.committed.clone();
            for (index, leaf) in &self.staged.leaves {
                merged.leaves.insert(*index, *leaf);
            }
            merged.size = merged.size.max(self.staged.size);
            merged.root()
        }
    }

    fn put(&mut self, index: u64, leaf_bytes: &[u8]) {
        self.staged.put(index, leaf_bytes);
    }

    fn commit(&mut self) {
        for (index, leaf) in std::mem::take(&mut self.staged.leaves) {
            self.committed.leaves.insert(index, leaf);
        }
        self.committed.size = self.committed.size.max(self.staged.size);
        self.staged = Layer::default();
    }

    fn rollback(&mut self) {
        self.staged = Layer::default();
    }
}

/// In-memory reference implementation of [`TreeStore`]. A crash-recoverable, durable
/// implementation would journal `commit()`'s batch of writes before applying them; this
/// implementation satisfies the trait's contract (single-writer serialization, staged/committed
/// layering) without prescribing a storage engine, per spec.md's non-goals.
#[derive(Debug, Default)]
pub struct InMemoryTreeStore {
    trees: std::sync::Mutex<std::collections::HashMap<TreeTag, TreeState>>,
    started: std::sync::atomic::AtomicBool,
}

impl InMemoryTreeStore {
    #[must_use]
    pub fn new() -> Self {
        let mut trees = std::collections::HashMap::new();
        for tag in TreeTag::ALL {
            trees.insert(tag, TreeState::default());
        }
        Self {
            trees: std::sync::Mutex::new(trees),
            started: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl TreeStore for InMemoryTreeStore {
    async fn start(&self) -> Result<(), TreeStoreError> {
        self.started
            .store(true, std::sync::atomic::Ordering::SeqCst);
        debug!("tree store started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), TreeStoreError> {
        self.started
            .store(false, std::sync::atomic::Ordering::SeqCst);
        debug!("tree store stopped");
        Ok(())
    }

    fn get_size(&self, tag: TreeTag) -> u64 {
        self.trees.lock().unwrap()[&tag].effective_size()
    }

    fn get_root(&self, tag: TreeTag) -> Hash {
        self.trees.lock().unwrap()[&tag].effective_root()
    }

    fn put(&self, tag: TreeTag, index: u64, leaf_bytes: &[u8]) -> Result<(), TreeStoreError> {
        if !self.started.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(TreeStoreError::NotStarted);
        }
        self.trees
            .lock()
            .unwrap()
            .get_mut(&tag)
            .expect("all four tags are always present")
            .put(index, leaf_bytes);
        Ok(())
    }

    async fn commit(&self) -> Result<(), TreeStoreError> {
        let mut trees = self.trees.lock().unwrap();
        for tag in TreeTag::ALL {
            trees.get_mut(&tag).unwrap().commit();
        }
        debug!("tree store committed staged writes across all four trees");
        Ok(())
    }

    fn rollback(&self) {
        let mut trees = self.trees.lock().unwrap();
        for tag in TreeTag::ALL {
            trees.get_mut(&tag).unwrap().rollback();
        }
        debug!("tree store rolled back staged writes across all four trees");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryTreeStore {
        let s = InMemoryTreeStore::new();
        tokio_test::block_on(s.start()).unwrap();
        s
    }

    #[test]
    fn empty_tree_has_zero_root_and_size() {
        let s = store();
        assert_eq!(s.get_size(TreeTag::Data), 0);
        assert_eq!(s.get_root(TreeTag::Data), ZERO_HASH);
    }

    #[test]
    fn staged_writes_are_visible_before_commit() {
        let s = store();
        s.put(TreeTag::Data, 0, b"leaf-a").unwrap();
        assert_eq!(s.get_size(TreeTag::Data), 1);
        assert_ne!(s.get_root(TreeTag::Data), ZERO_HASH);
    }

    #[test]
    fn rollback_discards_staged_writes() {
        let s = store();
        s.put(TreeTag::Data, 0, b"leaf-a").unwrap();
        s.rollback();
        assert_eq!(s.get_size(TreeTag::Data), 0);
        assert_eq!(s.get_root(TreeTag::Data), ZERO_HASH);
    }

    #[test]
    fn commit_persists_and_survives_subsequent_rollback() {
        let s = store();
        s.put(TreeTag::Data, 0, b"leaf-a").unwrap();
        tokio_test::block_on(s.commit()).unwrap();
        let root_after_commit = s.get_root(TreeTag::Data);

        s.put(TreeTag::Data, 1, b"leaf-b").unwrap();
        s.rollback();
        assert_eq!(s.get_root(TreeTag::Data), root_after_commit);
        assert_eq!(s.get_size(TreeTag::Data), 1);
    }

    #[test]
    fn trees_are_independent() {
        let s = store();
        s.put(TreeTag::Data, 0, b"leaf-a").unwrap();
        assert_eq!(s.get_size(TreeTag::Null), 0);
        assert_eq!(s.get_root(TreeTag::Null), ZERO_HASH);
    }

    #[test]
    fn replaying_the_same_put_is_idempotent() {
        let s = store();
        s.put(TreeTag::Data, 0, b"leaf-a").unwrap();
        tokio_test::block_on(s.commit()).unwrap();
        let root1 = s.get_root(TreeTag::Data);
        s.put(TreeTag::Data, 0, b"leaf-a").unwrap();
        tokio_test::block_on(s.commit()).unwrap();
        assert_eq!(s.get_root(TreeTag::Data), root1);
    }
}
