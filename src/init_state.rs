//! The external init-state-file collaborator (spec.md §4.5.1 "init from files").
//!
//! On a completely fresh deployment the synchronizer seeds its trees and accounts table from a
//! bundled snapshot rather than replaying the chain from genesis. This trait is the seam between
//! that snapshot (however it is packaged — a flat file, an embedded asset, ...) and the
//! synchronizer, the same way the teacher keeps its genesis/rollup-data-file reading behind a
//! narrow trait rather than inlining file I/O into startup.

use async_trait::async_trait;

use crate::{
    relational_store::AccountDao,
    tree_store::TreeStore,
    types::{
        Hash,
        TreeTag,
        ZERO_HASH,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum InitStateError {
    #[error("init state file is missing or unreadable: {0}")]
    MissingFile(String),
    #[error("init state file is malformed: {0}")]
    Malformed(String),
}

/// The four tree roots a snapshot commits to; used to sanity-check that the trees populated from
/// account data actually match what the snapshot claims (spec.md §4.5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitRoots {
    pub data_root: Hash,
    pub null_root: Hash,
    pub root_root: Hash,
    pub defi_root: Hash,
}

impl InitRoots {
    #[must_use]
    pub fn get(&self, tag: TreeTag) -> Hash {
        match tag {
            TreeTag::Data => self.data_root,
            TreeTag::Null => self.null_root,
            TreeTag::Root => self.root_root,
            TreeTag::Defi => self.defi_root,
        }
    }
}

/// The contract the synchronizer requires of a startup snapshot (spec.md §4.5.1). Whether a
/// deployment has one at all is itself a fact the reader exposes (`get_account_data_file`) so the
/// synchronizer can distinguish "fresh chain, nothing to seed" from "fresh chain, seed from this
/// snapshot".
#[async_trait]
pub trait InitStateReader: Send + Sync {
    /// Identifies the snapshot this reader is backed by, if any. `None` means there is nothing
    /// to seed from and the synchronizer should start from an entirely empty state.
    fn get_account_data_file(&self) -> Option<&str>;

    async fn read_account_tree_data(&self) -> Result<Vec<AccountDao>, InitStateError>;

    async fn get_init_roots(&self) -> Result<InitRoots, InitStateError>;

    /// Stages the DATA and ROOT tree leaves implied by the account snapshot into `tree_store`,
    /// without committing (spec.md §4.5.1 step 2; the synchronizer commits once both trees and
    /// the nullifier tree below are populated).
    async fn populate_data_and_roots_trees(
        &self,
        tree_store: &dyn TreeStore,
    ) -> Result<(), InitStateError>;

    /// Stages the NULL tree leaves implied by the account snapshot (spec.md §4.5.1 step 3).
    async fn populate_nullifier_tree(&self, tree_store: &dyn TreeStore) -> Result<(), InitStateError>;
}

/// The "nothing to seed" reader: used when a deployment starts from an empty chain with no
/// bundled snapshot.
#[derive(Debug, Default)]
pub struct EmptyInitState;

#[async_trait]
impl InitStateReader for EmptyInitState {
    fn get_account_data_file(&self) -> Option<&str> {
        None
    }

    async fn read_account_tree_data(&self) -> Result<Vec<AccountDao>, InitStateError> {
        Ok(Vec::new())
    }

    async fn get_init_roots(&self) -> Result<InitRoots, InitStateError> {
        Ok(InitRoots {
            data_root: ZERO_HASH,
            null_root: ZERO_HASH,
            root_root: ZERO_HASH,
            defi_root: ZERO_HASH,
        })
    }

    async fn populate_data_and_roots_trees(
        &self,
        _tree_store: &dyn TreeStore,
    ) -> Result<(), InitStateError> {
        Ok(())
    }

    async fn populate_nullifier_tree(&self, _tree_store: &dyn TreeStore) -> Result<(), InitStateError> {
        Ok(())
    }
}

/// An in-memory fixture snapshot, for tests exercising the init-from-files path without a real
/// file on disk.
#[derive(Debug, Clone)]
pub struct FixtureInitState {
    label: String,
    accounts: Vec<AccountDao>,
    data_leaves: Vec<(u64, Vec<u8>)>,
    null_leaves: Vec<(u64, Vec<u8>)>,
    roots: InitRoots,
}

impl FixtureInitState {
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        accounts: Vec<AccountDao>,
        data_leaves: Vec<(u64, Vec<u8>)>,
        null_leaves: Vec<(u64, Vec<u8>)>,
        roots: InitRoots,
    ) -> Self {
        Self {
            label: label.into(),
            accounts,
            data_leaves,
            null_leaves,
            roots,
        }
    }
}

#[async_trait]
impl InitStateReader for FixtureInitState {
    fn get_account_data_file(&self) -> Option<&str> {
        Some(&self.label)
    }

    async fn read_account_tree_data(&self) -> Result<Vec<AccountDao>, InitStateError> {
        Ok(self.accounts.clone())
    }

    async fn get_init_roots(&self) -> Result<InitRoots, InitStateError> {
        Ok(self.roots)
    }

    async fn populate_data_and_roots_trees(
        &self,
        tree_store: &dyn TreeStore,
    ) -> Result<(), InitStateError> {
        for (index, leaf) in &self.data_leaves {
            tree_store
                .put(TreeTag::Data, *index, leaf)
                .map_err(|e| InitStateError::Malformed(e.to_string()))?;
        }
        Ok(())
    }

    async fn populate_nullifier_tree(&self, tree_store: &dyn TreeStore) -> Result<(), InitStateError> {
        for (index, leaf) in &self.null_leaves {
            tree_store
                .put(TreeTag::Null, *index, leaf)
                .map_err(|e| InitStateError::Malformed(e.to_string()))?;
        }
        Ok(())
    }
}
