//! High-level store handle: ties the lock, meta, block store, space map
//! and transaction manager together.
//!
//! - Db::init formats a fresh store (meta + space map + one empty tree)
//!   and publishes the initial root.
//! - Db::open takes the exclusive lock for mutation; the store is marked
//!   unclean while a writer holds it and clean again on Drop.
//! - Db::open_ro takes the shared lock for concurrent read-only
//!   traversals over the published root.

use anyhow::{anyhow, Context, Result};
use log::warn;
use std::fs;
use std::path::{Path, PathBuf};

use crate::block::BlockStore;
use crate::btree::value::ValueTraits;
use crate::btree::{new_empty_leaf, BTree};
use crate::config::StoreConfig;
use crate::consts::NO_BLOCK;
use crate::lock::{acquire_exclusive_lock, acquire_shared_lock, LockGuard};
use crate::meta::{read_meta, set_clean_shutdown, write_meta_new, MetaHeader, META_VERSION};
use crate::sm::DiskSpaceMap;
use crate::tm::TransactionManager;

pub struct Db {
    pub root: PathBuf,
    pub tm: TransactionManager,
    pub meta: MetaHeader,
    readonly: bool,
    _lock: LockGuard,
}

impl Db {
    /// Format a fresh store under `root` and publish an empty tree.
    pub fn init(
        root: &Path,
        block_size: u32,
        nr_blocks: u64,
        levels: u32,
        value_size: u32,
    ) -> Result<()> {
        if levels == 0 {
            return Err(anyhow!("levels must be >= 1"));
        }
        if value_size == 0 {
            return Err(anyhow!("value_size must be > 0"));
        }
        fs::create_dir_all(root)
            .with_context(|| format!("create store root {}", root.display()))?;
        let _lock = acquire_exclusive_lock(root)?;

        let m = MetaHeader {
            version: META_VERSION,
            block_size,
            nr_blocks,
            root: NO_BLOCK,
            levels,
            value_size,
            transaction_id: 0,
            clean_shutdown: true,
        };
        write_meta_new(root, &m)?;

        let sm = DiskSpaceMap::create(root, nr_blocks)?;
        let cfg = StoreConfig::from_env();
        let store = BlockStore::open(root, block_size, nr_blocks, &cfg);
        let mut tm = TransactionManager::new(store, Box::new(sm), root);

        // The root leaf of a multi-level tree stores sub-roots (u64).
        let leaf_value_size = if levels == 1 { value_size as usize } else { 8 };
        let tree_root = new_empty_leaf(&mut tm, leaf_value_size)?;
        tm.commit(tree_root)?;
        Ok(())
    }

    /// Open for mutation (exclusive lock).
    pub fn open(root: &Path) -> Result<Self> {
        Self::open_with_config(root, &StoreConfig::from_env())
    }

    pub fn open_with_config(root: &Path, cfg: &StoreConfig) -> Result<Self> {
        let lock = acquire_exclusive_lock(root)?;
        let meta = read_meta(root)?;
        if !meta.clean_shutdown {
            warn!(
                "store {} was not shut down cleanly; run a check before trusting it",
                root.display()
            );
        }
        set_clean_shutdown(root, false)?;

        let sm = DiskSpaceMap::open(root)?;
        let store = BlockStore::open(root, meta.block_size, meta.nr_blocks, cfg);
        let tm = TransactionManager::new(store, Box::new(sm), root);

        Ok(Self {
            root: root.to_path_buf(),
            tm,
            meta,
            readonly: false,
            _lock: lock,
        })
    }

    /// Open read-only (shared lock). Suitable for concurrent traversals.
    pub fn open_ro(root: &Path) -> Result<Self> {
        let lock = acquire_shared_lock(root)?;
        let meta = read_meta(root)?;

        let cfg = StoreConfig::from_env();
        let sm = DiskSpaceMap::open(root)?;
        let store = BlockStore::open(root, meta.block_size, meta.nr_blocks, &cfg);
        let tm = TransactionManager::new(store, Box::new(sm), root);

        Ok(Self {
            root: root.to_path_buf(),
            tm,
            meta,
            readonly: true,
            _lock: lock,
        })
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn store(&self) -> &BlockStore {
        &self.tm.store
    }

    /// Handle onto the published tree. The codec's packed size must
    /// match the store's.
    pub fn tree<V: ValueTraits>(&self) -> Result<BTree<V>> {
        let m = read_meta(&self.root)?;
        if m.value_size as usize != V::PACKED_SIZE {
            return Err(anyhow!(
                "store holds {}-byte values, codec packs {}",
                m.value_size,
                V::PACKED_SIZE
            ));
        }
        BTree::open(m.root, m.levels as usize)
    }

    /// Publish a mutated tree's root.
    pub fn commit_tree<V: ValueTraits>(&mut self, tree: &BTree<V>) -> Result<u64> {
        if self.readonly {
            return Err(anyhow!("commit on a read-only handle"));
        }
        let id = self.tm.commit(tree.root())?;
        self.meta = read_meta(&self.root)?;
        Ok(id)
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if !self.readonly {
            let _ = set_clean_shutdown(&self.root, true);
        }
    }
}