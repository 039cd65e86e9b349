//! Transaction manager: shadowing and commit.
//!
//! Shadowing is the copy-on-write decision point. The manager keeps a
//! per-transaction shadow set (blocks allocated or already shadowed since
//! the last commit):
//!
//! - a block in the set is this transaction's private copy and is
//!   mutated in place;
//! - any other block is copied to a fresh block on first touch and the
//!   original's count dropped; when the original was shared (count > 1)
//!   every child the copy references is re-incremented so both owners
//!   keep a consistent view.
//!
//! Together with the space map's retain-until-flush rule this keeps the
//! previously published root byte-for-byte intact until commit.
//!
//! commit(new_root) is the only publication path: data segments are
//! fsynced, the space map is flushed, then the meta file is atomically
//! rewritten with the new root and a bumped transaction id. Until that
//! rename lands, the previously published root stays valid and readable.
//! Allocation failure anywhere before commit leaves the old root as the
//! published one.

use anyhow::{Context, Result};
use log::debug;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::block::BlockStore;
use crate::error::StoreError;
use crate::meta::{read_meta, write_meta_overwrite, MetaHeader};
use crate::metrics::{record_commit, record_shadow_copied, record_shadow_in_place};
use crate::sm::SpaceMap;

/// Result of a shadow operation. `data` is the block content to mutate;
/// the caller packs and writes it back to `block`.
#[derive(Debug)]
pub struct Shadow {
    /// Address the caller must write to (new when copied).
    pub block: u64,
    /// Address the content was read from (equals `block` unless copied).
    pub orig: u64,
    pub data: Vec<u8>,
    pub copied: bool,
}

/// Callback that re-increments whatever children a block's content
/// references. Invoked only when a shadow copies a shared block.
pub type IncChildren<'a> = dyn FnMut(&mut dyn SpaceMap, &[u8]) -> Result<()> + 'a;

pub struct TransactionManager {
    pub store: BlockStore,
    pub sm: Box<dyn SpaceMap>,
    root_dir: PathBuf,
    // Blocks created or shadowed since the last commit.
    shadows: HashSet<u64>,
}

impl TransactionManager {
    pub fn new(store: BlockStore, sm: Box<dyn SpaceMap>, root_dir: &Path) -> Self {
        Self {
            store,
            sm,
            root_dir: root_dir.to_path_buf(),
            shadows: HashSet::new(),
        }
    }

    /// Allocate a fresh block (count 1) and hand back a zeroed buffer.
    /// The block is immediately part of the transaction's shadow set.
    pub fn new_block(&mut self) -> Result<(u64, Vec<u8>)> {
        let block = self.sm.alloc()?;
        self.store.ensure_allocated(block)?;
        self.shadows.insert(block);
        Ok((block, vec![0u8; self.store.block_size as usize]))
    }

    /// Whether `block` is already this transaction's private copy.
    pub fn is_shadow(&self, block: u64) -> bool {
        self.shadows.contains(&block)
    }

    /// Shadow `block` for mutation.
    pub fn shadow(&mut self, block: u64, inc_children: &mut IncChildren<'_>) -> Result<Shadow> {
        let count = self.sm.get_count(block)?;
        if count == 0 {
            return Err(StoreError::structural(block, "shadow of unreferenced block").into());
        }

        let data = self.store.read_block(block)?;

        if self.shadows.contains(&block) {
            record_shadow_in_place();
            return Ok(Shadow {
                block,
                orig: block,
                data,
                copied: false,
            });
        }

        let new_block = self.sm.alloc()?;
        self.store.ensure_allocated(new_block)?;
        self.shadows.insert(new_block);
        self.sm.dec(block)?;
        if count > 1 {
            // The copy now references the original's children alongside
            // the remaining owner.
            inc_children(self.sm.as_mut(), &data)?;
        }
        debug!(
            "shadowed block {} -> {} (count was {})",
            block, new_block, count
        );
        record_shadow_copied();

        Ok(Shadow {
            block: new_block,
            orig: block,
            data,
            copied: true,
        })
    }

    /// Pass-through read (mutation-path reads propagate failures).
    pub fn read(&self, block: u64) -> Result<Vec<u8>> {
        self.store.read_block(block)
    }

    /// Write a packed node back. The store stamps the checksum.
    pub fn write(&mut self, block: u64, data: &mut [u8]) -> Result<()> {
        self.store.write_block(block, data)
    }

    /// Publish `new_root`: fsync data, flush the space map, then rewrite
    /// meta atomically. Returns the new transaction id.
    pub fn commit(&mut self, new_root: u64) -> Result<u64> {
        self.store.flush().context("flush block store")?;
        self.sm.flush().context("flush space map")?;

        let mut m: MetaHeader = read_meta(&self.root_dir)?;
        m.root = new_root;
        m.transaction_id += 1;
        write_meta_overwrite(&self.root_dir, &m).context("publish new root")?;

        self.shadows.clear();
        record_commit();
        debug!("committed root {} (transaction {})", new_root, m.transaction_id);
        Ok(m.transaction_id)
    }
}
