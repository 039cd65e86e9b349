//! Block store: fixed-size block I/O over 32 MiB segment files.
//!
//! - read_block: read + whole-block checksum verification, with an LRU
//!   cache in front. A mismatch is StoreError::Checksum, a medium failure
//!   is StoreError::Io; content is never returned unverified.
//! - write_block: stamp checksum + write; fsync per write only when
//!   data_fsync is set, otherwise deferred to flush().
//! - write_raw: raw image write without checksum stamping (restore
//!   tooling and corruption harnesses).
//! - flush: fsync every segment touched since the last flush (coalesced).
//!
//! No retries at this layer; retry policy belongs to callers.

pub(crate) mod cache;
pub mod checksum;

use anyhow::{anyhow, Context, Result};
use log::debug;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::StoreConfig;
use crate::consts::{DATA_SEG_EXT, DATA_SEG_PREFIX, SEGMENT_SIZE};
use crate::error::StoreError;
use crate::metrics::{
    record_block_read, record_block_write, record_cache_hit, record_cache_miss,
    record_checksum_failure,
};

use self::cache::BlockCache;
use self::checksum::{block_update_checksum, block_verify_checksum};

/// Low-level block manager over a store root directory.
pub struct BlockStore {
    pub root: PathBuf,
    pub block_size: u32,
    pub nr_blocks: u64,
    data_fsync: bool,
    // Cache sits behind RefCell so read_block stays &self; the store is
    // single-threaded by contract (readers open their own handles).
    cache: RefCell<BlockCache>,
    dirty_segs: BTreeSet<u64>,
}

impl BlockStore {
    /// Open a block store under `root`. Segment files are created lazily.
    pub fn open(root: &Path, block_size: u32, nr_blocks: u64, cfg: &StoreConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            block_size,
            nr_blocks,
            data_fsync: cfg.data_fsync,
            cache: RefCell::new(BlockCache::new(cfg.cache_blocks, block_size as usize)),
            dirty_segs: BTreeSet::new(),
        }
    }

    pub fn set_data_fsync(&mut self, on: bool) {
        self.data_fsync = on;
    }
    pub fn data_fsync(&self) -> bool {
        self.data_fsync
    }

    // ---------------- segment mapping ----------------

    /// Blocks per segment at the configured block size.
    pub(crate) fn blocks_per_seg(&self) -> u64 {
        let bs = self.block_size as u64;
        (SEGMENT_SIZE / bs).max(1)
    }

    /// Map a block number to (segment number, offset within the segment).
    pub(crate) fn locate(&self, block: u64) -> (u64, u64) {
        let bps = self.blocks_per_seg();
        let seg_no = (block / bps) + 1;
        let off_in_seg = (block % bps) * (self.block_size as u64);
        (seg_no, off_in_seg)
    }

    /// Path of a segment file by number.
    pub(crate) fn seg_path(&self, seg_no: u64) -> PathBuf {
        self.root
            .join(format!("{}{:06}.{}", DATA_SEG_PREFIX, seg_no, DATA_SEG_EXT))
    }

    /// Open a segment read/write (create=true creates a missing file).
    pub(crate) fn open_seg_rw(&self, seg_no: u64, create: bool) -> Result<std::fs::File> {
        let path = self.seg_path(seg_no);
        let mut opts = OpenOptions::new();
        opts.read(true).write(true);
        if create {
            opts.create(true);
        }
        opts.open(&path)
            .with_context(|| format!("open segment {}", path.display()))
    }

    fn check_bounds(&self, block: u64) -> Result<()> {
        if block >= self.nr_blocks {
            return Err(anyhow!(
                "block {} out of range (nr_blocks={})",
                block,
                self.nr_blocks
            ));
        }
        Ok(())
    }

    /// Grow the backing segment so `block` is physically addressable.
    pub fn ensure_allocated(&mut self, block: u64) -> Result<()> {
        self.check_bounds(block)?;
        let (seg_no, off) = self.locate(block);
        let f = self.open_seg_rw(seg_no, true)?;
        let need_len = off + (self.block_size as u64);
        let cur_len = f.metadata()?.len();
        if cur_len < need_len {
            f.set_len(need_len)?;
            self.dirty_segs.insert(seg_no);
        }
        Ok(())
    }

    // ---------------- block I/O ----------------

    /// Read one block, verifying its checksum. Cache-aware.
    pub fn read_block(&self, block: u64) -> Result<Vec<u8>> {
        self.check_bounds(block)?;
        let bs = self.block_size as usize;
        let mut buf = vec![0u8; bs];

        if self.cache.borrow_mut().get(block, &mut buf) {
            record_cache_hit();
            return Ok(buf);
        }

        let (seg_no, off) = self.locate(block);
        let mut f = self
            .open_seg_rw(seg_no, false)
            .map_err(|e| match e.downcast::<std::io::Error>() {
                Ok(io) => anyhow::Error::from(StoreError::Io { block, source: io }),
                Err(other) => other,
            })?;
        f.seek(SeekFrom::Start(off))
            .map_err(|e| StoreError::Io { block, source: e })?;
        f.read_exact(&mut buf)
            .map_err(|e| StoreError::Io { block, source: e })?;

        if let Err(e) = block_verify_checksum(&buf, block) {
            record_checksum_failure();
            return Err(e);
        }

        self.cache.borrow_mut().put(block, &buf);
        record_cache_miss();
        record_block_read();
        Ok(buf)
    }

    /// Stamp the checksum and write one block.
    /// fsync happens per write only when data_fsync is set; otherwise the
    /// segment is remembered and synced by the next flush().
    pub fn write_block(&mut self, block: u64, buf: &mut [u8]) -> Result<()> {
        block_update_checksum(buf)?;
        self.write_raw(block, buf)
    }

    /// Raw image write: no checksum stamping. Used by restore tooling
    /// (the image already carries its checksum) and by corruption
    /// harnesses in tests.
    pub fn write_raw(&mut self, block: u64, buf: &[u8]) -> Result<()> {
        let bs = self.block_size as usize;
        if buf.len() != bs {
            return Err(anyhow!(
                "buffer size {} != block_size {}",
                buf.len(),
                self.block_size
            ));
        }
        self.ensure_allocated(block)?;

        let (seg_no, off) = self.locate(block);
        let mut f = self.open_seg_rw(seg_no, false)?;
        f.seek(SeekFrom::Start(off))
            .map_err(|e| StoreError::Io { block, source: e })?;
        f.write_all(buf)
            .map_err(|e| StoreError::Io { block, source: e })?;
        if self.data_fsync {
            let _ = f.sync_all();
        } else {
            self.dirty_segs.insert(seg_no);
        }

        self.cache.borrow_mut().invalidate(block);
        record_block_write();
        Ok(())
    }

    /// fsync every segment touched since the last flush (coalesced).
    pub fn flush(&mut self) -> Result<()> {
        let segs: Vec<u64> = self.dirty_segs.iter().copied().collect();
        for seg_no in segs {
            let f = self.open_seg_rw(seg_no, false)?;
            f.sync_all()
                .with_context(|| format!("fsync segment {}", self.seg_path(seg_no).display()))?;
        }
        debug!("block store flush: {} segment(s) synced", self.dirty_segs.len());
        self.dirty_segs.clear();
        Ok(())
    }
}
