//! Lightweight global metrics for ShadowTree.
//!
//! Thread-safe atomic counters for the subsystems:
//! - Block store (reads/writes, cache, checksum failures)
//! - Transaction manager (shadowing, commits)
//! - B-tree (splits, merges)

use std::sync::atomic::{AtomicU64, Ordering};

// ----- Block store -----
static BLOCKS_READ: AtomicU64 = AtomicU64::new(0);
static BLOCKS_WRITTEN: AtomicU64 = AtomicU64::new(0);
static BLOCK_CACHE_HITS: AtomicU64 = AtomicU64::new(0);
static BLOCK_CACHE_MISSES: AtomicU64 = AtomicU64::new(0);
static CHECKSUM_FAILURES: AtomicU64 = AtomicU64::new(0);

// ----- Transaction manager -----
static SHADOW_IN_PLACE: AtomicU64 = AtomicU64::new(0);
static SHADOW_COPIED: AtomicU64 = AtomicU64::new(0);
static COMMITS: AtomicU64 = AtomicU64::new(0);

// ----- B-tree -----
static NODE_SPLITS: AtomicU64 = AtomicU64::new(0);
static NODE_MERGES: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub blocks_read: u64,
    pub blocks_written: u64,
    pub block_cache_hits: u64,
    pub block_cache_misses: u64,
    pub checksum_failures: u64,

    pub shadow_in_place: u64,
    pub shadow_copied: u64,
    pub commits: u64,

    pub node_splits: u64,
    pub node_merges: u64,
}

impl MetricsSnapshot {
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.block_cache_hits + self.block_cache_misses;
        if total == 0 {
            0.0
        } else {
            self.block_cache_hits as f64 / total as f64
        }
    }

    /// Fraction of shadow operations that had to copy (lower is cheaper).
    pub fn shadow_copy_ratio(&self) -> f64 {
        let total = self.shadow_in_place + self.shadow_copied;
        if total == 0 {
            0.0
        } else {
            self.shadow_copied as f64 / total as f64
        }
    }
}

// ----- Recorders (block store) -----
pub fn record_block_read() {
    BLOCKS_READ.fetch_add(1, Ordering::Relaxed);
}
pub fn record_block_write() {
    BLOCKS_WRITTEN.fetch_add(1, Ordering::Relaxed);
}
pub fn record_cache_hit() {
    BLOCK_CACHE_HITS.fetch_add(1, Ordering::Relaxed);
}
pub fn record_cache_miss() {
    BLOCK_CACHE_MISSES.fetch_add(1, Ordering::Relaxed);
}
pub fn record_checksum_failure() {
    CHECKSUM_FAILURES.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (transaction manager) -----
pub fn record_shadow_in_place() {
    SHADOW_IN_PLACE.fetch_add(1, Ordering::Relaxed);
}
pub fn record_shadow_copied() {
    SHADOW_COPIED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_commit() {
    COMMITS.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (b-tree) -----
pub fn record_node_split() {
    NODE_SPLITS.fetch_add(1, Ordering::Relaxed);
}
pub fn record_node_merge() {
    NODE_MERGES.fetch_add(1, Ordering::Relaxed);
}

// ----- Snapshot / Reset -----
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        blocks_read: BLOCKS_READ.load(Ordering::Relaxed),
        blocks_written: BLOCKS_WRITTEN.load(Ordering::Relaxed),
        block_cache_hits: BLOCK_CACHE_HITS.load(Ordering::Relaxed),
        block_cache_misses: BLOCK_CACHE_MISSES.load(Ordering::Relaxed),
        checksum_failures: CHECKSUM_FAILURES.load(Ordering::Relaxed),

        shadow_in_place: SHADOW_IN_PLACE.load(Ordering::Relaxed),
        shadow_copied: SHADOW_COPIED.load(Ordering::Relaxed),
        commits: COMMITS.load(Ordering::Relaxed),

        node_splits: NODE_SPLITS.load(Ordering::Relaxed),
        node_merges: NODE_MERGES.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    BLOCKS_READ.store(0, Ordering::Relaxed);
    BLOCKS_WRITTEN.store(0, Ordering::Relaxed);
    BLOCK_CACHE_HITS.store(0, Ordering::Relaxed);
    BLOCK_CACHE_MISSES.store(0, Ordering::Relaxed);
    CHECKSUM_FAILURES.store(0, Ordering::Relaxed);

    SHADOW_IN_PLACE.store(0, Ordering::Relaxed);
    SHADOW_COPIED.store(0, Ordering::Relaxed);
    COMMITS.store(0, Ordering::Relaxed);

    NODE_SPLITS.store(0, Ordering::Relaxed);
    NODE_MERGES.store(0, Ordering::Relaxed);
}
