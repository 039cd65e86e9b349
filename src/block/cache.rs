//! O(1) LRU cache for blocks.
//!
//! Design:
//! - HashMap<block, Entry> stores block content and doubly-linked
//!   pointers (prev/next by block number).
//! - head = MRU, tail = LRU.
//! - get() moves the entry to head and copies bytes into `out`.
//! - put() updates existing (move to head) or inserts a new head,
//!   evicting the tail when over capacity.
//! - invalidate() drops a single entry (called on every write).
//!
//! Capacity 0 disables the cache (every call is a no-op).

use std::collections::HashMap;

pub(crate) struct BlockCache {
    cap: usize,
    block_size: usize,
    map: HashMap<u64, Entry>,
    head: Option<u64>, // Most-recently used
    tail: Option<u64>, // Least-recently used
}

struct Entry {
    data: Vec<u8>,
    prev: Option<u64>,
    next: Option<u64>,
}

impl BlockCache {
    pub(crate) fn new(cap: usize, block_size: usize) -> Self {
        Self {
            cap,
            block_size,
            map: HashMap::with_capacity(cap.max(1)),
            head: None,
            tail: None,
        }
    }

    /// Copy a cached block into `out` if present; promotes the entry to MRU.
    pub(crate) fn get(&mut self, block: u64, out: &mut [u8]) -> bool {
        if self.cap == 0 || out.len() != self.block_size {
            return false;
        }
        if !self.map.contains_key(&block) {
            return false;
        }

        self.detach(block);
        self.attach_front(block);
        if let Some(e) = self.map.get(&block) {
            if e.data.len() == out.len() {
                out.copy_from_slice(&e.data);
                return true;
            }
        }
        false
    }

    /// Insert or refresh a block (copy), promoting it to MRU.
    pub(crate) fn put(&mut self, block: u64, data: &[u8]) {
        if self.cap == 0 || data.len() != self.block_size {
            return;
        }

        if self.map.contains_key(&block) {
            if let Some(e) = self.map.get_mut(&block) {
                if e.data.len() == data.len() {
                    e.data.copy_from_slice(data);
                } else {
                    e.data = data.to_vec();
                }
            }
            self.detach(block);
            self.attach_front(block);
            return;
        }

        if self.map.len() >= self.cap {
            if let Some(victim) = self.tail {
                self.detach(victim);
                self.map.remove(&victim);
            }
        }

        let entry = Entry {
            data: data.to_vec(),
            prev: None,
            next: None,
        };
        self.map.insert(block, entry);
        self.attach_front(block);
    }

    /// Drop a single entry (stale after an overwrite).
    pub(crate) fn invalidate(&mut self, block: u64) {
        if self.map.contains_key(&block) {
            self.detach(block);
            self.map.remove(&block);
        }
    }

    // ---------------- internal helpers ----------------

    fn detach(&mut self, block: u64) {
        let (prev, next) = match self.map.get(&block) {
            Some(e) => (e.prev, e.next),
            None => return,
        };

        if self.head == Some(block) {
            self.head = next;
        }
        if self.tail == Some(block) {
            self.tail = prev;
        }

        if let Some(p) = prev {
            if let Some(pe) = self.map.get_mut(&p) {
                pe.next = next;
            }
        }
        if let Some(n) = next {
            if let Some(ne) = self.map.get_mut(&n) {
                ne.prev = prev;
            }
        }

        if let Some(e) = self.map.get_mut(&block) {
            e.prev = None;
            e.next = None;
        }
    }

    fn attach_front(&mut self, block: u64) {
        if self.head == Some(block) {
            return;
        }

        if let Some(e) = self.map.get_mut(&block) {
            e.prev = None;
            e.next = self.head;
        }

        if let Some(old_head) = self.head {
            if let Some(he) = self.map.get_mut(&old_head) {
                he.prev = Some(block);
            }
        }

        self.head = Some(block);

        if self.tail.is_none() {
            self.tail = Some(block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_is_lru() {
        let mut c = BlockCache::new(2, 8);
        c.put(1, &[1u8; 8]);
        c.put(2, &[2u8; 8]);

        // touch 1 so 2 becomes LRU
        let mut out = [0u8; 8];
        assert!(c.get(1, &mut out));
        c.put(3, &[3u8; 8]);

        assert!(!c.get(2, &mut out));
        assert!(c.get(1, &mut out));
        assert_eq!(out, [1u8; 8]);
        assert!(c.get(3, &mut out));
    }

    #[test]
    fn invalidate_drops_entry() {
        let mut c = BlockCache::new(4, 8);
        c.put(5, &[5u8; 8]);
        c.invalidate(5);
        let mut out = [0u8; 8];
        assert!(!c.get(5, &mut out));
    }

    #[test]
    fn zero_capacity_disables() {
        let mut c = BlockCache::new(0, 8);
        c.put(1, &[1u8; 8]);
        let mut out = [0u8; 8];
        assert!(!c.get(1, &mut out));
    }
}
