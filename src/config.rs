//! Centralized configuration and builder for a ShadowTree store.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - StoreConfig::from_env() reads ST_* variables; StoreBuilder produces
//!   a StoreConfig that BlockStore::create/open consume.

use std::fmt;

/// Top-level configuration for a store handle (writer/reader).
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Whether to fsync data segments on every block write. When false,
    /// durability is deferred to the coalesced fsync in flush()/commit().
    /// Env: ST_DATA_FSYNC (default false; "1|true|on|yes" => true)
    pub data_fsync: bool,

    /// Block cache size in blocks (0 disables).
    /// Env: ST_BLOCK_CACHE_BLOCKS (default 1024)
    pub cache_blocks: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_fsync: false,
            cache_blocks: 1024,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("ST_DATA_FSYNC") {
            let s = v.trim().to_ascii_lowercase();
            cfg.data_fsync = s == "1" || s == "true" || s == "on" || s == "yes";
        }

        if let Ok(v) = std::env::var("ST_BLOCK_CACHE_BLOCKS") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.cache_blocks = n;
            }
        }

        cfg
    }

    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }
}

impl fmt::Display for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StoreConfig {{ data_fsync: {}, cache_blocks: {} }}",
            self.data_fsync, self.cache_blocks
        )
    }
}

/// Builder over StoreConfig. Unset fields keep defaults.
#[derive(Default, Clone, Debug)]
pub struct StoreBuilder {
    data_fsync: Option<bool>,
    cache_blocks: Option<usize>,
}

impl StoreBuilder {
    pub fn data_fsync(mut self, on: bool) -> Self {
        self.data_fsync = Some(on);
        self
    }

    pub fn cache_blocks(mut self, blocks: usize) -> Self {
        self.cache_blocks = Some(blocks);
        self
    }

    pub fn build(self) -> StoreConfig {
        let mut cfg = StoreConfig::default();
        if let Some(v) = self.data_fsync {
            cfg.data_fsync = v;
        }
        if let Some(v) = self.cache_blocks {
            cfg.cache_blocks = v;
        }
        cfg
    }
}
