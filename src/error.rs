//! Failure taxonomy for the engine.
//!
//! Every fallible path still returns anyhow::Result for context chaining,
//! but the root cause is always one of these variants so callers (the
//! damage-tolerant visitor, check tooling) can classify without string
//! matching. Use `StoreError::classify` on an anyhow error to recover the
//! kind.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Medium read/write failure.
    #[error("io error on block {block}: {source}")]
    Io {
        block: u64,
        #[source]
        source: std::io::Error,
    },

    /// Block content fails whole-block checksum validation.
    #[error("checksum mismatch on block {block} (stored={stored:#010x}, calc={calc:#010x})")]
    Checksum { block: u64, stored: u32, calc: u32 },

    /// Block parses but violates structural invariants.
    #[error("structural error on block {block}: {reason}")]
    Structural { block: u64, reason: String },

    /// Space map exhausted or refcount underflow. Always fatal to the
    /// enclosing transaction.
    #[error("allocation error: {0}")]
    Allocation(String),
}

impl StoreError {
    pub fn structural(block: u64, reason: impl Into<String>) -> Self {
        StoreError::Structural {
            block,
            reason: reason.into(),
        }
    }

    /// Short classification tag for reports ("io", "checksum", "structural",
    /// "allocation", or "other" for foreign errors).
    pub fn classify(err: &anyhow::Error) -> &'static str {
        match err.downcast_ref::<StoreError>() {
            Some(StoreError::Io { .. }) => "io",
            Some(StoreError::Checksum { .. }) => "checksum",
            Some(StoreError::Structural { .. }) => "structural",
            Some(StoreError::Allocation(_)) => "allocation",
            None => "other",
        }
    }
}
