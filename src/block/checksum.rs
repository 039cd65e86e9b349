//! block/checksum — whole-block CRC32C embedded in the node header.
//!
//! Layout: block[0..4] stores CRC32C (Castagnoli, LE) computed over
//! block[4..]. The field is stamped on write and verified on read; a
//! mismatch surfaces as StoreError::Checksum, never as garbage content.
//!
//! A freshly allocated (all-zero) block does not verify: the stored field
//! is zero while the computed value is not, so reading a never-written
//! block fails the same way a corrupted one does.

use anyhow::Result;
use byteorder::{ByteOrder, LittleEndian};

use crate::consts::NODE_HDR_SIZE;
use crate::error::StoreError;

#[inline]
fn compute_crc32c(bytes: &[u8]) -> u32 {
    crc32c::crc32c(bytes)
}

/// Stamp the checksum field of a block in place.
pub fn block_update_checksum(block: &mut [u8]) -> Result<()> {
    if block.len() < NODE_HDR_SIZE {
        return Err(StoreError::structural(0, "block too small for checksum").into());
    }
    let crc = compute_crc32c(&block[4..]);
    LittleEndian::write_u32(&mut block[0..4], crc);
    Ok(())
}

/// Verify the checksum field of a block. Returns StoreError::Checksum on
/// mismatch so callers can classify without string matching.
pub fn block_verify_checksum(block: &[u8], blocknr: u64) -> Result<()> {
    if block.len() < NODE_HDR_SIZE {
        return Err(StoreError::structural(blocknr, "block too small for checksum").into());
    }
    let stored = LittleEndian::read_u32(&block[0..4]);
    let calc = compute_crc32c(&block[4..]);
    if stored != calc {
        return Err(StoreError::Checksum {
            block: blocknr,
            stored,
            calc,
        }
        .into());
    }
    Ok(())
}
