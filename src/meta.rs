// src/meta.rs — store metadata (Meta v1)
//
// Format of <root>/meta (LE):
// MAGIC8 = "S1BTMETA"
// u32 version        = 1
// u32 block_size     (4 KiB..=1 MiB, power of two)
// u64 nr_blocks      (capacity of the space map)
// u64 root           (current published tree root, NO_BLOCK if none)
// u32 levels         (composite key arity, >= 1)
// u32 value_size     (packed value size of the tree at the final level)
// u64 transaction_id (bumped on every commit)
// u8  clean_shutdown (1=clean, 0=unclean)
//
// Policy:
// - Atomic rewrite: tmp+rename, then fsync of the parent directory
//   (best-effort on non-Unix).
// - The rename is the commit point: until it lands, readers see the
//   previous root.

use anyhow::{anyhow, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{self, OpenOptions};
#[cfg(unix)]
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::consts::{META_FILE, META_MAGIC, NO_BLOCK};

pub const META_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct MetaHeader {
    pub version: u32,
    pub block_size: u32,
    pub nr_blocks: u64,
    pub root: u64,
    pub levels: u32,
    pub value_size: u32,
    pub transaction_id: u64,
    pub clean_shutdown: bool,
}

impl Default for MetaHeader {
    fn default() -> Self {
        Self {
            version: META_VERSION,
            block_size: 4096,
            nr_blocks: 0,
            root: NO_BLOCK,
            levels: 1,
            value_size: 8,
            transaction_id: 0,
            clean_shutdown: true,
        }
    }
}

#[inline]
fn meta_path(root: &Path) -> PathBuf {
    root.join(META_FILE)
}

#[cfg(unix)]
fn fsync_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            let dir = File::open(parent)?;
            dir.sync_all()?;
        }
    }
    Ok(())
}
#[cfg(not(unix))]
fn fsync_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Block size must be a power of two in 4 KiB..=1 MiB.
pub fn validate_block_size(block_size: u32) -> Result<()> {
    const MAX: u32 = 1 << 20; // 1 MiB
    if block_size < 4096 || block_size > MAX || (block_size & (block_size - 1)) != 0 {
        return Err(anyhow!(
            "block_size must be a power of two in [4096 .. 1048576], got {}",
            block_size
        ));
    }
    Ok(())
}

/// Create a new meta file. Error if one already exists.
pub fn write_meta_new(root: &Path, h: &MetaHeader) -> Result<()> {
    validate_block_size(h.block_size)?;

    let path = meta_path(root);
    if path.exists() {
        return Err(anyhow!("meta already exists at {}", path.display()));
    }

    write_meta_tmp_rename(root, &path, h)
}

/// Rewrite meta via tmp+rename.
pub fn write_meta_overwrite(root: &Path, h: &MetaHeader) -> Result<()> {
    validate_block_size(h.block_size)?;
    let path = meta_path(root);
    write_meta_tmp_rename(root, &path, h)
}

fn write_meta_tmp_rename(root: &Path, path: &Path, h: &MetaHeader) -> Result<()> {
    let tmp = root.join(format!("{}.tmp", META_FILE));
    let _ = fs::remove_file(&tmp); // best-effort

    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)
        .with_context(|| format!("open meta tmp {}", tmp.display()))?;

    write_meta_contents(&mut f, h)?;
    f.sync_all()?; // tmp must be on disk before the rename

    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    let _ = fsync_dir(path);
    Ok(())
}

fn write_meta_contents(f: &mut std::fs::File, h: &MetaHeader) -> Result<()> {
    f.seek(SeekFrom::Start(0))?;
    f.write_all(META_MAGIC)?;
    f.write_u32::<LittleEndian>(h.version)?;
    f.write_u32::<LittleEndian>(h.block_size)?;
    f.write_u64::<LittleEndian>(h.nr_blocks)?;
    f.write_u64::<LittleEndian>(h.root)?;
    f.write_u32::<LittleEndian>(h.levels)?;
    f.write_u32::<LittleEndian>(h.value_size)?;
    f.write_u64::<LittleEndian>(h.transaction_id)?;
    f.write_u8(if h.clean_shutdown { 1 } else { 0 })?;
    Ok(())
}

/// Read and validate the meta file.
pub fn read_meta(root: &Path) -> Result<MetaHeader> {
    let path = meta_path(root);
    let mut f = OpenOptions::new()
        .read(true)
        .open(&path)
        .with_context(|| format!("open meta {}", path.display()))?;

    let mut magic = [0u8; 8];
    f.read_exact(&mut magic)?;
    if &magic != META_MAGIC {
        return Err(anyhow!(
            "bad meta magic at {} (expected {:?}, got {:?})",
            path.display(),
            META_MAGIC,
            magic
        ));
    }

    let version = f.read_u32::<LittleEndian>()?;
    if version != META_VERSION {
        return Err(anyhow!(
            "unsupported meta version {} at {} (expected {})",
            version,
            path.display(),
            META_VERSION
        ));
    }

    let block_size = f.read_u32::<LittleEndian>()?;
    let nr_blocks = f.read_u64::<LittleEndian>()?;
    let root_block = f.read_u64::<LittleEndian>()?;
    let levels = f.read_u32::<LittleEndian>()?;
    let value_size = f.read_u32::<LittleEndian>()?;
    let transaction_id = f.read_u64::<LittleEndian>()?;
    let clean_shutdown = f.read_u8()? != 0;

    if levels == 0 {
        return Err(anyhow!("meta levels must be >= 1 at {}", path.display()));
    }

    Ok(MetaHeader {
        version,
        block_size,
        nr_blocks,
        root: root_block,
        levels,
        value_size,
        transaction_id,
        clean_shutdown,
    })
}

/// Flip meta.clean_shutdown (only rewrites when the value changes).
pub fn set_clean_shutdown(root: &Path, clean: bool) -> Result<()> {
    let mut m = read_meta(root)?;
    if m.clean_shutdown != clean {
        m.clean_shutdown = clean;
        write_meta_overwrite(root, &m)?;
    }
    Ok(())
}
