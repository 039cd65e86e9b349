//! Persisted space map.
//!
//! File <root>/spacemap:
//! Header (24 B):
//!   [magic8="S1SMAP01"][ver u32=1][crc u32][nr_blocks u64]
//! Tail:
//!   u32 refcount per block (LE), nr_blocks entries.
//!
//! The CRC (crc32fast) covers [ver][nr_blocks] + the counts area; magic
//! and the crc field itself are excluded. The whole file is rewritten via
//! tmp+rename on flush, so a crash leaves either the previous table or
//! the new one, never a torn mix.

use anyhow::{anyhow, Context, Result};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::consts::{SPACE_MAP_FILE, SPACE_MAP_MAGIC};

use super::{CoreSpaceMap, SpaceMap};

const SPACE_MAP_VER_1: u32 = 1;

#[derive(Debug)]
pub struct DiskSpaceMap {
    core: CoreSpaceMap,
    path: PathBuf,
}

impl DiskSpaceMap {
    /// Create a new space map file with all counts zero.
    /// Error if one already exists.
    pub fn create(root: &Path, nr_blocks: u64) -> Result<Self> {
        let path = root.join(SPACE_MAP_FILE);
        if path.exists() {
            return Err(anyhow!("space map already exists at {}", path.display()));
        }
        let sm = Self {
            core: CoreSpaceMap::new(nr_blocks),
            path,
        };
        sm.write_file()?;
        Ok(sm)
    }

    /// Open an existing space map file, validating header and CRC.
    pub fn open(root: &Path) -> Result<Self> {
        let path = root.join(SPACE_MAP_FILE);
        let mut f = OpenOptions::new()
            .read(true)
            .open(&path)
            .with_context(|| format!("open space map {}", path.display()))?;

        let mut magic = [0u8; 8];
        f.read_exact(&mut magic)?;
        if &magic != SPACE_MAP_MAGIC {
            return Err(anyhow!("bad space map magic in {}", path.display()));
        }
        let ver = f.read_u32::<LittleEndian>()?;
        if ver != SPACE_MAP_VER_1 {
            return Err(anyhow!(
                "unsupported space map version {} in {}",
                ver,
                path.display()
            ));
        }
        let stored_crc = f.read_u32::<LittleEndian>()?;
        let nr_blocks = f.read_u64::<LittleEndian>()?;

        let mut counts_bytes = vec![0u8; (nr_blocks as usize) * 4];
        f.read_exact(&mut counts_bytes)
            .with_context(|| format!("short space map {}", path.display()))?;

        let calc = compute_sm_crc(ver, nr_blocks, &counts_bytes);
        if calc != stored_crc {
            return Err(anyhow!(
                "space map CRC mismatch in {} (stored={}, calc={})",
                path.display(),
                stored_crc,
                calc
            ));
        }

        let mut core = CoreSpaceMap::new(nr_blocks);
        for i in 0..nr_blocks as usize {
            let c = LittleEndian::read_u32(&counts_bytes[i * 4..i * 4 + 4]);
            for _ in 0..c {
                core.inc(i as u64)?;
            }
        }
        // Loading is not a transaction: everything is immediately reusable.
        core.flush()?;

        Ok(Self { core, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_file(&self) -> Result<()> {
        let nr = self.core.nr_blocks();
        let mut counts_bytes = vec![0u8; (nr as usize) * 4];
        for i in 0..nr {
            let c = self.core.get_count(i)?;
            LittleEndian::write_u32(&mut counts_bytes[(i as usize) * 4..][..4], c);
        }
        let crc = compute_sm_crc(SPACE_MAP_VER_1, nr, &counts_bytes);

        let tmp = self.path.with_file_name(format!(
            "{}.tmp",
            self.path.file_name().unwrap().to_string_lossy()
        ));
        let _ = fs::remove_file(&tmp); // best-effort

        let mut tf = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .with_context(|| format!("open space map tmp {}", tmp.display()))?;

        tf.write_all(SPACE_MAP_MAGIC)?;
        tf.write_u32::<LittleEndian>(SPACE_MAP_VER_1)?;
        tf.write_u32::<LittleEndian>(crc)?;
        tf.write_u64::<LittleEndian>(nr)?;
        tf.write_all(&counts_bytes)?;
        tf.sync_all()?;

        fs::rename(&tmp, &self.path).with_context(|| {
            format!(
                "rename space map tmp {} -> {}",
                tmp.display(),
                self.path.display()
            )
        })?;
        let _ = fsync_parent_dir(&self.path);
        Ok(())
    }
}

impl SpaceMap for DiskSpaceMap {
    fn nr_blocks(&self) -> u64 {
        self.core.nr_blocks()
    }
    fn get_count(&self, block: u64) -> Result<u32> {
        self.core.get_count(block)
    }
    fn inc(&mut self, block: u64) -> Result<()> {
        self.core.inc(block)
    }
    fn dec(&mut self, block: u64) -> Result<u32> {
        self.core.dec(block)
    }
    fn alloc(&mut self) -> Result<u64> {
        self.core.alloc()
    }
    fn nr_allocated(&self) -> u64 {
        self.core.nr_allocated()
    }

    fn flush(&mut self) -> Result<()> {
        self.write_file()?;
        self.core.flush()
    }
}

/// CRC over [ver u32][nr_blocks u64] + counts area.
fn compute_sm_crc(ver: u32, nr_blocks: u64, counts_bytes: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    let mut buf4 = [0u8; 4];
    LittleEndian::write_u32(&mut buf4, ver);
    hasher.update(&buf4);
    let mut buf8 = [0u8; 8];
    LittleEndian::write_u64(&mut buf8, nr_blocks);
    hasher.update(&buf8);
    hasher.update(counts_bytes);
    hasher.finalize()
}

// Best-effort fsync parent directory after rename (Unix only).
#[cfg(unix)]
fn fsync_parent_dir(p: &Path) -> std::io::Result<()> {
    use std::fs::File;
    if let Some(parent) = p.parent() {
        if !parent.as_os_str().is_empty() {
            let dir = File::open(parent)?;
            dir.sync_all()?;
        }
    }
    Ok(())
}
#[cfg(not(unix))]
fn fsync_parent_dir(_p: &Path) -> std::io::Result<()> {
    Ok(())
}
