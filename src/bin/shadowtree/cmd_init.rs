use anyhow::Result;
use std::path::PathBuf;

use ShadowTree::db::Db;
use ShadowTree::meta::read_meta;

pub fn exec(path: PathBuf, block_size: u32, nr_blocks: u64, levels: u32) -> Result<()> {
    if path.join("meta").exists() {
        let m = read_meta(&path)?;
        println!(
            "store already initialized at {} (block_size={}, nr_blocks={}, levels={})",
            path.display(),
            m.block_size,
            m.nr_blocks,
            m.levels
        );
        return Ok(());
    }
    // The CLI drives u64-valued trees.
    Db::init(&path, block_size, nr_blocks, levels, 8)?;
    println!("Initialized store at {}", path.display());
    Ok(())
}
