use anyhow::{Context, Result};
use std::path::PathBuf;

use ShadowTree::db::Db;
use ShadowTree::NodeCountVisitor;

pub fn exec(path: PathBuf) -> Result<()> {
    let db = Db::open_ro(&path)?;
    let tree = db.tree::<u64>()?;

    let mut counter = NodeCountVisitor::default();
    tree.walk(db.store(), &mut counter)
        .context("stat walk failed; run `shadowtree check` for a damage report")?;

    let c = &counter.counts;
    println!("root:            {}", tree.root());
    println!("levels:          {}", tree.levels());
    println!("internal nodes:  {}", c.internal);
    println!("internal leaves: {}", c.internal_leaves);
    println!("leaves:          {}", c.leaves);
    println!("values:          {}", c.values);
    println!("blocks used:     {}", c.total_blocks());
    Ok(())
}
