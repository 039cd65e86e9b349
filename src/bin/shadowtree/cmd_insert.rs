use anyhow::Result;
use std::path::PathBuf;

use ShadowTree::db::Db;

pub fn exec(path: PathBuf, keys: Vec<u64>, value: u64) -> Result<()> {
    let mut db = Db::open(&path)?;
    let mut tree = db.tree::<u64>()?;
    let replaced = tree.insert(&mut db.tm, &keys, &value)?;
    db.commit_tree(&tree)?;
    match replaced {
        Some(old) => println!("replaced {} -> {}", old, value),
        None => println!("inserted {}", value),
    }
    Ok(())
}
