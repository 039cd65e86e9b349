use anyhow::Result;
use std::path::PathBuf;

use ShadowTree::db::Db;

pub fn exec(path: PathBuf, keys: Vec<u64>) -> Result<()> {
    let mut db = Db::open(&path)?;
    let mut tree = db.tree::<u64>()?;
    let removed = tree.remove(&mut db.tm, &keys)?;
    db.commit_tree(&tree)?;
    match removed {
        Some(v) => println!("removed {}", v),
        None => println!("not found"),
    }
    Ok(())
}
