use anyhow::Result;
use std::path::PathBuf;

use ShadowTree::db::Db;

pub fn exec(path: PathBuf, keys: Vec<u64>) -> Result<()> {
    let db = Db::open_ro(&path)?;
    let tree = db.tree::<u64>()?;
    match tree.lookup(db.store(), &keys)? {
        Some(v) => println!("{}", v),
        None => {
            println!("not found");
            std::process::exit(2);
        }
    }
    Ok(())
}
