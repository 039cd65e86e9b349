use anyhow::Result;
use std::path::PathBuf;

use ShadowTree::db::Db;
use ShadowTree::{BtreeDamage, DamageVisitor, ValueVisitor};

struct PrintValues;

impl ValueVisitor<u64> for PrintValues {
    fn visit(&mut self, key: u64, value: &u64) -> Result<()> {
        println!("{} {}", key, value);
        Ok(())
    }
}

struct PrintDamage {
    nr: u64,
}

impl DamageVisitor for PrintDamage {
    fn visit(&mut self, d: &BtreeDamage) -> Result<()> {
        self.nr += 1;
        eprintln!("damage: level={} keys={} reason={}", d.level, d.keys, d.reason);
        Ok(())
    }
}

pub fn exec(path: PathBuf) -> Result<()> {
    let db = Db::open_ro(&path)?;
    let tree = db.tree::<u64>()?;

    let (_vv, dv) = tree.walk_with_damage(db.store(), PrintValues, PrintDamage { nr: 0 })?;
    if dv.nr > 0 {
        eprintln!("dump incomplete: {} damaged range(s)", dv.nr);
    }
    Ok(())
}
