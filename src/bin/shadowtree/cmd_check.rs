//! Damage-tolerant integrity check with an optional one-line JSON report.

use anyhow::{anyhow, Result};
use serde_json::json;
use std::path::PathBuf;

use ShadowTree::db::Db;
use ShadowTree::meta::read_meta;
use ShadowTree::{metrics, BtreeDamage, DamageVisitor, ValueVisitor};

#[derive(Default)]
struct CountValues {
    nr: u64,
}

impl ValueVisitor<u64> for CountValues {
    fn visit(&mut self, _key: u64, _value: &u64) -> Result<()> {
        self.nr += 1;
        Ok(())
    }
}

#[derive(Default)]
struct CollectDamage {
    records: Vec<BtreeDamage>,
}

impl DamageVisitor for CollectDamage {
    fn visit(&mut self, d: &BtreeDamage) -> Result<()> {
        self.records.push(d.clone());
        Ok(())
    }
}

pub fn exec(path: PathBuf, json_out: bool) -> Result<()> {
    let db = Db::open_ro(&path)?;
    let m = read_meta(&path)?;
    let tree = db.tree::<u64>()?;

    let (vv, dv) =
        tree.walk_with_damage(db.store(), CountValues::default(), CollectDamage::default())?;

    let snap = metrics::snapshot();
    let ok = dv.records.is_empty();

    if json_out {
        let report = json!({
            "root": m.root,
            "transaction_id": m.transaction_id,
            "levels": m.levels,
            "clean_shutdown": m.clean_shutdown,
            "values": vv.nr,
            "damage": dv.records,
            "checksum_failures": snap.checksum_failures,
            "blocks_read": snap.blocks_read,
            "ok": ok,
        });
        println!("{}", report);
    } else {
        println!("root:            {}", m.root);
        println!("transaction id:  {}", m.transaction_id);
        println!("levels:          {}", m.levels);
        println!("clean shutdown:  {}", m.clean_shutdown);
        println!("values reached:  {}", vv.nr);
        println!("damaged ranges:  {}", dv.records.len());
        for d in &dv.records {
            println!("  level={} keys={} reason={}", d.level, d.keys, d.reason);
        }
        println!("status:          {}", if ok { "ok" } else { "DAMAGED" });
    }

    if ok {
        Ok(())
    } else {
        Err(anyhow!("{} damaged range(s) found", dv.records.len()))
    }
}
