use anyhow::Result;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use ShadowTree::btree::node::{InternalNode, LeafNode};
use ShadowTree::btree::walk::{NodeLocation, NodeVisitor};
use ShadowTree::db::Db;
use ShadowTree::{BtreeDamage, DamageVisitor, ValueTraits, ValueVisitor};

use byteorder::{ByteOrder, LittleEndian};

const BLOCK_SIZE: u32 = 4096;
const NR_BLOCKS: u64 = 102400;

// Unique temp roots per test
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let base = std::env::temp_dir();
    base.join(format!("sttest-{prefix}-{pid}-{t}-{id}"))
}

// A payload with more than one field, packed LE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Thing {
    x: u32,
    y: u64,
}

impl Thing {
    fn new(x: u32, y: u64) -> Self {
        Self { x, y }
    }
}

impl ValueTraits for Thing {
    const PACKED_SIZE: usize = 12;

    fn pack(&self, out: &mut [u8]) {
        LittleEndian::write_u32(&mut out[0..4], self.x);
        LittleEndian::write_u64(&mut out[4..12], self.y);
    }

    fn unpack(data: &[u8]) -> Result<Self> {
        anyhow::ensure!(data.len() >= 12, "short Thing");
        Ok(Self {
            x: LittleEndian::read_u32(&data[0..4]),
            y: LittleEndian::read_u64(&data[4..12]),
        })
    }
}

// Recording observers: ordered logs instead of mock expectations.
#[derive(Default)]
struct RecordValues {
    log: Vec<(u64, Thing)>,
    completions: u64,
}

impl ValueVisitor<Thing> for RecordValues {
    fn visit(&mut self, key: u64, value: &Thing) -> Result<()> {
        self.log.push((key, *value));
        Ok(())
    }

    fn complete(&mut self) -> Result<()> {
        self.completions += 1;
        Ok(())
    }
}

#[derive(Default)]
struct RecordDamage {
    log: Vec<BtreeDamage>,
    completions: u64,
}

impl DamageVisitor for RecordDamage {
    fn visit(&mut self, damage: &BtreeDamage) -> Result<()> {
        self.log.push(damage.clone());
        Ok(())
    }

    fn complete(&mut self) -> Result<()> {
        self.completions += 1;
        Ok(())
    }
}

// Layout recorder: depth-first node inventory with retroactively patched
// key ranges, used to aim corruption at a specific leaf.
#[derive(Debug, Clone)]
struct NodeInfo {
    leaf: bool,
    depth: usize,
    level: usize,
    block: u64,
    begin: Option<u64>,
    end: Option<u64>,
}

#[derive(Default)]
struct BtreeLayout {
    nodes: Vec<NodeInfo>,
    last_at_depth: Vec<usize>,
}

impl BtreeLayout {
    fn record_node(&mut self, leaf: bool, loc: &NodeLocation, block: u64, first_key: Option<u64>) {
        let begin = first_key.or(loc.key);
        let idx = self.nodes.len();
        if loc.depth < self.last_at_depth.len() {
            let last = self.last_at_depth[loc.depth];
            self.nodes[last].end = begin;
            self.last_at_depth[loc.depth] = idx;
        } else {
            self.last_at_depth.push(idx);
        }
        self.nodes.push(NodeInfo {
            leaf,
            depth: loc.depth,
            level: loc.level,
            block,
            begin,
            end: None,
        });
    }

    fn leaves(&self) -> Vec<&NodeInfo> {
        self.nodes.iter().filter(|n| n.leaf).collect()
    }
}

impl NodeVisitor<Thing> for BtreeLayout {
    fn visit_internal(&mut self, loc: &NodeLocation, node: &InternalNode) -> Result<bool> {
        self.record_node(false, loc, node.block, node.keys.first().copied());
        Ok(true)
    }

    fn visit_internal_leaf(&mut self, loc: &NodeLocation, node: &LeafNode<u64>) -> Result<bool> {
        self.record_node(true, loc, node.block, node.keys.first().copied());
        Ok(true)
    }

    fn visit_leaf(&mut self, loc: &NodeLocation, node: &LeafNode<Thing>) -> Result<bool> {
        self.record_node(true, loc, node.block, node.keys.first().copied());
        Ok(true)
    }
}

// ---------------- fixture helpers ----------------

fn setup(prefix: &str) -> Result<(PathBuf, Db)> {
    let root = unique_root(prefix);
    fs::create_dir_all(&root)?;
    Db::init(&root, BLOCK_SIZE, NR_BLOCKS, 1, Thing::PACKED_SIZE as u32)?;
    let db = Db::open(&root)?;
    Ok((root, db))
}

fn insert_values(db: &mut Db, nr: u64) -> Result<()> {
    let mut tree = db.tree::<Thing>()?;
    for i in 0..nr {
        tree.insert(&mut db.tm, &[i], &Thing::new(i as u32, i + 1234))?;
    }
    db.commit_tree(&tree)?;
    Ok(())
}

fn trash_block(db: &mut Db, block: u64) -> Result<()> {
    let zeros = vec![0u8; BLOCK_SIZE as usize];
    db.tm.store.write_raw(block, &zeros)
}

fn run_walk(db: &Db) -> Result<(RecordValues, RecordDamage)> {
    let tree = db.tree::<Thing>()?;
    tree.walk_with_damage(db.store(), RecordValues::default(), RecordDamage::default())
}

fn expect_value_range(values: &[(u64, Thing)], offset: usize, begin: u64, end: u64) {
    let mut i = offset;
    let mut k = begin;
    while k < end {
        assert_eq!(values[i].0, k, "key order mismatch at log index {}", i);
        assert_eq!(values[i].1, Thing::new(k as u32, k + 1234));
        i += 1;
        k += 1;
    }
}

// ---------------- tests ----------------

#[test]
fn visiting_an_empty_tree() -> Result<()> {
    let (_root, db) = setup("empty")?;

    let (vv, dv) = run_walk(&db)?;
    assert!(vv.log.is_empty(), "no values expected");
    assert!(dv.log.is_empty(), "no damage expected");
    assert_eq!(vv.completions, 1);
    assert_eq!(dv.completions, 1);
    Ok(())
}

#[test]
fn visiting_a_tree_with_a_trashed_root() -> Result<()> {
    let (_root, mut db) = setup("trashroot")?;
    insert_values(&mut db, 10)?;

    let root_block = db.tree::<Thing>()?.root();
    trash_block(&mut db, root_block)?;

    let (vv, dv) = run_walk(&db)?;
    assert!(vv.log.is_empty());
    assert_eq!(dv.log.len(), 1);
    let d = &dv.log[0];
    assert_eq!(d.level, 0);
    assert_eq!(d.keys.begin, None, "a trashed root has no lower bound");
    assert_eq!(d.keys.end, None, "a trashed root has no upper bound");
    assert_eq!(vv.completions, 1);
    assert_eq!(dv.completions, 1);
    Ok(())
}

#[test]
fn visiting_a_populated_tree_with_no_damage() -> Result<()> {
    let (_root, mut db) = setup("nodamage")?;
    insert_values(&mut db, 10000)?;

    let (vv, dv) = run_walk(&db)?;
    assert_eq!(vv.log.len(), 10000);
    expect_value_range(&vv.log, 0, 0, 10000);
    assert!(dv.log.is_empty());
    Ok(())
}

#[test]
fn visiting_a_populated_tree_with_a_damaged_leaf_node() -> Result<()> {
    let (_root, mut db) = setup("leafdamage")?;
    insert_values(&mut db, 10000)?;

    // Inventory the tree, then aim at a reproducibly random leaf.
    let tree = db.tree::<Thing>()?;
    let mut layout = BtreeLayout::default();
    tree.walk(db.store(), &mut layout)?;

    let leaves = layout.leaves();
    assert!(leaves.len() > 1, "10000 values must span several leaves");
    assert!(
        leaves.iter().all(|l| l.depth == leaves[0].depth && l.level == 0),
        "a single-level tree keeps all leaves at one depth"
    );
    let mut rng = oorandom::Rand64::new(0x5EED_CAFE);
    let target = leaves[rng.rand_range(0..leaves.len() as u64) as usize].clone();

    trash_block(&mut db, target.block)?;

    let a = target.begin.expect("populated leaves have a first key");
    let b = target.end; // None when the trashed leaf was the last one

    let (vv, dv) = run_walk(&db)?;

    // Values: [0, a) then [b, 10000), in order, nothing else.
    let upper_resume = b.unwrap_or(10000);
    expect_value_range(&vv.log, 0, 0, a);
    expect_value_range(&vv.log, a as usize, upper_resume, 10000);
    assert_eq!(vv.log.len() as u64, a + (10000 - upper_resume));

    assert_eq!(dv.log.len(), 1);
    let d = &dv.log[0];
    assert_eq!(d.level, 0);
    assert_eq!(d.keys.begin, Some(a));
    assert_eq!(d.keys.end, b);
    assert!(!d.reason.is_empty());
    Ok(())
}

#[test]
fn visiting_a_populated_tree_with_two_damaged_leaves() -> Result<()> {
    let (_root, mut db) = setup("twoleaves")?;
    insert_values(&mut db, 10000)?;

    let tree = db.tree::<Thing>()?;
    let mut layout = BtreeLayout::default();
    tree.walk(db.store(), &mut layout)?;

    let leaves = layout.leaves();
    assert!(leaves.len() > 4);
    // Two distinct, non-adjacent leaves away from the tail.
    let first = leaves[1].clone();
    let second = leaves[3].clone();

    trash_block(&mut db, first.block)?;
    trash_block(&mut db, second.block)?;

    let (vv, dv) = run_walk(&db)?;

    assert_eq!(dv.log.len(), 2, "one record per corrupted node");
    assert_eq!(dv.log[0].keys.begin, first.begin);
    assert_eq!(dv.log[0].keys.end, first.end);
    assert_eq!(dv.log[1].keys.begin, second.begin);
    assert_eq!(dv.log[1].keys.end, second.end);

    let lost = (first.end.unwrap() - first.begin.unwrap())
        + (second.end.unwrap() - second.begin.unwrap());
    assert_eq!(vv.log.len() as u64, 10000 - lost);
    Ok(())
}

#[test]
fn traversals_are_idempotent() -> Result<()> {
    let (_root, mut db) = setup("idem")?;
    insert_values(&mut db, 5000)?;

    let tree = db.tree::<Thing>()?;
    let mut layout = BtreeLayout::default();
    tree.walk(db.store(), &mut layout)?;
    let leaves = layout.leaves();
    let mut rng = oorandom::Rand64::new(42);
    let target = leaves[rng.rand_range(0..leaves.len() as u64) as usize].clone();
    trash_block(&mut db, target.block)?;

    let (vv1, dv1) = run_walk(&db)?;
    let (vv2, dv2) = run_walk(&db)?;

    assert_eq!(vv1.log, vv2.log);
    assert_eq!(dv1.log, dv2.log);
    Ok(())
}

#[test]
fn thing_codec_roundtrip() -> Result<()> {
    let mut buf = [0u8; 12];
    for v in [
        Thing::new(0, 0),
        Thing::new(1, 1235),
        Thing::new(u32::MAX, u64::MAX),
        Thing::new(0xDEAD, 0xBEEF_CAFE),
    ] {
        v.pack(&mut buf);
        assert_eq!(Thing::unpack(&buf)?, v);
    }
    Ok(())
}
