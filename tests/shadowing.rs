use anyhow::Result;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use ShadowTree::btree::BTree;
use ShadowTree::db::Db;
use ShadowTree::{SpaceMap, StoreError};

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

fn setup(prefix: &str, nr_blocks: u64) -> Result<Db> {
    let root = unique_root(prefix);
    fs::create_dir_all(&root)?;
    Db::init(&root, 4096, nr_blocks, 1, 8)?;
    Db::open(&root)
}

#[test]
fn first_touch_copies_then_mutates_in_place() -> Result<()> {
    let mut db = setup("firsttouch", 1024)?;
    let mut tree = db.tree::<u64>()?;
    let committed_root = tree.root();

    // First mutation after a commit must move the root (copy).
    tree.insert(&mut db.tm, &[1], &10)?;
    let shadowed_root = tree.root();
    assert_ne!(committed_root, shadowed_root);

    // Further mutations in the same transaction reuse the private copy.
    tree.insert(&mut db.tm, &[2], &20)?;
    assert_eq!(tree.root(), shadowed_root);
    tree.insert(&mut db.tm, &[3], &30)?;
    assert_eq!(tree.root(), shadowed_root);

    db.commit_tree(&tree)?;

    // New transaction: first touch copies again.
    let mut tree = db.tree::<u64>()?;
    tree.insert(&mut db.tm, &[4], &40)?;
    assert_ne!(tree.root(), shadowed_root);
    Ok(())
}

#[test]
fn snapshot_keeps_reading_the_old_root() -> Result<()> {
    let mut db = setup("snapshot", 8192)?;

    let n: u64 = 2000;
    let mut tree = db.tree::<u64>()?;
    for i in 0..n {
        tree.insert(&mut db.tm, &[i], &(i + 1))?;
    }
    db.commit_tree(&tree)?;
    let snap_root = tree.root();

    // A second owner of the committed root (what a superblock snapshot
    // would record).
    db.tm.sm.inc(snap_root)?;

    // Mutate the live tree: overwrite some values, add new keys.
    let mut tree = db.tree::<u64>()?;
    for i in 0..100u64 {
        tree.insert(&mut db.tm, &[i], &0xDEAD)?;
    }
    for i in n..n + 500 {
        tree.insert(&mut db.tm, &[i], &(i + 1))?;
    }
    db.commit_tree(&tree)?;
    assert_ne!(tree.root(), snap_root);

    // The snapshot still reads the original content...
    let snap = BTree::<u64>::open(snap_root, 1)?;
    for i in 0..n {
        assert_eq!(snap.lookup(db.store(), &[i])?, Some(i + 1));
    }
    assert!(snap.lookup(db.store(), &[n])?.is_none());

    // ...while the live tree sees the mutations.
    let live = db.tree::<u64>()?;
    assert_eq!(live.lookup(db.store(), &[5])?, Some(0xDEAD));
    assert_eq!(live.lookup(db.store(), &[n + 250])?, Some(n + 251));
    Ok(())
}

#[test]
fn allocation_exhaustion_never_publishes() -> Result<()> {
    // A store too small to hold much: force alloc failure mid-mutation.
    let mut db = setup("exhaust", 8)?;

    let mut tree = db.tree::<u64>()?;
    let published = tree.root();

    let mut failed = false;
    for i in 0..10_000u64 {
        match tree.insert(&mut db.tm, &[i], &i) {
            Ok(_) => {}
            Err(e) => {
                assert_eq!(StoreError::classify(&e), "allocation");
                failed = true;
                break;
            }
        }
    }
    assert!(failed, "an 8-block store cannot absorb 10k inserts");

    // The failed transaction was never committed; the published root is
    // untouched.
    let m = ShadowTree::read_meta(&db.root)?;
    assert_eq!(m.root, published);
    assert_eq!(m.transaction_id, 1);
    Ok(())
}

#[test]
fn shadow_of_unreferenced_block_is_structural() -> Result<()> {
    let mut db = setup("badshadow", 64)?;
    let mut inc =
        |_sm: &mut dyn ShadowTree::SpaceMap, _data: &[u8]| -> anyhow::Result<()> { Ok(()) };
    let err = db.tm.shadow(40, &mut inc).unwrap_err();
    assert_eq!(StoreError::classify(&err), "structural");
    Ok(())
}
