use anyhow::Result;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use ShadowTree::db::Db;
use ShadowTree::meta::read_meta;
use ShadowTree::NodeCountVisitor;

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

#[test]
fn init_and_meta() -> Result<()> {
    let root = unique_root("init");
    fs::create_dir_all(&root)?;
    Db::init(&root, 4096, 1024, 1, 8)?;

    let m = read_meta(&root)?;
    assert_eq!(m.block_size, 4096);
    assert_eq!(m.nr_blocks, 1024);
    assert_eq!(m.levels, 1);
    assert_eq!(m.value_size, 8);
    assert_eq!(m.transaction_id, 1, "init publishes the empty tree");
    assert!(m.clean_shutdown);

    // the initial root must be a readable empty leaf
    let db = Db::open_ro(&root)?;
    let tree = db.tree::<u64>()?;
    assert!(tree.lookup(db.store(), &[0])?.is_none());
    Ok(())
}

#[test]
fn insert_lookup_overwrite_remove() -> Result<()> {
    let root = unique_root("ilor");
    fs::create_dir_all(&root)?;
    Db::init(&root, 4096, 8192, 1, 8)?;

    let n: u64 = 5000;
    {
        let mut db = Db::open(&root)?;
        let mut tree = db.tree::<u64>()?;
        for i in 0..n {
            assert!(tree.insert(&mut db.tm, &[i], &(i * 7))?.is_none());
        }
        db.commit_tree(&tree)?;
    }

    {
        let db = Db::open_ro(&root)?;
        let tree = db.tree::<u64>()?;
        for i in 0..n {
            assert_eq!(tree.lookup(db.store(), &[i])?, Some(i * 7));
        }
        assert!(tree.lookup(db.store(), &[n + 1])?.is_none());
    }

    // overwrite returns the old value
    {
        let mut db = Db::open(&root)?;
        let mut tree = db.tree::<u64>()?;
        assert_eq!(tree.insert(&mut db.tm, &[17], &999)?, Some(17 * 7));
        db.commit_tree(&tree)?;
    }

    // remove half the keys and verify the rest survive rebalancing
    {
        let mut db = Db::open(&root)?;
        let mut tree = db.tree::<u64>()?;
        for i in (0..n).step_by(2) {
            assert_eq!(tree.remove(&mut db.tm, &[i])?, Some(i * 7));
        }
        assert!(tree.remove(&mut db.tm, &[2])?.is_none(), "already removed");
        db.commit_tree(&tree)?;
    }

    {
        let db = Db::open_ro(&root)?;
        let tree = db.tree::<u64>()?;
        for i in 0..n {
            let got = tree.lookup(db.store(), &[i])?;
            if i % 2 == 0 {
                assert!(got.is_none(), "key {} should be gone", i);
            } else if i == 17 {
                assert_eq!(got, Some(999), "overwrite must survive");
            } else {
                assert_eq!(got, Some(i * 7));
            }
        }
    }
    Ok(())
}

#[test]
fn descending_and_random_order_inserts() -> Result<()> {
    let root = unique_root("order");
    fs::create_dir_all(&root)?;
    Db::init(&root, 4096, 8192, 1, 8)?;

    let mut db = Db::open(&root)?;
    let mut tree = db.tree::<u64>()?;

    // Descending order exercises the boundary-key rewrite on slot 0.
    for i in (0..2000u64).rev() {
        tree.insert(&mut db.tm, &[i], &(i + 1))?;
    }
    // A reproducibly shuffled batch on top.
    let mut rng = oorandom::Rand64::new(7);
    for _ in 0..2000 {
        let k = 2000 + rng.rand_range(0..5000);
        tree.insert(&mut db.tm, &[k], &(k + 1))?;
    }
    db.commit_tree(&tree)?;

    let tree = db.tree::<u64>()?;
    for i in 0..2000u64 {
        assert_eq!(tree.lookup(db.store(), &[i])?, Some(i + 1));
    }
    Ok(())
}

#[test]
fn empty_after_removing_everything() -> Result<()> {
    let root = unique_root("drain");
    fs::create_dir_all(&root)?;
    Db::init(&root, 4096, 4096, 1, 8)?;

    let mut db = Db::open(&root)?;
    let mut tree = db.tree::<u64>()?;
    let n: u64 = 1500;
    for i in 0..n {
        tree.insert(&mut db.tm, &[i], &i)?;
    }
    for i in 0..n {
        assert_eq!(tree.remove(&mut db.tm, &[i])?, Some(i));
    }
    db.commit_tree(&tree)?;

    let tree = db.tree::<u64>()?;
    let mut counter = NodeCountVisitor::default();
    tree.walk(db.store(), &mut counter)?;
    assert_eq!(counter.counts.values, 0);
    assert_eq!(
        counter.counts.total_blocks(),
        1,
        "a drained tree collapses to a single empty leaf"
    );
    Ok(())
}

#[test]
fn uncommitted_mutation_is_invisible_after_reopen() -> Result<()> {
    let root = unique_root("uncommitted");
    fs::create_dir_all(&root)?;
    Db::init(&root, 4096, 4096, 1, 8)?;

    {
        let mut db = Db::open(&root)?;
        let mut tree = db.tree::<u64>()?;
        tree.insert(&mut db.tm, &[1], &100)?;
        db.commit_tree(&tree)?;

        // second mutation, never committed
        tree.insert(&mut db.tm, &[2], &200)?;
    }

    let db = Db::open_ro(&root)?;
    let tree = db.tree::<u64>()?;
    assert_eq!(tree.lookup(db.store(), &[1])?, Some(100));
    assert!(
        tree.lookup(db.store(), &[2])?.is_none(),
        "unpublished root must not be visible"
    );
    Ok(())
}
