#![allow(non_snake_case)]

// Base modules
pub mod consts;
pub mod error;
pub mod meta;
pub mod config;
pub mod lock;
pub mod metrics;

// Engine layers (folders with mod.rs)
pub mod block;  // src/block/{mod,cache,checksum}.rs
pub mod sm;     // src/sm/{mod,disk}.rs
pub mod tm;
pub mod btree;  // src/btree/{mod,node,value,insert,remove,walk,damage,count}.rs

// High-level handle
pub mod db;

// Convenience re-exports
pub use db::Db;
pub use block::BlockStore;
pub use btree::{
    BTree, BtreeDamage, BtreeDamageVisitor, DamageVisitor, KeyRange, NodeCountVisitor, NodeCounts,
    ValueVisitor,
};
pub use btree::value::{BlockAddrRefCounter, NoopRefCounter, RefCounter, ValueTraits};
pub use config::StoreConfig;
pub use error::StoreError;
pub use meta::{read_meta, set_clean_shutdown, validate_block_size, MetaHeader};
pub use sm::{CoreSpaceMap, DiskSpaceMap, SpaceMap};
pub use tm::TransactionManager;
