use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI over a ShadowTree metadata store (u64-valued trees).
#[derive(Parser, Debug)]
#[command(name = "shadowtree", version, about = "ShadowTree CoW B-tree CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Initialize a new store (meta + space map + empty tree)
    Init {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = 4096)]
        block_size: u32,
        #[arg(long, default_value_t = 102400)]
        nr_blocks: u64,
        /// Composite key arity
        #[arg(long, default_value_t = 1)]
        levels: u32,
    },
    /// Insert (or overwrite) a value at a composite key
    Insert {
        #[arg(long)]
        path: PathBuf,
        /// One key per tree level
        #[arg(long, value_delimiter = ',')]
        keys: Vec<u64>,
        #[arg(long)]
        value: u64,
    },
    /// Look up a composite key
    Lookup {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, value_delimiter = ',')]
        keys: Vec<u64>,
    },
    /// Remove a composite key
    Remove {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, value_delimiter = ',')]
        keys: Vec<u64>,
    },
    /// Damage-tolerant dump: values to stdout, damage to stderr
    Dump {
        #[arg(long)]
        path: PathBuf,
    },
    /// Damage-tolerant integrity check. --json prints a one-line report.
    Check {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Node/value counts for the published tree
    Stat {
        #[arg(long)]
        path: PathBuf,
    },
}
