use anyhow::Result;
use clap::Parser;
use env_logger::{Builder, Env};
use log::error;

mod cli;
mod cmd_init;
mod cmd_insert;
mod cmd_lookup;
mod cmd_remove;
mod cmd_dump;
mod cmd_check;
mod cmd_stat;

fn init_logger() {
    // Level comes from RUST_LOG, default info.
    // Example: RUST_LOG=debug ./shadowtree ...
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = run() {
        error!("{:?}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    match cli.cmd {
        cli::Cmd::Init {
            path,
            block_size,
            nr_blocks,
            levels,
        } => cmd_init::exec(path, block_size, nr_blocks, levels),

        cli::Cmd::Insert { path, keys, value } => cmd_insert::exec(path, keys, value),

        cli::Cmd::Lookup { path, keys } => cmd_lookup::exec(path, keys),

        cli::Cmd::Remove { path, keys } => cmd_remove::exec(path, keys),

        cli::Cmd::Dump { path } => cmd_dump::exec(path),

        cli::Cmd::Check { path, json } => cmd_check::exec(path, json),

        cli::Cmd::Stat { path } => cmd_stat::exec(path),
    }
}
