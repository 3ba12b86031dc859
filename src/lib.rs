pub mod audit;
pub mod builder;
pub mod classify;
pub mod cli;
pub mod commands;
pub mod config;
pub mod document;
pub mod drift;
pub mod error;
pub mod governance;
pub mod io_utils;
pub mod layout;
pub mod literal;
pub mod mapping;
pub mod migration;
pub mod naming;
pub mod source;
pub mod store;
pub mod target;
pub mod types;
pub mod validate;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use crate::cli::{Cli, Commands};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("schema_governor", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Probe(args) => commands::probe(&args),
        Commands::Map(args) => commands::map(&args),
        Commands::Submit(args) => commands::submit(&args),
        Commands::Approve(args) => commands::approve(&args),
        Commands::History(args) => commands::history(&args),
        Commands::Diff(args) => commands::diff(&args),
    }
}
