//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了CLI命令行接口。

use crate::config::{Config, DEFAULT_CONFIG_FILE};
use crate::context::AppContext;
use crate::telemetry::init_tracing;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "pilotcache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Configuration file (default: pilotcache.toml)")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Log filter directives, overrides RUST_LOG")]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(name = "keys", about = "List cache keys matching an endpoint pattern")]
    Keys(KeysArgs),

    #[command(name = "evict", about = "Delete cache keys matching an endpoint pattern")]
    Evict(PatternArgs),

    #[command(name = "run", about = "Run one invalidation cycle for updated catalog rows")]
    Run(RunArgs),

    #[command(name = "stage", about = "Stage invalidation patterns into the queue")]
    Stage(RunArgs),

    #[command(name = "drain", about = "Claim and evict queued batches")]
    Drain,

    #[command(name = "batches", about = "List in-flight batches")]
    Batches,

    #[command(name = "retry", about = "Re-run eviction for an in-flight batch")]
    Retry(BatchArgs),

    #[command(name = "release", about = "Return a stuck batch to the unclaimed pool")]
    Release(BatchArgs),

    #[command(name = "migrate", about = "Create the queue and change-log tables")]
    Migrate(MigrateArgs),
}

#[derive(Parser, Debug)]
pub struct PatternArgs {
    #[arg(help = "Endpoint namespace, e.g. single_product")]
    pub endpoint: String,

    #[arg(short, long, help = "Locale code; all configured locales when omitted")]
    pub locale: Option<String>,

    #[arg(short, long, help = "Substring filter")]
    pub pattern: Option<String>,
}

#[derive(Parser, Debug)]
pub struct KeysArgs {
    #[command(flatten)]
    pub pattern: PatternArgs,

    #[arg(long, help = "Output as a JSON array")]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    #[arg(short, long, help = "Maximum changes processed (default: invalidation.row_limit)")]
    pub row_limit: Option<u64>,

    #[arg(long, help = "Only consider modifications from the last N seconds")]
    pub lookback_secs: Option<u64>,

    #[arg(long, help = "Print metrics after the cycle")]
    pub metrics: bool,
}

#[derive(Parser, Debug)]
pub struct BatchArgs {
    #[arg(help = "Batch identifier")]
    pub batch_id: String,
}

#[derive(Parser, Debug)]
pub struct MigrateArgs {
    #[arg(long, help = "Also create the catalog tables (development fixtures)")]
    pub with_catalog: bool,
}

mod batches;
mod cycle;
mod keys;
mod migrate;

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => Config::load(DEFAULT_CONFIG_FILE)
            .with_context(|| format!("Failed to load configuration from {}", DEFAULT_CONFIG_FILE)),
        None => Ok(Config::default()),
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.global.service_name, cli.log.as_deref());
    if cli.config.is_none() && !Path::new(DEFAULT_CONFIG_FILE).exists() {
        tracing::warn!("{} not found, using built-in defaults", DEFAULT_CONFIG_FILE);
    }

    if let Commands::Migrate(args) = &cli.command {
        return migrate::execute(&config, args).await;
    }

    let context = AppContext::from_config(&config)
        .await
        .context("Failed to initialize invalidation context")?;

    match &cli.command {
        Commands::Keys(args) => keys::list(&context, args).await,
        Commands::Evict(args) => keys::evict(&context, args).await,
        Commands::Run(args) => cycle::run(&context, args).await,
        Commands::Stage(args) => cycle::stage(&context, args).await,
        Commands::Drain => cycle::drain(&context).await,
        Commands::Batches => batches::list(&context).await,
        Commands::Retry(args) => batches::retry(&context, args).await,
        Commands::Release(args) => batches::release(&context, args).await,
        Commands::Migrate(_) => Ok(()),
    }
}
