//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了建表命令的实现。

use crate::cli::MigrateArgs;
use crate::config::Config;
use crate::database;
use anyhow::{Context, Result};

pub async fn execute(config: &Config, args: &MigrateArgs) -> Result<()> {
    let db = database::connect(&config.database)
        .await
        .context("Failed to connect to the database")?;
    database::migrate(&db, args.with_catalog)
        .await
        .context("Failed to create tables")?;
    if args.with_catalog {
        println!("✅ Queue, change-log and catalog tables are ready.");
    } else {
        println!("✅ Queue and change-log tables are ready.");
    }
    Ok(())
}
