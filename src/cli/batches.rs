//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了进行中批次的查看与恢复命令。

use crate::cli::BatchArgs;
use crate::context::AppContext;
use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};

fn format_millis(millis: i64) -> String {
    match Utc.timestamp_millis_opt(millis).single() {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => millis.to_string(),
    }
}

pub async fn list(context: &AppContext) -> Result<()> {
    let orchestrator = &context.orchestrator;
    let batches = orchestrator.in_flight_batches().await?;
    let pending = orchestrator.pending_count().await?;

    println!("=== In-flight Batches ===\n");
    if batches.is_empty() {
        println!("No batches in flight.");
    }
    for batch in &batches {
        println!("Batch:      {}", batch.batch_id);
        println!("Entries:    {}", batch.entries);
        println!("Claimed at: {}", format_millis(batch.claimed_at));
        println!();
    }
    println!("Unclaimed entries: {}", pending);
    Ok(())
}

pub async fn retry(context: &AppContext, args: &BatchArgs) -> Result<()> {
    let report = context
        .orchestrator
        .retry_batch(&args.batch_id)
        .await
        .with_context(|| format!("Failed to retry batch '{}'", args.batch_id))?;
    println!("{}", report);
    Ok(())
}

pub async fn release(context: &AppContext, args: &BatchArgs) -> Result<()> {
    let released = context
        .orchestrator
        .release_batch(&args.batch_id)
        .await
        .with_context(|| format!("Failed to release batch '{}'", args.batch_id))?;
    println!("{} entr(ies) returned to the queue", released);
    Ok(())
}
