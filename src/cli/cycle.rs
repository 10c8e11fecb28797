//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了失效周期相关命令的实现。

use crate::api::{self, UpdatedTrigger};
use crate::cli::RunArgs;
use crate::context::AppContext;
use crate::metrics::get_metrics_string;
use anyhow::Result;

fn trigger(context: &AppContext, args: &RunArgs) -> UpdatedTrigger {
    let row_limit = args
        .row_limit
        .unwrap_or(context.config.invalidation.row_limit);
    let trigger = UpdatedTrigger::new(row_limit);
    match args.lookback_secs {
        Some(secs) => trigger.with_lookback_secs(secs),
        None => trigger,
    }
}

pub async fn run(context: &AppContext, args: &RunArgs) -> Result<()> {
    let report = api::trigger_updated(&context.orchestrator, trigger(context, args)).await?;
    println!("{}", report);
    for batch_id in &report.batch_ids {
        println!("  batch {}", batch_id);
    }
    if args.metrics {
        println!("\n{}", get_metrics_string());
    }
    Ok(())
}

pub async fn stage(context: &AppContext, args: &RunArgs) -> Result<()> {
    let request = trigger(context, args).request();
    let report = context.orchestrator.stage(request).await?;
    println!(
        "{} pattern(s) staged ({} row(s)) for {} {} change(s)",
        report.patterns, report.enqueued, report.identified, report.target
    );
    if args.metrics {
        println!("\n{}", get_metrics_string());
    }
    Ok(())
}

pub async fn drain(context: &AppContext) -> Result<()> {
    let report = context.orchestrator.drain().await?;
    println!("{}", report);
    Ok(())
}
