//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了按模式列出和删除缓存键的命令。

use crate::api::{self, PatternRequest};
use crate::cli::{KeysArgs, PatternArgs};
use crate::context::AppContext;
use anyhow::Result;

fn request(args: &PatternArgs) -> PatternRequest {
    PatternRequest {
        endpoint: args.endpoint.clone(),
        locale: args.locale.clone(),
        filter: args.pattern.clone(),
    }
}

pub async fn list(context: &AppContext, args: &KeysArgs) -> Result<()> {
    let keys = api::list_keys(&context.orchestrator, &request(&args.pattern)).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&keys)?);
        return Ok(());
    }
    if keys.is_empty() {
        println!("No keys matched.");
        return Ok(());
    }
    for key in &keys {
        println!("{}", key);
    }
    println!("\n{} key(s) matched", keys.len());
    Ok(())
}

pub async fn evict(context: &AppContext, args: &PatternArgs) -> Result<()> {
    let summary = api::evict_keys(&context.orchestrator, &request(args)).await?;
    println!("{}", summary);
    Ok(())
}
