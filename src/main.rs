//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块是失效服务的入口点。

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    pilotcache::cli::run().await
}
