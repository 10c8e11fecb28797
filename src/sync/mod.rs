//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了失效周期的各个环节，包括变更来源、批次队列、缓存驱逐和编排。

pub mod evictor;
pub mod orchestrator;
pub mod queue;
pub mod source;

pub use evictor::{CacheEvictor, EvictionOutcome};
pub use orchestrator::{CycleReport, DrainReport, InvalidationOrchestrator, StageReport};
pub use queue::{Batch, BatchInfo, BatchQueue, QueueEntry, StagedPattern};
pub use source::{ChangeLogSource, DueEntitySource, DueRequest, WatermarkSource};
