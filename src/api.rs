//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了暴露给 HTTP 层的失效操作。
//!
//! 按模式列出或删除缓存键，以及触发一次基于变更的驱逐周期。

use crate::error::Result;
use crate::metrics::GLOBAL_METRICS;
use crate::pattern::{ConcretePattern, Endpoint, KeyPattern, LocaleSlot, MatchExpr};
use crate::sync::{CycleReport, DueRequest, InvalidationOrchestrator};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{info, instrument};

/// 按模式操作缓存的请求
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternRequest {
    /// 端点命名空间，例如 `single_product`
    pub endpoint: String,
    /// 语言代码；为空时覆盖所有已配置的语言
    pub locale: Option<String>,
    /// 子串过滤器；为空时匹配全部
    pub filter: Option<String>,
}

impl PatternRequest {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// 解析为具体模式集合
    ///
    /// 未知端点或未配置的语言是终止性的 `InvalidInput` 错误。
    pub fn resolve(
        &self,
        orchestrator: &InvalidationOrchestrator,
    ) -> Result<BTreeSet<ConcretePattern>> {
        let endpoint: Endpoint = self.endpoint.parse()?;
        let matcher = MatchExpr::from_filter(self.filter.as_deref());
        let expander = orchestrator.expander();
        let pattern = match &self.locale {
            Some(code) => KeyPattern {
                endpoint,
                matcher,
                locale: LocaleSlot::Concrete(expander.locales().parse(code)?),
            },
            None => KeyPattern::placeholder(endpoint, matcher),
        };
        Ok(expander.expand(&pattern))
    }
}

/// 按模式删除的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionSummary {
    pub deleted: u64,
}

impl fmt::Display for EvictionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} key(s) deleted", self.deleted)
    }
}

/// 列出匹配请求的缓存键，已排序并去重
#[instrument(skip(orchestrator), level = "debug")]
pub async fn list_keys(
    orchestrator: &InvalidationOrchestrator,
    request: &PatternRequest,
) -> Result<Vec<String>> {
    let patterns = request.resolve(orchestrator)?;
    let keys = orchestrator.evictor().matching_keys(&patterns).await?;
    Ok(keys.into_iter().collect())
}

/// 删除匹配请求的缓存键
#[instrument(skip(orchestrator), level = "debug")]
pub async fn evict_keys(
    orchestrator: &InvalidationOrchestrator,
    request: &PatternRequest,
) -> Result<EvictionSummary> {
    let patterns = request.resolve(orchestrator)?;
    let outcome = orchestrator.evictor().evict(&patterns).await?;
    GLOBAL_METRICS.record_deleted("pattern", outcome.deleted);
    info!(
        endpoint = %request.endpoint,
        patterns = outcome.patterns,
        deleted = outcome.deleted,
        "Evicted cache keys by pattern"
    );
    Ok(EvictionSummary {
        deleted: outcome.deleted,
    })
}

/// 触发基于变更的驱逐
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdatedTrigger {
    /// 本周期最多处理的变更数
    pub row_limit: u64,
    /// 只考虑最近若干秒内的修改
    pub lookback_secs: Option<u64>,
}

impl UpdatedTrigger {
    pub fn new(row_limit: u64) -> Self {
        Self {
            row_limit,
            lookback_secs: None,
        }
    }

    pub fn with_lookback_secs(mut self, lookback_secs: u64) -> Self {
        self.lookback_secs = Some(lookback_secs);
        self
    }

    /// 转换为识别请求
    pub fn request(&self) -> DueRequest {
        let request = DueRequest::new(self.row_limit);
        match self.lookback_secs {
            Some(secs) => {
                request.with_lookback_ms(secs.saturating_mul(1000).min(i64::MAX as u64) as i64)
            }
            None => request,
        }
    }
}

/// 运行一个完整的失效周期
///
/// 返回的报告以 `"{n} key(s) deleted for {m} {target} change(s)"` 的形式显示。
#[instrument(skip(orchestrator), level = "debug")]
pub async fn trigger_updated(
    orchestrator: &InvalidationOrchestrator,
    trigger: UpdatedTrigger,
) -> Result<CycleReport> {
    orchestrator.run_cycle(trigger.request()).await
}
