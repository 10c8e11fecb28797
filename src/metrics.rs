//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了失效周期的指标收集功能。

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{span, Level};

/// 指标收集器
///
/// 用于收集和存储失效服务的运行时指标
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    /// 周期总数
    /// key: "mode:result"
    pub cycles_total: Arc<Mutex<HashMap<String, u64>>>,
    /// 识别到的变更实体数，key: mode
    pub entities_identified: Arc<Mutex<HashMap<String, u64>>>,
    /// 生成的具体模式数，key: mode
    pub patterns_generated: Arc<Mutex<HashMap<String, u64>>>,
    /// 删除的缓存键数，key: 触发方式（cycle / pattern）
    pub keys_deleted: Arc<Mutex<HashMap<String, u64>>>,
    /// 未认领的队列行数，key: service
    pub queue_depth: Arc<Mutex<HashMap<String, u64>>>,
    /// 周期耗时（累积时间和计数）
    /// key: mode -> (total_duration_secs, count)
    pub cycle_duration: Arc<Mutex<HashMap<String, (f64, u64)>>>,
}

lazy_static! {
    /// 全局指标实例
    pub static ref GLOBAL_METRICS: Metrics = Metrics::default();
}

/// 获取锁，锁中毒时继续使用内部数据
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Metrics {
    /// 记录一个周期的结果
    ///
    /// # 参数
    ///
    /// * `mode` - 执行方式（direct/staged/stage/drain）
    /// * `result` - 结果（ok/error）
    /// * `duration_secs` - 耗时（秒）
    pub fn record_cycle(&self, mode: &str, result: &str, duration_secs: f64) {
        let span = span!(Level::INFO, "invalidation_cycle", mode, result);
        let _enter = span.enter();
        *lock(&self.cycles_total)
            .entry(format!("{}:{}", mode, result))
            .or_insert(0) += 1;
        let mut durations = lock(&self.cycle_duration);
        let entry = durations.entry(mode.to_string()).or_insert((0.0, 0));
        entry.0 += duration_secs;
        entry.1 += 1;
    }

    pub fn record_identified(&self, mode: &str, count: u64) {
        *lock(&self.entities_identified)
            .entry(mode.to_string())
            .or_insert(0) += count;
    }

    pub fn record_patterns(&self, mode: &str, count: u64) {
        *lock(&self.patterns_generated)
            .entry(mode.to_string())
            .or_insert(0) += count;
    }

    pub fn record_deleted(&self, origin: &str, count: u64) {
        *lock(&self.keys_deleted)
            .entry(origin.to_string())
            .or_insert(0) += count;
    }

    /// 设置队列深度
    pub fn set_queue_depth(&self, service: &str, depth: u64) {
        lock(&self.queue_depth).insert(service.to_string(), depth);
    }

    /// 某种执行方式和结果的周期数
    pub fn cycles(&self, mode: &str, result: &str) -> u64 {
        lock(&self.cycles_total)
            .get(&format!("{}:{}", mode, result))
            .copied()
            .unwrap_or(0)
    }

    pub fn deleted(&self, origin: &str) -> u64 {
        lock(&self.keys_deleted).get(origin).copied().unwrap_or(0)
    }
}

fn sorted<V: Clone>(map: &HashMap<String, V>) -> Vec<(String, V)> {
    let mut entries: Vec<(String, V)> = map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

/// 获取指标字符串
///
/// 将所有指标格式化为类 Prometheus 文本返回，用于监控系统采集
pub fn get_metrics_string() -> String {
    let metrics = &GLOBAL_METRICS;
    let cycles = sorted(&lock(&metrics.cycles_total));
    let identified = sorted(&lock(&metrics.entities_identified));
    let patterns = sorted(&lock(&metrics.patterns_generated));
    let deleted = sorted(&lock(&metrics.keys_deleted));
    let depth = sorted(&lock(&metrics.queue_depth));
    let durations = sorted(&lock(&metrics.cycle_duration));

    let mut output = String::new();
    for (k, v) in cycles {
        if let Some((mode, result)) = k.split_once(':') {
            output.push_str(&format!(
                "invalidation_cycles_total{{mode=\"{}\", result=\"{}\"}} {}\n",
                mode, result, v
            ));
        }
    }
    for (k, v) in identified {
        output.push_str(&format!(
            "invalidation_entities_identified_total{{mode=\"{}\"}} {}\n",
            k, v
        ));
    }
    for (k, v) in patterns {
        output.push_str(&format!(
            "invalidation_patterns_generated_total{{mode=\"{}\"}} {}\n",
            k, v
        ));
    }
    for (k, v) in deleted {
        output.push_str(&format!(
            "invalidation_keys_deleted_total{{origin=\"{}\"}} {}\n",
            k, v
        ));
    }
    for (k, v) in depth {
        output.push_str(&format!(
            "invalidation_queue_depth{{service=\"{}\"}} {}\n",
            k, v
        ));
    }
    for (k, (total, count)) in durations {
        output.push_str(&format!(
            "invalidation_cycle_duration_seconds_sum{{mode=\"{}\"}} {}\n",
            k, total
        ));
        output.push_str(&format!(
            "invalidation_cycle_duration_seconds_count{{mode=\"{}\"}} {}\n",
            k, count
        ));
    }
    output
}
