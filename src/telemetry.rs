//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了日志和链路追踪的初始化。

use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::trace::TracerProvider as SdkTracerProvider;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

/// 默认日志过滤器
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// 初始化 tracing 与 OpenTelemetry
///
/// 应在进程启动时调用一次。`filter` 为空时依次使用 `RUST_LOG` 和 [`DEFAULT_FILTER`]。
/// 已存在全局 subscriber 时静默跳过。
pub fn init_tracing(service_name: &str, filter: Option<&str>) {
    let env_filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
        }
    };

    // 未配置导出器时 provider 不产生任何输出，span 上下文仍然传播
    let provider = SdkTracerProvider::builder().build();
    global::set_tracer_provider(provider.clone());
    let tracer = provider.tracer(service_name.to_string());

    let subscriber = Registry::default()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(tracing_opentelemetry::layer().with_tracer(tracer));

    let _ = tracing::subscriber::set_global_default(subscriber);
}
