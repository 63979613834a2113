use std::time::Instant;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{ContainerConfig, LogSettings};

/// 输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

/// 订阅者配置，由容器配置的 `[logging]` 段得出
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub format: LogFormat,
    /// 是否显示目标模块
    pub show_target: bool,
    pub show_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            show_target: true,
            show_thread_ids: false,
        }
    }
}

impl LoggingConfig {
    /// 以日志段覆盖默认值（无法识别的取值保持默认）
    pub fn from_settings(settings: &LogSettings) -> Self {
        let mut config = Self::default();
        if let Some(level) = settings.level.as_deref().and_then(|l| l.parse::<Level>().ok()) {
            config.level = level;
        }
        if let Some(format) = settings.format.as_deref() {
            config.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            };
        }
        // 调试级别下并发解析较多，带上线程号便于对照
        config.show_thread_ids = config.level >= Level::DEBUG;
        config
    }

    /// 容器配置没有日志段时返回 `None`，由宿主程序自行安装订阅者
    pub fn for_container(config: &ContainerConfig) -> Option<Self> {
        config.logging.as_ref().map(Self::from_settings)
    }
}

/// 初始化日志系统
///
/// `RUST_LOG` 存在时优先于配置中的级别。全局订阅者已安装时返回错误。
pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    match config.format {
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_target(config.show_target)
                .with_thread_ids(config.show_thread_ids);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Json | LogFormat::Compact => {
            // json 输出需要额外特性，降级为紧凑格式
            let fmt_layer = fmt::layer()
                .compact()
                .with_target(config.show_target)
                .with_thread_ids(config.show_thread_ids)
                .with_ansi(false);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()?;
        }
    }

    tracing::info!(
        level = ?config.level,
        format = ?config.format,
        "Logging system initialized"
    );

    Ok(())
}

/// 按容器配置安装订阅者
///
/// 返回是否安装了订阅者；配置中没有日志段时不做任何事。
pub fn init_from_config(
    config: &ContainerConfig,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    match LoggingConfig::for_container(config) {
        Some(logging) => {
            init_logging(logging)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// 操作性能计时器
pub struct OperationTimer {
    start: Instant,
    operation: String,
    metadata: std::collections::HashMap<String, String>,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            start: Instant::now(),
            operation: operation.to_string(),
            metadata: std::collections::HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        tracing::trace!(
            operation = %self.operation,
            duration_us = self.start.elapsed().as_micros() as u64,
            metadata = ?self.metadata,
            "Operation completed"
        );
    }
}
