//! 日志系统模块
//!
//! 基于 `tracing` 提供结构化的日志记录功能。
//!
//! - 控制台输出：始终开启
//! - 文件输出：可选，按天滚动，经后台线程写入
//! - `RUST_LOG` 环境变量覆盖配置中的级别
//! - 日志级别：trace, debug, info, warn, error
//!
//! 每帧的提交与呈现记录在 `trace` 级别，Fence 等待记录在 `debug` 级别。

use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

use super::config::LogLevel;
use super::error::{DirectEcsError, Result};

/// 初始化日志系统
///
/// 必须在程序开始时调用一次，重复调用会返回错误。
/// 启用文件输出时返回写入线程的 guard，调用方需持有到退出，否则尾部日志会丢失。
///
/// # 参数
///
/// * `level` - 日志级别
/// * `file_output` - 是否输出到文件
/// * `log_file_path` - 日志文件路径（可选，默认为 "direct_ecs.log"）
pub fn init_logger(level: LogLevel, file_output: bool, log_file_path: Option<&str>) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(std::env::var("RUST_LOG").ok().as_deref(), level);

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true);

    let registry = tracing_subscriber::registry().with(filter).with(console_layer);

    let result = if file_output {
        let log_path = log_file_path.unwrap_or("direct_ecs.log");
        let path = Path::new(log_path);
        let directory = path.parent().unwrap_or(Path::new("."));
        let filename = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("direct_ecs.log");

        let file_appender = RollingFileAppender::new(Rotation::DAILY, directory, filename);
        let (writer, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_ansi(false)
            .with_writer(writer);

        registry.with(file_layer).try_init().map(|_| Some(guard))
    } else {
        registry.try_init().map(|_| None)
    };

    result.map_err(|e| DirectEcsError::Log(e.to_string()))
}

/// 环境变量中的过滤规则有效时优先使用，否则回退到配置级别
fn build_filter(env_directive: Option<&str>, level: LogLevel) -> EnvFilter {
    env_directive
        .filter(|directive| !directive.trim().is_empty())
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new(filter_directive(level)))
}

fn filter_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

/// 日志级别转换
impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}
