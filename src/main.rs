//! DirectEcs - 帧同步演示程序
//!
//! 打开一个窗口，每帧清屏并呈现。可以通过配置文件或命令行参数选择图形后端。
//!
//! # 使用方法
//!
//! ```bash
//! # 使用配置文件
//! cargo run
//!
//! # 使用模拟后端，渲染 600 帧后退出
//! cargo run -- --sim --frames 600
//!
//! # 使用 WARP 软件适配器，关闭垂直同步
//! cargo run -- --dx12 --warp --no-vsync
//! ```
//!
//! # 架构概览
//!
//! ```text
//! ┌─────────────┐
//! │   main.rs   │  应用程序入口
//! └──────┬──────┘
//!        │
//! ┌──────▼──────┐
//! │     App     │  消息循环 / 应用上下文
//! └──────┬──────┘
//!        │
//! ┌──────▼──────┐
//! │  Renderer   │  队列 / Fence / 帧呈现环
//! └──────┬──────┘
//!        │
//!   ┌────┴────┐
//!   │         │
//! ┌─▼──┐   ┌──▼──┐
//! │DX12│   │ Sim │  具体后端实现
//! └────┘   └─────┘
//! ```

use direct_ecs::app;
use direct_ecs::core::{log, Config};
use tracing::info;

/// 应用程序入口点
///
/// # 初始化流程
///
/// 1. 加载配置文件（config.toml）
/// 2. 应用命令行参数覆盖
/// 3. 验证配置
/// 4. 初始化日志系统
/// 5. 运行消息循环，以其结果作为进程退出码
fn main() {
    // 1. 加载配置（在初始化日志之前）
    let mut config = Config::from_file_or_default("config.toml");

    // 2. 应用命令行参数
    config.apply_args(std::env::args());

    // 3. 验证配置
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    // 4. 初始化日志系统
    let log_file = if config.logging.file_output {
        Some(config.logging.log_file.as_str())
    } else {
        None
    };
    let log_guard = match log::init_logger(config.logging.level, config.logging.file_output, log_file) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            std::process::exit(1);
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), "DirectEcs starting...");
    info!(
        backend = config.graphics.backend.name(),
        width = config.window.width,
        height = config.window.height,
        vsync = config.graphics.vsync,
        warp = config.graphics.use_warp,
        "Graphics configuration"
    );

    // 5. 运行
    let code = app::exec(&config);
    info!(code, "DirectEcs exiting");
    // process::exit 不运行析构，先刷新文件日志
    drop(log_guard);
    std::process::exit(code);
}
