//! 核心功能模块
//!
//! 本模块提供了引擎的基础功能，与具体图形 API 无关。
//!
//! # 模块组织
//!
//! - `log`：日志系统，基于 tracing 的结构化日志
//! - `config`：配置管理，支持从配置文件和命令行加载引擎设置
//! - `error`：错误处理，定义统一的错误类型
//! - `clock`：帧计时和 FPS 统计
//! - `event`：平台无关的窗口事件

pub mod log;
pub mod config;
pub mod error;
pub mod clock;
pub mod event;

// 重新导出常用类型，方便使用
pub use error::{Result, DirectEcsError, GraphicsError, ConfigError};
pub use config::Config;
pub use clock::{Clock, FpsCounter};
pub use event::{PlatformEvent, LoopControl, EventType};
