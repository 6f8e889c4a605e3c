//! DirectEcs - Direct3D 12 风格的命令提交与帧同步核心
//!
//! 本库提供了 Fence 跟踪、命令分配器回收、多队列提交和交换链帧呈现，
//! 通过 `GpuDevice` trait 在 DirectX 12 或模拟 GPU 上运行。
//!
//! # 模块结构
//!
//! - `core`: 核心功能模块（日志、配置、错误处理、计时、事件）
//! - `gfx`: 图形后端抽象层与实现（DirectX 12、模拟后端）
//! - `renderer`: 命令提交与帧同步核心
//! - `app`: 应用上下文、每帧更新系统、平台消息循环
//!
//! # 使用示例
//!
//! ```
//! use std::sync::Arc;
//! use direct_ecs::app::Application;
//! use direct_ecs::core::{Config, PlatformEvent};
//! use direct_ecs::gfx::sim::{HeadlessWindow, SimDevice, SimDeviceDesc};
//!
//! let device = Arc::new(SimDevice::new(SimDeviceDesc::timed(std::time::Duration::from_millis(1))).unwrap());
//! let mut window = HeadlessWindow::new(640, 480);
//!
//! let mut app = Application::new();
//! app.init(device, &window, &Config::default()).unwrap();
//! app.handle_event(PlatformEvent::Redraw, &mut window).unwrap();
//! app.shutdown().unwrap();
//! ```

pub mod core;
pub mod gfx;
pub mod renderer;
pub mod app;
