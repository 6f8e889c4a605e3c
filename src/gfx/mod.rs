//! 图形后端模块
//!
//! 本模块封装了图形 API 的底层实现：
//! - `sim`：进程内模拟的 GPU 时间线，所有平台可用
//! - DirectX 12：Windows 平台的原生实现
//!
//! 所有后端都实现了统一的 `GpuDevice` trait，
//! 渲染核心只依赖这个 trait。

pub mod backend;
pub mod sim;
#[cfg(target_os = "windows")]
pub mod dx12;

pub use backend::{CpuDescriptor, GpuDevice, PresentFlags, SwapChain, SwapChainDesc, WindowHost};
pub use sim::SimDevice;
#[cfg(target_os = "windows")]
pub use dx12::Dx12Device;
