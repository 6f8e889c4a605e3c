//! 模拟图形后端
//!
//! 在进程内模拟 GPU 时间线，不依赖任何原生图形 API。
//! 用于非 Windows 平台运行和自动化测试。

mod device;
mod swap_chain;
mod window;

pub use device::{
    SimAllocator, SimClock, SimCommand, SimCommandList, SimDescriptorHeap, SimDevice, SimDeviceDesc, SimEvent,
    SimFence, SimQueue,
};
pub use swap_chain::{SimResource, SimSwapChain};
pub use window::HeadlessWindow;
