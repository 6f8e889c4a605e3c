//! DirectX 12 后端
//!
//! `GpuDevice` 在 D3D12 / DXGI 上的实现，仅在 Windows 上编译。

mod device;
mod swap_chain;

pub use device::{Dx12DescriptorHeap, Dx12Device, Dx12Fence};
pub use swap_chain::Dx12SwapChain;
