//! DXGI 交换链

use windows::Win32::Graphics::Direct3D12::ID3D12Resource;
use windows::Win32::Graphics::Dxgi::{IDXGISwapChain3, DXGI_PRESENT, DXGI_SWAP_CHAIN_FLAG};

use super::device::BACK_BUFFER_FORMAT;
use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{PresentFlags, SwapChain};

pub struct Dx12SwapChain {
    swap_chain: IDXGISwapChain3,
    /// 创建时的交换链标志，调整尺寸时必须保持一致
    flags: u32,
}

impl Dx12SwapChain {
    pub(super) fn new(swap_chain: IDXGISwapChain3, flags: u32) -> Self {
        Self { swap_chain, flags }
    }
}

impl SwapChain for Dx12SwapChain {
    type Resource = ID3D12Resource;

    fn back_buffer(&self, index: u32) -> Result<ID3D12Resource> {
        unsafe {
            self.swap_chain.GetBuffer(index).map_err(|e| {
                GraphicsError::ResourceCreation(format!("Failed to get swap chain buffer {}: {:?}", index, e)).into()
            })
        }
    }

    fn current_back_buffer_index(&self) -> u32 {
        unsafe { self.swap_chain.GetCurrentBackBufferIndex() }
    }

    fn present(&self, sync_interval: u32, flags: PresentFlags) -> Result<()> {
        unsafe {
            self.swap_chain
                .Present(sync_interval, DXGI_PRESENT(flags.bits()))
                .ok()
                .map_err(|e| GraphicsError::PresentFailed(format!("{:?}", e)).into())
        }
    }

    fn resize_buffers(&self, buffer_count: u32, width: u32, height: u32) -> Result<()> {
        unsafe {
            self.swap_chain
                .ResizeBuffers(
                    buffer_count,
                    width,
                    height,
                    BACK_BUFFER_FORMAT,
                    DXGI_SWAP_CHAIN_FLAG(self.flags as i32),
                )
                .map_err(|e| GraphicsError::SwapchainError(format!("Failed to resize swap chain buffers: {:?}", e)).into())
        }
    }
}
