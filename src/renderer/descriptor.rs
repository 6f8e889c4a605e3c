//! 渲染目标视图
//!
//! RTV 描述符堆中的条目与后缓冲一一对应，后缓冲重建时一起重建。

use crate::core::error::Result;
use crate::gfx::backend::{CpuDescriptor, GpuDevice, SwapChain};

pub struct RenderTargetViews<D: GpuDevice> {
    heap: D::DescriptorHeap,
    count: u32,
}

impl<D: GpuDevice> RenderTargetViews<D> {
    /// 创建能容纳 `count` 个 RTV 的描述符堆
    pub fn new(device: &D, count: u32) -> Result<Self> {
        let heap = device.create_rtv_heap(count)?;
        Ok(Self { heap, count })
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// 第 `index` 个 RTV 的 CPU 句柄
    pub fn handle(&self, device: &D, index: u32) -> CpuDescriptor {
        device.rtv_handle(&self.heap, index)
    }

    /// 为交换链的每个后缓冲创建 RTV，返回（资源, 句柄）
    pub fn update(&self, device: &D, swap_chain: &D::SwapChain) -> Result<Vec<(D::Resource, CpuDescriptor)>> {
        (0..self.count)
            .map(|index| {
                let resource = swap_chain.back_buffer(index)?;
                let handle = self.handle(device, index);
                device.create_render_target_view(&resource, handle);
                Ok((resource, handle))
            })
            .collect()
    }
}
