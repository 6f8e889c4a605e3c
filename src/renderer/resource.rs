//! 后缓冲资源
//!
//! 每个后缓冲携带索引、上一次使用它的 Fence 值和资源状态。
//! 状态机：`Present -> RenderTarget -> [绘制] -> RenderTarget -> Present -> 呈现`。

use crate::gfx::backend::CpuDescriptor;
use crate::renderer::sync::FenceValue;

/// 资源状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// 可呈现
    Present,
    /// 渲染目标
    RenderTarget,
}

/// 后缓冲
///
/// 资源引用在交换链调整尺寸前必须释放。
#[derive(Debug)]
pub struct BackBuffer<R> {
    index: u32,
    resource: Option<R>,
    rtv: CpuDescriptor,
    fence_value: FenceValue,
    state: ResourceState,
}

impl<R> BackBuffer<R> {
    pub fn new(index: u32, resource: R, rtv: CpuDescriptor) -> Self {
        Self {
            index,
            resource: Some(resource),
            rtv,
            fence_value: FenceValue::ZERO,
            state: ResourceState::Present,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// 资源，已释放时返回 `None`
    pub fn resource(&self) -> Option<&R> {
        self.resource.as_ref()
    }

    pub fn rtv(&self) -> CpuDescriptor {
        self.rtv
    }

    /// 最近一次使用该缓冲的提交的 Fence 值，从未使用时为 0
    pub fn fence_value(&self) -> FenceValue {
        self.fence_value
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    pub(crate) fn mark_in_use(&mut self, fence_value: FenceValue) {
        self.fence_value = fence_value;
    }

    pub(crate) fn set_state(&mut self, state: ResourceState) {
        self.state = state;
    }

    /// 释放资源引用
    pub(crate) fn release(&mut self) -> Option<R> {
        self.resource.take()
    }

    /// 重建后绑定新资源，状态回到 `Present`
    pub(crate) fn rebind(&mut self, resource: R, rtv: CpuDescriptor, fence_value: FenceValue) {
        self.resource = Some(resource);
        self.rtv = rtv;
        self.fence_value = fence_value;
        self.state = ResourceState::Present;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_back_buffer_lifecycle() {
        let mut buffer = BackBuffer::new(1, "surface", CpuDescriptor(0x40));
        assert_eq!(buffer.index(), 1);
        assert_eq!(buffer.fence_value(), FenceValue::ZERO);
        assert_eq!(buffer.state(), ResourceState::Present);

        buffer.mark_in_use(FenceValue::new(3));
        buffer.set_state(ResourceState::RenderTarget);
        assert_eq!(buffer.release(), Some("surface"));
        assert!(buffer.resource().is_none());

        buffer.rebind("resized", CpuDescriptor(0x40), FenceValue::new(5));
        assert_eq!(buffer.resource(), Some(&"resized"));
        assert_eq!(buffer.fence_value(), FenceValue::new(5));
        assert_eq!(buffer.state(), ResourceState::Present);
    }
}
