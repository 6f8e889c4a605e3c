//! 图形后端的统一抽象接口
//!
//! 命令提交与帧同步核心只通过这里的 trait 访问原生图形 API。
//! 每个后端以关联类型给出自己的句柄（队列、Fence、命令分配器、命令列表、
//! 资源、描述符堆、交换链），核心代码对这些句柄保持不透明。
//!
//! - `GpuDevice`：设备级操作，按 D3D12 的语义定义
//! - `SwapChain`：交换链操作
//! - `WindowHost`：平台层提供的窗口（尺寸、全屏切换、原生句柄）

use std::time::Duration;

use bitflags::bitflags;
use raw_window_handle::RawWindowHandle;

use crate::core::error::Result;
use crate::renderer::command::QueueType;
use crate::renderer::resource::ResourceState;

bitflags! {
    /// 呈现标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PresentFlags: u32 {
        /// 允许撕裂（仅在关闭垂直同步且输出支持时有效）
        const ALLOW_TEARING = 0x0000_0200;
    }
}

/// CPU 侧描述符句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CpuDescriptor(pub usize);

impl CpuDescriptor {
    /// 按描述符大小偏移
    pub fn offset(self, index: u32, increment: usize) -> Self {
        Self(self.0 + index as usize * increment)
    }
}

/// 交换链描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    pub buffer_count: u32,
    /// 创建时带上允许撕裂标志
    pub allow_tearing: bool,
}

/// 平台窗口
pub trait WindowHost {
    /// 当前客户区尺寸
    fn client_size(&self) -> (u32, u32);

    /// 进入或退出全屏（无边框窗口覆盖整个显示器）
    fn set_fullscreen(&mut self, fullscreen: bool);

    /// 原生窗口句柄，无头窗口返回 `None`
    fn raw_window_handle(&self) -> Option<RawWindowHandle>;
}

/// 交换链
pub trait SwapChain {
    /// 后缓冲资源类型
    type Resource;

    /// 获取第 `index` 个后缓冲的引用
    ///
    /// 返回的引用在 `resize_buffers` 之前必须全部释放。
    fn back_buffer(&self, index: u32) -> Result<Self::Resource>;

    /// 交换链报告的当前后缓冲索引
    fn current_back_buffer_index(&self) -> u32;

    /// 请求呈现当前后缓冲
    fn present(&self, sync_interval: u32, flags: PresentFlags) -> Result<()>;

    /// 调整所有后缓冲的尺寸
    fn resize_buffers(&self, buffer_count: u32, width: u32, height: u32) -> Result<()>;
}

/// 图形设备
///
/// 方法语义与 D3D12 一致：
/// - `create_command_list` 返回已打开、正在记录的命令列表
/// - `reset_command_list` 要求列表已关闭，重新打开并绑定到给定分配器
/// - `reset_allocator` 要求该分配器记录的工作已全部在 GPU 上完成
/// - `signal` 在队列的 GPU 时间线上插入 Fence 写入
/// - `queue_wait` 让队列在 GPU 侧等待 Fence 到达给定值
pub trait GpuDevice {
    type Queue;
    type Fence;
    type Allocator: Clone;
    type CommandList;
    type Resource: Clone;
    type DescriptorHeap;
    type SwapChain: SwapChain<Resource = Self::Resource>;

    /// 后端名称，用于日志
    fn backend_name(&self) -> &str;

    fn create_command_queue(&self, queue_type: QueueType) -> Result<Self::Queue>;

    fn create_fence(&self, initial_value: u64) -> Result<Self::Fence>;

    fn create_command_allocator(&self, queue_type: QueueType) -> Result<Self::Allocator>;

    fn create_command_list(
        &self,
        queue_type: QueueType,
        allocator: &Self::Allocator,
    ) -> Result<Self::CommandList>;

    fn reset_allocator(&self, allocator: &Self::Allocator) -> Result<()>;

    fn reset_command_list(&self, list: &Self::CommandList, allocator: &Self::Allocator) -> Result<()>;

    /// 关闭命令列表，记录期间的错误在这里报告
    fn close_command_list(&self, list: &Self::CommandList) -> Result<()>;

    fn resource_barrier(
        &self,
        list: &Self::CommandList,
        resource: &Self::Resource,
        before: ResourceState,
        after: ResourceState,
    );

    fn clear_render_target(&self, list: &Self::CommandList, rtv: CpuDescriptor, color: [f32; 4]);

    fn execute_command_list(&self, queue: &Self::Queue, list: &Self::CommandList) -> Result<()>;

    fn signal(&self, queue: &Self::Queue, fence: &Self::Fence, value: u64) -> Result<()>;

    fn queue_wait(&self, queue: &Self::Queue, fence: &Self::Fence, value: u64) -> Result<()>;

    /// GPU 已完成的 Fence 值（非阻塞）
    fn completed_value(&self, fence: &Self::Fence) -> Result<u64>;

    /// 阻塞直到 Fence 到达 `value`
    ///
    /// 到达返回 `Ok(true)`，超时返回 `Ok(false)`；`timeout` 为 `None` 时无限等待。
    fn wait_for_fence(&self, fence: &Self::Fence, value: u64, timeout: Option<Duration>) -> Result<bool>;

    fn create_rtv_heap(&self, descriptor_count: u32) -> Result<Self::DescriptorHeap>;

    /// 描述符堆中第 `index` 个 RTV 的句柄
    fn rtv_handle(&self, heap: &Self::DescriptorHeap, index: u32) -> CpuDescriptor;

    fn create_render_target_view(&self, resource: &Self::Resource, handle: CpuDescriptor);

    /// 输出是否支持撕裂（可变刷新率）
    fn is_tearing_supported(&self) -> bool;

    fn create_swap_chain(
        &self,
        queue: &Self::Queue,
        window: &dyn WindowHost,
        desc: &SwapChainDesc,
    ) -> Result<Self::SwapChain>;
}
