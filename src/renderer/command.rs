//! 命令记录与命令分配器池
//!
//! 命令列表从命令分配器中分配内存。分配器只有在它记录的所有工作都在 GPU 上
//! 执行完毕后才能重置，所以每次提交后分配器会带着该次提交的 Fence 值进入
//! 退休队列，等 Fence 到达后再被取出复用。
//!
//! 退休队列按 Fence 值递增排列（同一队列的提交顺序），只需检查队首。

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{CpuDescriptor, GpuDevice};
use crate::renderer::resource::ResourceState;
use crate::renderer::sync::{FenceTracker, FenceValue};

/// 队列类型
///
/// 决定使用哪个原生提交通道以及哪个命令队列实例。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    /// 图形队列（支持所有命令）
    Graphics,
    /// 计算队列
    Compute,
    /// 传输队列
    Copy,
}

impl QueueType {
    pub const ALL: [QueueType; 3] = [QueueType::Graphics, QueueType::Compute, QueueType::Copy];

    pub fn name(&self) -> &'static str {
        match self {
            QueueType::Graphics => "Graphics",
            QueueType::Compute => "Compute",
            QueueType::Copy => "Copy",
        }
    }

    /// 在 `ALL` 中的位置
    pub fn index(&self) -> usize {
        match self {
            QueueType::Graphics => 0,
            QueueType::Compute => 1,
            QueueType::Copy => 2,
        }
    }
}

/// 命令记录上下文
///
/// 一个分配器和一个在其上打开的命令列表。由 `CommandAllocatorPool::acquire`
/// 产生，提交后由命令队列交还给池。
pub struct RecordingContext<D: GpuDevice> {
    device: Arc<D>,
    allocator: D::Allocator,
    slot: usize,
    list: D::CommandList,
    queue_type: QueueType,
    closed: bool,
}

impl<D: GpuDevice> RecordingContext<D> {
    /// 记录一个资源状态转换屏障
    pub fn transition(&mut self, resource: &D::Resource, before: ResourceState, after: ResourceState) {
        self.device.resource_barrier(&self.list, resource, before, after);
    }

    /// 记录清除渲染目标
    pub fn clear_render_target(&mut self, rtv: CpuDescriptor, color: [f32; 4]) {
        self.device.clear_render_target(&self.list, rtv, color);
    }

    /// 关闭命令列表，之后不能再记录
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(GraphicsError::CommandExecution("command list is already closed".to_string()).into());
        }
        self.device.close_command_list(&self.list)?;
        self.closed = true;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    /// 原生命令列表
    pub fn list(&self) -> &D::CommandList {
        &self.list
    }

    pub fn allocator(&self) -> &D::Allocator {
        &self.allocator
    }
}

/// 命令分配器池
///
/// 分配器保存在一个数组中，退休队列记录（Fence 值, 数组下标）。
pub struct CommandAllocatorPool<D: GpuDevice> {
    device: Arc<D>,
    queue_type: QueueType,
    allocators: Vec<D::Allocator>,
    retired: VecDeque<(FenceValue, usize)>,
    /// 已提交、可以立即重新打开的命令列表
    spare_lists: Vec<D::CommandList>,
}

impl<D: GpuDevice> CommandAllocatorPool<D> {
    pub fn new(device: Arc<D>, queue_type: QueueType) -> Self {
        Self {
            device,
            queue_type,
            allocators: Vec::new(),
            retired: VecDeque::new(),
            spare_lists: Vec::new(),
        }
    }

    /// 获取一个 GPU 未在使用的分配器，并在其上打开命令列表
    ///
    /// 优先复用最早退休且 Fence 已到达的分配器，否则新建。
    pub fn acquire(&mut self, fence: &FenceTracker<D>) -> Result<RecordingContext<D>> {
        let recycled = match self.retired.front() {
            Some(&(tag, slot)) if fence.is_reached(tag)? => {
                self.retired.pop_front();
                trace!(queue = self.queue_type.name(), slot, tag = tag.value(), "Recycling command allocator");
                Some(slot)
            }
            _ => None,
        };

        let slot = match recycled {
            Some(slot) => {
                self.device.reset_allocator(&self.allocators[slot])?;
                slot
            }
            None => {
                let allocator = self.device.create_command_allocator(self.queue_type)?;
                self.allocators.push(allocator);
                debug!(
                    queue = self.queue_type.name(),
                    count = self.allocators.len(),
                    "Created command allocator"
                );
                self.allocators.len() - 1
            }
        };

        let allocator = self.allocators[slot].clone();
        let list = match self.spare_lists.pop() {
            Some(list) => {
                self.device.reset_command_list(&list, &allocator)?;
                list
            }
            None => self.device.create_command_list(self.queue_type, &allocator)?,
        };

        Ok(RecordingContext {
            device: Arc::clone(&self.device),
            allocator,
            slot,
            list,
            queue_type: self.queue_type,
            closed: false,
        })
    }

    /// 交还已提交的上下文，分配器在 `tag` 到达前不会再被取出
    pub fn release(&mut self, context: RecordingContext<D>, tag: FenceValue) {
        debug_assert!(context.closed, "released a context whose list is still open");
        debug_assert!(
            self.retired.back().map_or(true, |&(last, _)| last <= tag),
            "allocator tags must be released in submission order"
        );

        self.retired.push_back((tag, context.slot));
        self.spare_lists.push(context.list);
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    /// 已创建的分配器总数
    pub fn allocator_count(&self) -> usize {
        self.allocators.len()
    }

    /// 等待 GPU 完成的分配器数量
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::sim::SimDevice;

    struct Fixture {
        device: Arc<SimDevice>,
        queue: <SimDevice as GpuDevice>::Queue,
        fence: FenceTracker<SimDevice>,
        pool: CommandAllocatorPool<SimDevice>,
    }

    impl Fixture {
        fn new() -> Self {
            let device = Arc::new(SimDevice::manual());
            let queue = device.create_command_queue(QueueType::Graphics).unwrap();
            let fence = FenceTracker::new(Arc::clone(&device), None).unwrap();
            let pool = CommandAllocatorPool::new(Arc::clone(&device), QueueType::Graphics);
            Self { device, queue, fence, pool }
        }

        /// 获取、关闭、提交并交还一个上下文
        fn submit(&mut self) -> (usize, FenceValue) {
            let mut ctx = self.pool.acquire(&self.fence).unwrap();
            let id = ctx.allocator().id();
            ctx.close().unwrap();
            self.device.execute_command_list(&self.queue, ctx.list()).unwrap();
            let tag = self.fence.signal(&self.queue).unwrap();
            self.pool.release(ctx, tag);
            (id, tag)
        }
    }

    #[test]
    fn test_queue_type_lookup() {
        for (i, queue_type) in QueueType::ALL.iter().enumerate() {
            assert_eq!(queue_type.index(), i);
        }
        assert_eq!(QueueType::Copy.name(), "Copy");
    }

    #[test]
    fn test_no_premature_reuse() {
        let mut fx = Fixture::new();

        let (first, tag) = fx.submit();
        assert!(!fx.fence.is_reached(tag).unwrap());

        // GPU 未完成，必须分配新的
        let (second, _) = fx.submit();
        assert_ne!(first, second);
        assert_eq!(fx.pool.allocator_count(), 2);
        assert_eq!(fx.pool.retired_count(), 2);

        // 第一次提交完成后复用最早的分配器
        fx.device.retire_until_signal(QueueType::Graphics);
        let ctx = fx.pool.acquire(&fx.fence).unwrap();
        assert_eq!(ctx.allocator().id(), first);
        assert_eq!(fx.pool.allocator_count(), 2);
    }

    #[test]
    fn test_steady_state_bounded() {
        let mut fx = Fixture::new();

        for _ in 0..20 {
            fx.submit();
            // 保持最多一个提交在途
            if fx.pool.retired_count() > 1 {
                fx.device.retire_until_signal(QueueType::Graphics);
            }
        }

        assert!(fx.pool.allocator_count() <= 2);
        assert_eq!(fx.device.allocator_count(), fx.pool.allocator_count());
    }

    #[test]
    fn test_close_twice_fails() {
        let mut fx = Fixture::new();
        let mut ctx = fx.pool.acquire(&fx.fence).unwrap();
        ctx.close().unwrap();
        assert!(ctx.is_closed());
        assert!(ctx.close().is_err());
    }
}
