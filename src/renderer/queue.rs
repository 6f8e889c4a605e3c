//! 命令队列
//!
//! 每种队列类型一个实例，各自拥有一个 Fence 跟踪器和一个命令分配器池。
//! 提交按调用顺序在 GPU 上执行，队列不会重排。

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, info_span, trace};

use crate::core::error::Result;
use crate::gfx::backend::GpuDevice;
use crate::renderer::command::{CommandAllocatorPool, QueueType, RecordingContext};
use crate::renderer::sync::{FenceTracker, FenceValue};

pub struct CommandQueue<D: GpuDevice> {
    device: Arc<D>,
    queue_type: QueueType,
    queue: D::Queue,
    fence: FenceTracker<D>,
    allocators: CommandAllocatorPool<D>,
}

impl<D: GpuDevice> CommandQueue<D> {
    pub fn new(device: Arc<D>, queue_type: QueueType, fence_timeout: Option<Duration>) -> Result<Self> {
        let queue = device.create_command_queue(queue_type)?;
        let fence = FenceTracker::new(Arc::clone(&device), fence_timeout)?;
        let allocators = CommandAllocatorPool::new(Arc::clone(&device), queue_type);

        debug!(queue = queue_type.name(), "Command queue created");

        Ok(Self {
            device,
            queue_type,
            queue,
            fence,
            allocators,
        })
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    /// 获取一个已打开的命令记录上下文
    pub fn get_recording_context(&mut self) -> Result<RecordingContext<D>> {
        self.allocators.acquire(&self.fence)
    }

    /// 提交命令列表，返回代表"到此为止的工作"的 Fence 值
    ///
    /// 列表尚未关闭时先关闭。
    pub fn execute_command_list(&mut self, mut context: RecordingContext<D>) -> Result<FenceValue> {
        if !context.is_closed() {
            context.close()?;
        }

        self.device.execute_command_list(&self.queue, context.list())?;
        let value = self.fence.signal(&self.queue)?;
        self.allocators.release(context, value);

        trace!(queue = self.queue_type.name(), fence = value.value(), "Command list submitted");
        Ok(value)
    }

    /// 在队列上写入下一个 Fence 值
    pub fn signal(&mut self) -> Result<FenceValue> {
        self.fence.signal(&self.queue)
    }

    pub fn is_fence_reached(&self, value: FenceValue) -> Result<bool> {
        self.fence.is_reached(value)
    }

    /// 阻塞直到 Fence 值到达
    pub fn wait_for_fence_value(&self, value: FenceValue) -> Result<()> {
        self.fence.wait_until_reached(value)
    }

    /// 等待此前提交的所有工作完成
    pub fn flush(&mut self) -> Result<()> {
        let _span = info_span!("flush", queue = self.queue_type.name()).entered();
        let value = self.signal()?;
        self.wait_for_fence_value(value)?;
        debug!(fence = value.value(), "Queue flushed");
        Ok(())
    }

    /// 让本队列后续的工作在 GPU 上等待 `other` 的 Fence 到达 `value`
    pub fn wait_for_queue(&self, other: &CommandQueue<D>, value: FenceValue) -> Result<()> {
        trace!(
            queue = self.queue_type.name(),
            other = other.queue_type.name(),
            fence = value.value(),
            "Inserting cross-queue wait"
        );
        self.device.queue_wait(&self.queue, other.fence.native(), value.value())
    }

    /// 最近一次写入的 Fence 值
    pub fn last_signaled(&self) -> FenceValue {
        self.fence.issued_value()
    }

    pub fn completed_value(&self) -> Result<FenceValue> {
        self.fence.completed_value()
    }

    /// 原生队列
    pub fn native(&self) -> &D::Queue {
        &self.queue
    }

    pub fn allocator_pool(&self) -> &CommandAllocatorPool<D> {
        &self.allocators
    }
}

/// 三种队列，按队列类型查找
pub struct CommandQueues<D: GpuDevice> {
    graphics: CommandQueue<D>,
    compute: CommandQueue<D>,
    copy: CommandQueue<D>,
}

impl<D: GpuDevice> CommandQueues<D> {
    pub fn new(device: Arc<D>, fence_timeout: Option<Duration>) -> Result<Self> {
        let queues = Self {
            graphics: CommandQueue::new(Arc::clone(&device), QueueType::Graphics, fence_timeout)?,
            compute: CommandQueue::new(Arc::clone(&device), QueueType::Compute, fence_timeout)?,
            copy: CommandQueue::new(device, QueueType::Copy, fence_timeout)?,
        };
        info!("Command queues created");
        Ok(queues)
    }

    pub fn get(&self, queue_type: QueueType) -> &CommandQueue<D> {
        match queue_type {
            QueueType::Graphics => &self.graphics,
            QueueType::Compute => &self.compute,
            QueueType::Copy => &self.copy,
        }
    }

    pub fn get_mut(&mut self, queue_type: QueueType) -> &mut CommandQueue<D> {
        match queue_type {
            QueueType::Graphics => &mut self.graphics,
            QueueType::Compute => &mut self.compute,
            QueueType::Copy => &mut self.copy,
        }
    }

    pub fn graphics(&self) -> &CommandQueue<D> {
        &self.graphics
    }

    pub fn graphics_mut(&mut self) -> &mut CommandQueue<D> {
        &mut self.graphics
    }

    /// 依次刷新图形、计算、拷贝队列
    pub fn flush_all(&mut self) -> Result<()> {
        for queue_type in QueueType::ALL {
            self.get_mut(queue_type).flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::sim::{SimDevice, SimEvent};
    use std::thread;

    #[test]
    fn test_submissions_return_increasing_values() {
        let device = Arc::new(SimDevice::manual());
        let mut queue = CommandQueue::new(Arc::clone(&device), QueueType::Compute, None).unwrap();

        let mut last = FenceValue::ZERO;
        for _ in 0..8 {
            let ctx = queue.get_recording_context().unwrap();
            let value = queue.execute_command_list(ctx).unwrap();
            assert!(value > last);
            last = value;
        }
        assert_eq!(queue.last_signaled(), last);
    }

    #[test]
    fn test_copy_queue_wait_is_independent_of_later_work() {
        let device = Arc::new(SimDevice::manual());
        let mut queue = CommandQueue::new(Arc::clone(&device), QueueType::Copy, None).unwrap();

        let values: Vec<u64> = (0..3)
            .map(|_| {
                let ctx = queue.get_recording_context().unwrap();
                queue.execute_command_list(ctx).unwrap().value()
            })
            .collect();
        assert_eq!(values, vec![1, 2, 3]);

        let gpu = Arc::clone(&device);
        let helper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            assert_eq!(gpu.retire_until_signal(QueueType::Copy), Some(1));
            thread::sleep(Duration::from_millis(20));
            assert_eq!(gpu.retire_until_signal(QueueType::Copy), Some(2));
        });

        queue.wait_for_fence_value(FenceValue::new(2)).unwrap();
        helper.join().unwrap();

        assert!(queue.is_fence_reached(FenceValue::new(2)).unwrap());
        assert!(!queue.is_fence_reached(FenceValue::new(3)).unwrap());
        // 第三次提交仍在队列中
        assert!(device.pending_ops(QueueType::Copy) > 0);
    }

    #[test]
    fn test_flush_waits_for_everything() {
        let device = Arc::new(SimDevice::manual());
        let mut queue = CommandQueue::new(Arc::clone(&device), QueueType::Graphics, None).unwrap();

        for _ in 0..3 {
            let ctx = queue.get_recording_context().unwrap();
            queue.execute_command_list(ctx).unwrap();
        }

        let gpu = Arc::clone(&device);
        let helper = thread::spawn(move || {
            for _ in 0..50 {
                thread::sleep(Duration::from_millis(2));
                gpu.retire_all();
            }
        });

        queue.flush().unwrap();
        helper.join().unwrap();

        assert_eq!(device.pending_ops(QueueType::Graphics), 0);
        assert!(queue.is_fence_reached(queue.last_signaled()).unwrap());
    }

    #[test]
    fn test_cross_queue_wait() {
        let device = Arc::new(SimDevice::manual());
        let mut queues = CommandQueues::new(Arc::clone(&device), None).unwrap();

        let ctx = queues.get_mut(QueueType::Copy).get_recording_context().unwrap();
        let upload = queues.get_mut(QueueType::Copy).execute_command_list(ctx).unwrap();

        queues.graphics().wait_for_queue(queues.get(QueueType::Copy), upload).unwrap();
        let ctx = queues.graphics_mut().get_recording_context().unwrap();
        let draw = queues.graphics_mut().execute_command_list(ctx).unwrap();

        // 拷贝队列未推进时图形队列无法越过等待
        assert!(!device.retire_next(QueueType::Graphics));
        assert!(!queues.graphics().is_fence_reached(draw).unwrap());

        device.retire_all();
        assert!(queues.graphics().is_fence_reached(draw).unwrap());

        let events = device.events();
        let copy_done = events
            .iter()
            .position(|e| matches!(e, SimEvent::FenceCompleted { queue: QueueType::Copy, .. }))
            .unwrap();
        let graphics_exec = events
            .iter()
            .position(|e| matches!(e, SimEvent::Executed { queue: QueueType::Graphics, .. }))
            .unwrap();
        assert!(copy_done < graphics_exec);
    }

    #[test]
    fn test_flush_all_drains_every_queue() {
        let device = Arc::new(SimDevice::new(crate::gfx::sim::SimDeviceDesc::timed(Duration::from_millis(1))).unwrap());
        let mut queues = CommandQueues::new(Arc::clone(&device), Some(Duration::from_secs(5))).unwrap();

        for queue_type in QueueType::ALL {
            let queue = queues.get_mut(queue_type);
            let ctx = queue.get_recording_context().unwrap();
            queue.execute_command_list(ctx).unwrap();
        }

        queues.flush_all().unwrap();
        for queue_type in QueueType::ALL {
            assert_eq!(device.pending_ops(queue_type), 0);
            let queue = queues.get(queue_type);
            assert!(queue.is_fence_reached(queue.last_signaled()).unwrap());
        }
    }
}
