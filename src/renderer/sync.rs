//! GPU 同步机制模块
//!
//! CPU 通过单调递增的 Fence 值观察 GPU 进度：队列在其时间线上写入 Fence，
//! GPU 执行到该位置后 Fence 的完成值随之推进。
//!
//! # 使用场景
//!
//! 1. **帧同步**：后缓冲在其上一次使用的 Fence 值到达前不能再次渲染
//! 2. **分配器回收**：命令分配器在其 Fence 值到达前不能重置
//! 3. **刷新队列**：调整交换链尺寸、关闭前等待所有工作完成

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::GpuDevice;

/// Fence 值
///
/// 用于CPU-GPU同步的单调递增值。
/// CPU可以等待GPU完成特定Fence值对应的工作。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FenceValue(u64);

impl FenceValue {
    /// 尚未发出任何信号
    pub const ZERO: FenceValue = FenceValue(0);

    /// 创建新的Fence值
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// 获取内部值
    pub fn value(&self) -> u64 {
        self.0
    }

    /// 下一个Fence值
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for FenceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fence 跟踪器
///
/// 封装一个原生 Fence，记录 CPU 侧最高已发出的值，并缓存 GPU 侧最近观察到的完成值。
/// 每个命令队列拥有一个。
pub struct FenceTracker<D: GpuDevice> {
    device: Arc<D>,
    fence: D::Fence,
    /// 已发出的最高值（CPU侧）
    issued: FenceValue,
    /// 最近一次读到的完成值（GPU侧）
    completed: Cell<FenceValue>,
    timeout: Option<Duration>,
}

impl<D: GpuDevice> FenceTracker<D> {
    /// 创建 Fence 跟踪器，`timeout` 为 `None` 时等待不设上限
    pub fn new(device: Arc<D>, timeout: Option<Duration>) -> Result<Self> {
        let fence = device.create_fence(0)?;
        Ok(Self {
            device,
            fence,
            issued: FenceValue::ZERO,
            completed: Cell::new(FenceValue::ZERO),
            timeout,
        })
    }

    /// 在队列的 GPU 时间线上写入下一个 Fence 值
    pub fn signal(&mut self, queue: &D::Queue) -> Result<FenceValue> {
        let value = self.issued.next();
        self.device.signal(queue, &self.fence, value.value())?;
        self.issued = value;
        trace!(value = value.value(), "Fence signaled");
        Ok(value)
    }

    /// 已发出的最高值
    pub fn issued_value(&self) -> FenceValue {
        self.issued
    }

    /// GPU 报告的完成值
    pub fn completed_value(&self) -> Result<FenceValue> {
        let completed = FenceValue::new(self.device.completed_value(&self.fence)?);
        self.completed.set(completed);
        Ok(completed)
    }

    /// 检查 Fence 值是否已到达（非阻塞）
    pub fn is_reached(&self, value: FenceValue) -> Result<bool> {
        if value <= self.completed.get() {
            return Ok(true);
        }
        Ok(self.completed_value()? >= value)
    }

    /// 阻塞直到 Fence 值到达，已到达时立即返回
    pub fn wait_until_reached(&self, value: FenceValue) -> Result<()> {
        if self.is_reached(value)? {
            return Ok(());
        }

        debug!(value = value.value(), completed = self.completed.get().value(), "Waiting for fence");

        let reached = self.device.wait_for_fence(&self.fence, value.value(), self.timeout)?;
        if !reached {
            return Err(GraphicsError::WaitTimeout { value: value.value() }.into());
        }

        self.completed.set(self.completed.get().max(value));
        debug!(value = value.value(), "Fence wait completed");
        Ok(())
    }

    /// 原生 Fence，供跨队列等待使用
    pub fn native(&self) -> &D::Fence {
        &self.fence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::sim::SimDevice;
    use crate::renderer::command::QueueType;

    fn tracker(device: &Arc<SimDevice>) -> (FenceTracker<SimDevice>, <SimDevice as GpuDevice>::Queue) {
        let queue = device.create_command_queue(QueueType::Graphics).unwrap();
        let tracker = FenceTracker::new(Arc::clone(device), Some(Duration::from_millis(20))).unwrap();
        (tracker, queue)
    }

    #[test]
    fn test_fence_value() {
        let fence = FenceValue::new(1);
        assert_eq!(fence.value(), 1);
        assert_eq!(fence.next().value(), 2);
        assert_eq!(fence.to_string(), "1");
        assert!(FenceValue::ZERO < fence);
    }

    #[test]
    fn test_signal_is_monotonic() {
        let device = Arc::new(SimDevice::manual());
        let (mut tracker, queue) = tracker(&device);

        let values: Vec<_> = (0..5).map(|_| tracker.signal(&queue).unwrap()).collect();
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(tracker.issued_value(), FenceValue::new(5));
    }

    #[test]
    fn test_reached_in_order() {
        let device = Arc::new(SimDevice::manual());
        let (mut tracker, queue) = tracker(&device);

        let v1 = tracker.signal(&queue).unwrap();
        let v2 = tracker.signal(&queue).unwrap();
        assert!(!tracker.is_reached(v1).unwrap());

        device.retire_until_signal(QueueType::Graphics);
        assert!(tracker.is_reached(v1).unwrap());
        assert!(!tracker.is_reached(v2).unwrap());

        device.retire_all();
        assert!(tracker.is_reached(v2).unwrap());
        assert_eq!(tracker.completed_value().unwrap(), v2);
    }

    #[test]
    fn test_wait_returns_immediately_when_reached() {
        let device = Arc::new(SimDevice::manual());
        let (mut tracker, queue) = tracker(&device);

        tracker.wait_until_reached(FenceValue::ZERO).unwrap();

        let v1 = tracker.signal(&queue).unwrap();
        device.retire_all();
        device.clear_events();
        tracker.wait_until_reached(v1).unwrap();
        // 没有进入阻塞等待
        assert!(device.events().is_empty());
    }

    #[test]
    fn test_wait_timeout() {
        let device = Arc::new(SimDevice::manual());
        let (mut tracker, queue) = tracker(&device);

        let v1 = tracker.signal(&queue).unwrap();
        let err = tracker.wait_until_reached(v1).unwrap_err();
        assert!(matches!(
            err,
            crate::core::error::DirectEcsError::Graphics(GraphicsError::WaitTimeout { value: 1 })
        ));
    }

    #[test]
    fn test_device_lost_propagates() {
        let device = Arc::new(SimDevice::manual());
        let (mut tracker, queue) = tracker(&device);

        device.lose_device();
        assert!(tracker.signal(&queue).unwrap_err().is_device_lost());
        assert!(tracker.is_reached(FenceValue::new(1)).unwrap_err().is_device_lost());
    }
}
