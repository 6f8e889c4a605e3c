//! 帧呈现环
//!
//! 持有交换链、固定数量的后缓冲及其 RTV，驱动每帧的
//! `begin_frame` / `end_frame` 协议：
//!
//! 1. `begin_frame`：等待当前后缓冲上一次使用的 Fence 值到达，
//!    记录 Present -> RenderTarget 转换并清屏
//! 2. 调用方通过 `recording_context_mut` 记录额外的绘制命令
//! 3. `end_frame`：记录 RenderTarget -> Present 转换，提交，
//!    把返回的 Fence 值记到当前后缓冲上，呈现，然后从交换链读取新的当前索引
//!
//! 这样在途的帧数不会超过后缓冲数量。

use std::sync::Arc;

use tracing::{debug, info, info_span, trace};

use crate::core::clock::FpsCounter;
use crate::core::error::{DirectEcsError, GraphicsError, Result};
use crate::gfx::backend::{GpuDevice, PresentFlags, SwapChain, SwapChainDesc, WindowHost};
use crate::renderer::command::{QueueType, RecordingContext};
use crate::renderer::descriptor::RenderTargetViews;
use crate::renderer::queue::{CommandQueue, CommandQueues};
use crate::renderer::resource::{BackBuffer, ResourceState};
use crate::renderer::sync::FenceValue;

/// 后缓冲数量
pub const BUFFER_COUNT: u32 = 2;

/// 呈现参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentPolicy {
    pub sync_interval: u32,
    pub flags: PresentFlags,
}

impl PresentPolicy {
    /// 由垂直同步开关和撕裂支持推导
    pub fn derive(vsync: bool, tearing_supported: bool) -> Self {
        if vsync {
            Self {
                sync_interval: 1,
                flags: PresentFlags::empty(),
            }
        } else if tearing_supported {
            Self {
                sync_interval: 0,
                flags: PresentFlags::ALLOW_TEARING,
            }
        } else {
            Self {
                sync_interval: 0,
                flags: PresentFlags::empty(),
            }
        }
    }
}

fn protocol_error(message: &str) -> DirectEcsError {
    DirectEcsError::Runtime(message.to_string())
}

fn require_graphics<D: GpuDevice>(queue: &CommandQueue<D>) -> Result<()> {
    if queue.queue_type() != QueueType::Graphics {
        return Err(GraphicsError::SwapchainError(format!(
            "swap chain requires the graphics queue, got {}",
            queue.queue_type().name()
        ))
        .into());
    }
    Ok(())
}

/// 帧呈现环
pub struct FramePresentationRing<D: GpuDevice> {
    device: Arc<D>,
    swap_chain: D::SwapChain,
    rtvs: RenderTargetViews<D>,
    back_buffers: Vec<BackBuffer<D::Resource>>,
    current: u32,
    width: u32,
    height: u32,
    fullscreen: bool,
    vsync: bool,
    tearing_supported: bool,
    policy: PresentPolicy,
    clear_color: [f32; 4],
    /// 当前帧的记录上下文，`begin_frame` 与 `end_frame` 之间存在
    frame: Option<RecordingContext<D>>,
    fps: FpsCounter,
    frames_presented: u64,
}

impl<D: GpuDevice> FramePresentationRing<D> {
    /// 在图形队列上为窗口创建交换链和后缓冲
    pub fn new(
        device: Arc<D>,
        graphics: &CommandQueue<D>,
        window: &dyn WindowHost,
        vsync: bool,
        clear_color: [f32; 4],
    ) -> Result<Self> {
        require_graphics(graphics)?;

        let (width, height) = window.client_size();
        let (width, height) = (width.max(1), height.max(1));
        let tearing_supported = device.is_tearing_supported();

        let desc = SwapChainDesc {
            width,
            height,
            buffer_count: BUFFER_COUNT,
            allow_tearing: tearing_supported,
        };
        let swap_chain = device.create_swap_chain(graphics.native(), window, &desc)?;
        let rtvs = RenderTargetViews::new(device.as_ref(), BUFFER_COUNT)?;

        let back_buffers = rtvs
            .update(device.as_ref(), &swap_chain)?
            .into_iter()
            .enumerate()
            .map(|(index, (resource, rtv))| BackBuffer::new(index as u32, resource, rtv))
            .collect();
        let current = swap_chain.current_back_buffer_index();
        let policy = PresentPolicy::derive(vsync, tearing_supported);

        info!(
            width,
            height,
            buffers = BUFFER_COUNT,
            vsync,
            tearing = tearing_supported,
            "Frame presentation ring created"
        );

        Ok(Self {
            device,
            swap_chain,
            rtvs,
            back_buffers,
            current,
            width,
            height,
            fullscreen: false,
            vsync,
            tearing_supported,
            policy,
            clear_color,
            frame: None,
            fps: FpsCounter::new(),
            frames_presented: 0,
        })
    }

    /// 本帧要渲染的后缓冲
    pub fn current_back_buffer(&self) -> &BackBuffer<D::Resource> {
        &self.back_buffers[self.current as usize]
    }

    pub fn current_index(&self) -> u32 {
        self.current
    }

    pub fn back_buffers(&self) -> &[BackBuffer<D::Resource>] {
        &self.back_buffers
    }

    /// 开始一帧
    ///
    /// 阻塞直到当前后缓冲上一次记录的 Fence 值到达；从未使用过的缓冲不等待。
    pub fn begin_frame(&mut self, queue: &mut CommandQueue<D>) -> Result<()> {
        require_graphics(queue)?;
        if self.frame.is_some() {
            return Err(protocol_error("begin_frame called while a frame is already recording"));
        }

        let index = self.current as usize;
        let buffer = &self.back_buffers[index];
        if buffer.state() != ResourceState::Present {
            return Err(protocol_error("current back buffer is not in the Present state"));
        }
        if buffer.resource().is_none() {
            return Err(protocol_error("back buffer resource has been released"));
        }

        let fence_value = buffer.fence_value();
        if fence_value > FenceValue::ZERO {
            queue.wait_for_fence_value(fence_value)?;
        }

        let mut context = queue.get_recording_context()?;
        let buffer = &mut self.back_buffers[index];
        let resource = buffer
            .resource()
            .ok_or_else(|| protocol_error("back buffer resource has been released"))?;

        context.transition(resource, ResourceState::Present, ResourceState::RenderTarget);
        context.clear_render_target(buffer.rtv(), self.clear_color);
        buffer.set_state(ResourceState::RenderTarget);

        trace!(buffer = index, waited_for = fence_value.value(), "Frame begun");
        self.frame = Some(context);
        Ok(())
    }

    /// 当前帧的记录上下文
    pub fn recording_context_mut(&mut self) -> Option<&mut RecordingContext<D>> {
        self.frame.as_mut()
    }

    pub fn is_recording(&self) -> bool {
        self.frame.is_some()
    }

    /// 结束一帧并呈现，返回本帧提交的 Fence 值
    pub fn end_frame(&mut self, queue: &mut CommandQueue<D>) -> Result<FenceValue> {
        require_graphics(queue)?;
        if self.frame.is_none() {
            return Err(protocol_error("end_frame called without begin_frame"));
        }

        let index = self.current as usize;
        let buffer = &mut self.back_buffers[index];
        let resource = buffer
            .resource()
            .ok_or_else(|| protocol_error("back buffer resource has been released"))?;
        let mut context = self
            .frame
            .take()
            .ok_or_else(|| protocol_error("end_frame called without begin_frame"))?;
        context.transition(resource, ResourceState::RenderTarget, ResourceState::Present);
        buffer.set_state(ResourceState::Present);

        let fence_value = queue.execute_command_list(context)?;
        buffer.mark_in_use(fence_value);

        self.swap_chain.present(self.policy.sync_interval, self.policy.flags)?;
        self.current = self.swap_chain.current_back_buffer_index();
        self.frames_presented += 1;

        trace!(
            buffer = index,
            fence = fence_value.value(),
            next = self.current,
            "Frame presented"
        );
        Ok(fence_value)
    }

    /// 调整后缓冲尺寸
    ///
    /// 先刷新所有队列，再释放后缓冲引用、调整交换链并重建 RTV。
    /// 0 尺寸按 1 处理；尺寸不变时什么都不做。
    pub fn resize(&mut self, queues: &mut CommandQueues<D>, width: u32, height: u32) -> Result<()> {
        if self.frame.is_some() {
            return Err(protocol_error("resize requested while a frame is recording"));
        }

        let (width, height) = (width.max(1), height.max(1));
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }

        let _span = info_span!("resize", width, height).entered();

        queues.flush_all()?;

        let fence_value = self.current_back_buffer().fence_value();
        for buffer in &mut self.back_buffers {
            drop(buffer.release());
        }

        self.swap_chain.resize_buffers(BUFFER_COUNT, width, height)?;
        self.current = self.swap_chain.current_back_buffer_index();

        let views = self.rtvs.update(self.device.as_ref(), &self.swap_chain)?;
        for (buffer, (resource, rtv)) in self.back_buffers.iter_mut().zip(views) {
            buffer.rebind(resource, rtv, fence_value);
        }

        self.width = width;
        self.height = height;
        debug!(current = self.current, "Back buffers recreated");
        Ok(())
    }

    /// 切换全屏，并按新的客户区尺寸调整后缓冲
    pub fn toggle_fullscreen(&mut self, window: &mut dyn WindowHost, queues: &mut CommandQueues<D>) -> Result<()> {
        if self.frame.is_some() {
            return Err(protocol_error("fullscreen toggled while a frame is recording"));
        }

        self.fullscreen = !self.fullscreen;
        window.set_fullscreen(self.fullscreen);
        info!(fullscreen = self.fullscreen, "Fullscreen toggled");

        let (width, height) = window.client_size();
        self.resize(queues, width, height)
    }

    /// 开关垂直同步，重新推导呈现参数
    pub fn set_vsync(&mut self, vsync: bool) {
        self.vsync = vsync;
        self.policy = PresentPolicy::derive(vsync, self.tearing_supported);
        info!(vsync, sync_interval = self.policy.sync_interval, "VSync changed");
    }

    pub fn vsync(&self) -> bool {
        self.vsync
    }

    pub fn policy(&self) -> PresentPolicy {
        self.policy
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// 记录一帧耗时，每跨过 1 秒返回一次帧率
    pub fn account_frame_time(&mut self, delta_seconds: f64) -> Option<f64> {
        self.fps.record(delta_seconds)
    }

    pub fn fps(&self) -> Option<f64> {
        self.fps.last_fps()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn swap_chain(&self) -> &D::SwapChain {
        &self.swap_chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::sim::{HeadlessWindow, SimDevice, SimDeviceDesc, SimEvent};
    use std::thread;
    use std::time::Duration;

    const CLEAR: [f32; 4] = [0.4, 0.6, 0.9, 1.0];

    fn setup(device: SimDevice, window: &HeadlessWindow) -> (Arc<SimDevice>, CommandQueues<SimDevice>, FramePresentationRing<SimDevice>) {
        let device = Arc::new(device);
        let queues = CommandQueues::new(Arc::clone(&device), Some(Duration::from_secs(5))).unwrap();
        let ring = FramePresentationRing::new(Arc::clone(&device), queues.graphics(), window, true, CLEAR).unwrap();
        (device, queues, ring)
    }

    fn timed() -> SimDevice {
        SimDevice::new(SimDeviceDesc::timed(Duration::from_millis(1))).unwrap()
    }

    fn frame(ring: &mut FramePresentationRing<SimDevice>, queues: &mut CommandQueues<SimDevice>) -> FenceValue {
        ring.begin_frame(queues.graphics_mut()).unwrap();
        ring.end_frame(queues.graphics_mut()).unwrap()
    }

    #[test]
    fn test_present_policy_derivation() {
        assert_eq!(PresentPolicy::derive(true, true), PresentPolicy { sync_interval: 1, flags: PresentFlags::empty() });
        assert_eq!(PresentPolicy::derive(true, false), PresentPolicy { sync_interval: 1, flags: PresentFlags::empty() });
        assert_eq!(
            PresentPolicy::derive(false, true),
            PresentPolicy { sync_interval: 0, flags: PresentFlags::ALLOW_TEARING }
        );
        assert_eq!(PresentPolicy::derive(false, false), PresentPolicy { sync_interval: 0, flags: PresentFlags::empty() });
    }

    #[test]
    fn test_index_changes_after_end_frame() {
        let window = HeadlessWindow::new(640, 480);
        let (_device, mut queues, mut ring) = setup(timed(), &window);

        let before = ring.current_index();
        let value = frame(&mut ring, &mut queues);
        let after = ring.current_index();

        assert_ne!(before, after);
        assert!(after < BUFFER_COUNT);
        assert_eq!(ring.back_buffers()[before as usize].fence_value(), value);
        assert_eq!(ring.current_back_buffer().index(), after);
    }

    #[test]
    fn test_begin_frame_waits_for_buffer_fence() {
        let window = HeadlessWindow::new(640, 480);
        let (device, mut queues, mut ring) = setup(SimDevice::manual(), &window);

        // 前两帧没有需要等待的值
        let first = frame(&mut ring, &mut queues);
        frame(&mut ring, &mut queues);
        assert!(!device
            .events()
            .iter()
            .any(|e| matches!(e, SimEvent::CpuWaitSatisfied { .. })));

        let gpu = Arc::clone(&device);
        let helper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            gpu.retire_until_signal(QueueType::Graphics)
        });

        // 第三帧回到第一个缓冲，必须等第一帧的 Fence
        ring.begin_frame(queues.graphics_mut()).unwrap();
        assert_eq!(helper.join().unwrap(), Some(first.value()));

        let events = device.events();
        let completed = events
            .iter()
            .position(|e| matches!(e, SimEvent::FenceCompleted { value, .. } if *value == first.value()))
            .unwrap();
        let waited = events
            .iter()
            .position(|e| matches!(e, SimEvent::CpuWaitSatisfied { value, .. } if *value == first.value()))
            .unwrap();
        assert!(completed < waited);

        // 帧 2 仍在途
        assert!(!queues.graphics().is_fence_reached(first.next()).unwrap());
    }

    #[test]
    fn test_frame_protocol_guards() {
        let window = HeadlessWindow::new(640, 480);
        let (_device, mut queues, mut ring) = setup(timed(), &window);

        assert!(ring.end_frame(queues.graphics_mut()).is_err());

        ring.begin_frame(queues.graphics_mut()).unwrap();
        assert!(ring.is_recording());
        assert!(ring.recording_context_mut().is_some());
        assert!(ring.begin_frame(queues.graphics_mut()).is_err());
        assert!(ring.resize(&mut queues, 320, 240).is_err());

        ring.end_frame(queues.graphics_mut()).unwrap();
        assert!(!ring.is_recording());
    }

    #[test]
    fn test_frames_require_graphics_queue() {
        let window = HeadlessWindow::new(640, 480);
        let (_device, mut queues, mut ring) = setup(timed(), &window);

        let err = ring.begin_frame(queues.get_mut(QueueType::Compute)).unwrap_err();
        assert!(err.to_string().contains("Compute"));
        assert!(!ring.is_recording());

        ring.begin_frame(queues.graphics_mut()).unwrap();
        assert!(ring.end_frame(queues.get_mut(QueueType::Copy)).is_err());
        // 帧仍在记录，可以在图形队列上正常结束
        assert!(ring.is_recording());
        ring.end_frame(queues.graphics_mut()).unwrap();
        assert_eq!(ring.frames_presented(), 1);
    }

    #[test]
    fn test_released_buffer_fails_before_acquiring_allocator() {
        let window = HeadlessWindow::new(640, 480);
        let (device, mut queues, mut ring) = setup(timed(), &window);

        let current = ring.current_index() as usize;
        drop(ring.back_buffers[current].release());
        let allocators = device.allocator_count();

        assert!(ring.begin_frame(queues.graphics_mut()).is_err());
        assert!(!ring.is_recording());
        assert_eq!(device.allocator_count(), allocators);
    }

    #[test]
    fn test_clear_recorded_after_transition() {
        let window = HeadlessWindow::new(640, 480);
        let (device, mut queues, mut ring) = setup(timed(), &window);

        frame(&mut ring, &mut queues);
        queues.flush_all().unwrap();

        let executed = device
            .events()
            .into_iter()
            .find_map(|e| match e {
                SimEvent::Executed { queue: QueueType::Graphics, commands } if !commands.is_empty() => Some(commands),
                _ => None,
            })
            .unwrap();

        assert_eq!(executed.len(), 3);
        assert!(matches!(
            executed[0],
            crate::gfx::sim::SimCommand::Barrier { before: ResourceState::Present, after: ResourceState::RenderTarget, .. }
        ));
        assert!(matches!(executed[1], crate::gfx::sim::SimCommand::ClearRenderTarget { color, .. } if color == CLEAR));
        assert!(matches!(
            executed[2],
            crate::gfx::sim::SimCommand::Barrier { before: ResourceState::RenderTarget, after: ResourceState::Present, .. }
        ));
    }

    #[test]
    fn test_resize_flushes_before_releasing_buffers() {
        let window = HeadlessWindow::new(640, 480);
        let (device, mut queues, mut ring) = setup(timed(), &window);

        let last = frame(&mut ring, &mut queues);
        device.clear_events();

        ring.resize(&mut queues, 800, 600).unwrap();
        assert_eq!(ring.size(), (800, 600));
        assert_eq!(ring.swap_chain().size(), (800, 600));

        let events = device.events();
        let resized = events
            .iter()
            .position(|e| matches!(e, SimEvent::BackBuffersResized { width: 800, height: 600 }))
            .unwrap();
        let flush_value = queues.graphics().last_signaled().value();
        let flushed = events
            .iter()
            .position(|e| {
                matches!(e, SimEvent::FenceCompleted { queue: QueueType::Graphics, value, .. } if *value == flush_value)
            })
            .unwrap();
        assert!(flushed < resized);
        assert!(queues.graphics().is_fence_reached(last).unwrap());

        // 所有缓冲回到 Present，Fence 值都已到达
        for buffer in ring.back_buffers() {
            assert_eq!(buffer.state(), ResourceState::Present);
            assert!(queues.graphics().is_fence_reached(buffer.fence_value()).unwrap());
            assert_eq!(buffer.resource().map(|r| r.size()), Some((800, 600)));
        }

        frame(&mut ring, &mut queues);
    }

    #[test]
    fn test_resize_same_size_is_idempotent() {
        let window = HeadlessWindow::new(640, 480);
        let (device, mut queues, mut ring) = setup(timed(), &window);

        frame(&mut ring, &mut queues);
        ring.resize(&mut queues, 1024, 768).unwrap();
        let ids: Vec<u64> = ring.back_buffers().iter().filter_map(|b| b.resource().map(|r| r.id())).collect();
        let index = ring.current_index();
        device.clear_events();

        ring.resize(&mut queues, 1024, 768).unwrap();

        assert!(device.events().is_empty());
        let ids_after: Vec<u64> = ring.back_buffers().iter().filter_map(|b| b.resource().map(|r| r.id())).collect();
        assert_eq!(ids, ids_after);
        assert_eq!(ring.current_index(), index);
        // 交换链与后缓冲各持有一份引用
        for buffer in ring.back_buffers() {
            assert_eq!(buffer.resource().map(|r| r.ref_count()), Some(2));
        }
    }

    #[test]
    fn test_zero_size_is_clamped() {
        let window = HeadlessWindow::new(640, 480);
        let (_device, mut queues, mut ring) = setup(timed(), &window);

        ring.resize(&mut queues, 0, 0).unwrap();
        assert_eq!(ring.size(), (1, 1));
        frame(&mut ring, &mut queues);
    }

    #[test]
    fn test_toggle_fullscreen_resizes_to_display() {
        let mut window = HeadlessWindow::new(640, 480).with_display_size(1920, 1080);
        let (_device, mut queues, mut ring) = setup(timed(), &window);

        ring.toggle_fullscreen(&mut window, &mut queues).unwrap();
        assert!(ring.is_fullscreen());
        assert!(window.is_fullscreen());
        assert_eq!(ring.size(), (1920, 1080));
        frame(&mut ring, &mut queues);

        ring.toggle_fullscreen(&mut window, &mut queues).unwrap();
        assert!(!ring.is_fullscreen());
        assert_eq!(ring.size(), (640, 480));
    }

    #[test]
    fn test_vsync_toggle_changes_present_flags() {
        let window = HeadlessWindow::new(640, 480);
        let (device, mut queues, mut ring) = setup(timed(), &window);

        ring.set_vsync(false);
        frame(&mut ring, &mut queues);

        let presented = device
            .events()
            .into_iter()
            .find_map(|e| match e {
                SimEvent::Presented { sync_interval, flags, .. } => Some((sync_interval, flags)),
                _ => None,
            })
            .unwrap();
        assert_eq!(presented, (0, PresentFlags::ALLOW_TEARING));
    }

    #[test]
    fn test_no_tearing_without_support() {
        let window = HeadlessWindow::new(640, 480);
        let device = SimDevice::new(SimDeviceDesc::timed(Duration::from_millis(1)).with_tearing(false)).unwrap();
        let (_device, mut queues, mut ring) = setup(device, &window);

        ring.set_vsync(false);
        assert_eq!(ring.policy(), PresentPolicy { sync_interval: 0, flags: PresentFlags::empty() });
        frame(&mut ring, &mut queues);
    }

    #[test]
    fn test_device_lost_is_fatal() {
        let window = HeadlessWindow::new(640, 480);
        let (device, mut queues, mut ring) = setup(timed(), &window);

        frame(&mut ring, &mut queues);
        device.lose_device();

        let err = ring.begin_frame(queues.graphics_mut()).unwrap_err();
        assert!(err.is_device_lost());
    }
}
