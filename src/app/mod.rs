//! 应用程序
//!
//! `Application` 是显式构造的应用上下文：持有三个命令队列、帧呈现环和
//! 每帧更新的系统，由平台层在启动时创建并传给消息循环。
//!
//! - `init`：创建队列与交换链，重复调用只记录警告
//! - `handle_event`：处理一个平台事件，`Redraw` 驱动一帧
//! - `flush` / `shutdown`：排空所有队列，释放 GPU 对象

pub mod system;
pub mod platform;

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::core::clock::Clock;
use crate::core::config::Config;
use crate::core::error::{DirectEcsError, Result};
use crate::core::event::{LoopControl, PlatformEvent};
use crate::gfx::backend::{GpuDevice, WindowHost};
use crate::renderer::present::FramePresentationRing;
use crate::renderer::queue::CommandQueues;

pub use platform::exec;
pub use system::{System, SystemSet};

struct AppState<D: GpuDevice> {
    device: Arc<D>,
    // 先于队列释放
    ring: FramePresentationRing<D>,
    queues: CommandQueues<D>,
}

pub struct Application<D: GpuDevice> {
    state: Option<AppState<D>>,
    systems: SystemSet,
    clock: Clock,
    max_frames: u64,
    frame_count: u64,
}

impl<D: GpuDevice> Application<D> {
    pub fn new() -> Self {
        Self {
            state: None,
            systems: SystemSet::new(),
            clock: Clock::new(),
            max_frames: 0,
            frame_count: 0,
        }
    }

    /// 创建命令队列和帧呈现环
    pub fn init(&mut self, device: Arc<D>, window: &dyn WindowHost, config: &Config) -> Result<()> {
        if self.state.is_some() {
            warn!("Application is already initialized");
            return Ok(());
        }

        let queues = CommandQueues::new(Arc::clone(&device), config.graphics.fence_timeout())?;
        let ring = FramePresentationRing::new(
            Arc::clone(&device),
            queues.graphics(),
            window,
            config.graphics.vsync,
            config.graphics.clear_color,
        )?;

        info!(backend = device.backend_name(), "Application initialized");

        self.state = Some(AppState { device, ring, queues });
        self.max_frames = config.app.max_frames;
        self.clock.reset();
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    pub fn add_system(&mut self, system: Box<dyn System>) {
        debug!(system = system.name(), "System registered");
        self.systems.add(system);
    }

    pub fn systems_mut(&mut self) -> &mut SystemSet {
        &mut self.systems
    }

    fn state_mut(&mut self) -> Result<&mut AppState<D>> {
        self.state
            .as_mut()
            .ok_or_else(|| DirectEcsError::Initialization("Application is not initialized".to_string()))
    }

    /// 执行一帧：更新系统，然后开始、结束并呈现
    pub fn tick(&mut self) -> Result<()> {
        let delta = self.clock.tick().as_secs_f64();
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| DirectEcsError::Initialization("Application is not initialized".to_string()))?;

        self.systems.update(delta);

        state.ring.begin_frame(state.queues.graphics_mut())?;
        let fence_value = state.ring.end_frame(state.queues.graphics_mut())?;
        self.frame_count += 1;

        trace!(frame = self.frame_count, fence = fence_value.value(), "Frame complete");

        if let Some(fps) = state.ring.account_frame_time(delta) {
            info!(fps = format!("{:.1}", fps), frames = self.frame_count, "FPS");
        }
        Ok(())
    }

    /// 处理一个平台事件
    pub fn handle_event(&mut self, event: PlatformEvent, window: &mut dyn WindowHost) -> Result<LoopControl> {
        match event {
            PlatformEvent::Redraw => {
                self.tick()?;
                if self.max_frames > 0 && self.frame_count >= self.max_frames {
                    info!(frames = self.frame_count, "Frame limit reached");
                    return Ok(LoopControl::Exit);
                }
            }
            PlatformEvent::Resized { width, height } => {
                debug!(event = %event, "Window resized");
                let state = self.state_mut()?;
                state.ring.resize(&mut state.queues, width, height)?;
            }
            PlatformEvent::ToggleFullscreen => {
                let state = self.state_mut()?;
                state.ring.toggle_fullscreen(window, &mut state.queues)?;
            }
            PlatformEvent::ToggleVsync => {
                let state = self.state_mut()?;
                let vsync = !state.ring.vsync();
                state.ring.set_vsync(vsync);
            }
            PlatformEvent::CloseRequested => {
                info!("Close requested, shutting down...");
                return Ok(LoopControl::Exit);
            }
        }
        Ok(LoopControl::Continue)
    }

    /// 排空图形、计算、拷贝队列
    pub fn flush(&mut self) -> Result<()> {
        match self.state.as_mut() {
            Some(state) => state.queues.flush_all(),
            None => Ok(()),
        }
    }

    /// 排空队列并释放所有 GPU 对象
    pub fn shutdown(&mut self) -> Result<()> {
        if self.state.is_none() {
            return Ok(());
        }
        let flushed = self.flush();
        if let Some(state) = self.state.take() {
            info!(
                backend = state.device.backend_name(),
                frames = self.frame_count,
                "Application shut down"
            );
        }
        flushed
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn queues(&self) -> Option<&CommandQueues<D>> {
        self.state.as_ref().map(|s| &s.queues)
    }

    pub fn ring(&self) -> Option<&FramePresentationRing<D>> {
        self.state.as_ref().map(|s| &s.ring)
    }
}

impl<D: GpuDevice> Default for Application<D> {
    fn default() -> Self {
        Self::new()
    }
}
