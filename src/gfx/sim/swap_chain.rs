//! 模拟交换链与后缓冲资源

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::device::{SimEvent, SimShared, SimState};
use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{PresentFlags, SwapChain, SwapChainDesc};
use crate::renderer::resource::ResourceState;

/// 最大同步间隔
const MAX_SYNC_INTERVAL: u32 = 4;

#[derive(Debug)]
pub struct SimResourceData {
    id: u64,
    width: u32,
    height: u32,
    /// 按命令记录顺序跟踪的状态
    state: Mutex<ResourceState>,
}

/// 模拟 GPU 资源
///
/// 克隆即增加引用计数，交换链以此判断后缓冲是否仍被持有。
#[derive(Debug, Clone)]
pub struct SimResource(Arc<SimResourceData>);

impl SimResource {
    fn new(id: u64, width: u32, height: u32) -> Self {
        Self(Arc::new(SimResourceData {
            id,
            width,
            height,
            state: Mutex::new(ResourceState::Present),
        }))
    }

    pub(super) fn from_data(data: Arc<SimResourceData>) -> Self {
        Self(data)
    }

    pub(super) fn downgrade(&self) -> Weak<SimResourceData> {
        Arc::downgrade(&self.0)
    }

    pub(super) fn set_recorded_state(&self, state: ResourceState) {
        *self.0.state.lock() = state;
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn size(&self) -> (u32, u32) {
        (self.0.width, self.0.height)
    }

    /// 最后一条已记录屏障之后的状态
    pub fn recorded_state(&self) -> ResourceState {
        *self.0.state.lock()
    }

    /// 当前存活的引用数（包括交换链自身持有的一份）
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

struct SwapChainInner {
    buffers: Vec<SimResource>,
    current: u32,
    width: u32,
    height: u32,
    present_count: u64,
}

/// 模拟交换链
///
/// 呈现顺序为轮转：每次 `present` 后当前索引加一。
pub struct SimSwapChain {
    shared: Arc<SimShared>,
    queue: usize,
    allow_tearing: bool,
    inner: Mutex<SwapChainInner>,
}

impl SimSwapChain {
    pub(super) fn new(
        shared: Arc<SimShared>,
        queue: usize,
        desc: &SwapChainDesc,
        width: u32,
        height: u32,
        state: &mut SimState,
    ) -> Self {
        let buffers = (0..desc.buffer_count)
            .map(|_| SimResource::new(state.next_resource_id(), width, height))
            .collect();

        debug!(width, height, buffer_count = desc.buffer_count, "Simulated swap chain created");

        Self {
            shared,
            queue,
            allow_tearing: desc.allow_tearing,
            inner: Mutex::new(SwapChainInner {
                buffers,
                current: 0,
                width,
                height,
                present_count: 0,
            }),
        }
    }

    /// 已完成的呈现次数
    pub fn present_count(&self) -> u64 {
        self.inner.lock().present_count
    }

    /// 后缓冲尺寸
    pub fn size(&self) -> (u32, u32) {
        let inner = self.inner.lock();
        (inner.width, inner.height)
    }

    pub fn buffer_count(&self) -> u32 {
        self.inner.lock().buffers.len() as u32
    }
}

fn swap_chain_error(message: String) -> crate::core::error::DirectEcsError {
    GraphicsError::SwapchainError(message).into()
}

impl SwapChain for SimSwapChain {
    type Resource = SimResource;

    fn back_buffer(&self, index: u32) -> Result<SimResource> {
        let inner = self.inner.lock();
        inner
            .buffers
            .get(index as usize)
            .cloned()
            .ok_or_else(|| swap_chain_error(format!("back buffer {} does not exist", index)))
    }

    fn current_back_buffer_index(&self) -> u32 {
        self.inner.lock().current
    }

    fn present(&self, sync_interval: u32, flags: PresentFlags) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.check_alive()?;

        if flags.contains(PresentFlags::ALLOW_TEARING) {
            if !self.allow_tearing {
                return Err(GraphicsError::PresentFailed(
                    "tearing requested on a swap chain created without it".to_string(),
                )
                .into());
            }
            if sync_interval != 0 {
                return Err(GraphicsError::PresentFailed(
                    "tearing requires a sync interval of 0".to_string(),
                )
                .into());
            }
        }
        if sync_interval > MAX_SYNC_INTERVAL {
            return Err(GraphicsError::PresentFailed(format!("invalid sync interval {}", sync_interval)).into());
        }

        let mut inner = self.inner.lock();
        let buffer = inner.current;
        let resource_state = inner.buffers[buffer as usize].recorded_state();
        if resource_state != ResourceState::Present {
            return Err(GraphicsError::PresentFailed(format!(
                "back buffer {} presented in {:?} state",
                buffer, resource_state
            ))
            .into());
        }

        inner.current = (buffer + 1) % inner.buffers.len() as u32;
        inner.present_count += 1;
        state.push_event(SimEvent::Presented {
            buffer,
            sync_interval,
            flags,
        });

        Ok(())
    }

    fn resize_buffers(&self, buffer_count: u32, width: u32, height: u32) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.check_alive()?;

        if width == 0 || height == 0 {
            return Err(swap_chain_error(format!("cannot resize back buffers to {}x{}", width, height)));
        }
        if state.queue_has_pending(self.queue) {
            return Err(swap_chain_error(
                "back buffers resized while the presenting queue still has work in flight".to_string(),
            ));
        }

        let mut inner = self.inner.lock();
        if let Some(held) = inner.buffers.iter().position(|b| b.ref_count() > 1) {
            return Err(swap_chain_error(format!(
                "back buffer {} is still referenced during resize",
                held
            )));
        }

        inner.buffers = (0..buffer_count)
            .map(|_| SimResource::new(state.next_resource_id(), width, height))
            .collect();
        inner.current = 0;
        inner.width = width;
        inner.height = height;
        state.push_event(SimEvent::BackBuffersResized { width, height });

        Ok(())
    }
}
