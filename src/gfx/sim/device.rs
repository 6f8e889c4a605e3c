//! 模拟 GPU 设备
//!
//! 每个队列维护一个待执行的 GPU 操作 FIFO（执行命令列表、写 Fence、等待 Fence）。
//! GPU 进度要么由调用方手动推进（`retire_next` / `retire_until_signal` / `retire_all`），
//! 要么由后台线程按固定延迟推进。
//!
//! 设备会像 D3D12 调试层一样检查调用约束，违反时返回错误：
//! - 分配器在其记录的工作完成前被重置
//! - 同一分配器上同时打开两个命令列表
//! - 执行未关闭的命令列表
//! - 转换屏障的 before 状态与资源当前状态不符

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use super::swap_chain::{SimResource, SimResourceData, SimSwapChain};
use crate::core::error::{DirectEcsError, GraphicsError, Result};
use crate::gfx::backend::{CpuDescriptor, GpuDevice, PresentFlags, SwapChainDesc, WindowHost};
use crate::renderer::command::QueueType;
use crate::renderer::resource::ResourceState;

/// RTV 描述符大小
const RTV_INCREMENT: usize = 32;

/// GPU 进度的推进方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimClock {
    /// 只在调用 `retire_*` 时推进
    Manual,
    /// 后台线程每隔固定时间完成所有可执行的工作
    Timed(Duration),
}

/// 模拟设备描述
#[derive(Debug, Clone, Copy)]
pub struct SimDeviceDesc {
    pub clock: SimClock,
    pub tearing_supported: bool,
    /// 是否记录 `SimEvent`，关闭后 `events()` 始终为空
    pub event_log: bool,
}

impl SimDeviceDesc {
    pub fn manual() -> Self {
        Self {
            clock: SimClock::Manual,
            tearing_supported: true,
            event_log: true,
        }
    }

    pub fn timed(latency: Duration) -> Self {
        Self {
            clock: SimClock::Timed(latency),
            tearing_supported: true,
            event_log: true,
        }
    }

    pub fn with_tearing(mut self, supported: bool) -> Self {
        self.tearing_supported = supported;
        self
    }

    pub fn with_event_log(mut self, enabled: bool) -> Self {
        self.event_log = enabled;
        self
    }
}

/// 记录到命令列表中的命令
#[derive(Debug, Clone, PartialEq)]
pub enum SimCommand {
    Barrier {
        resource: u64,
        before: ResourceState,
        after: ResourceState,
    },
    ClearRenderTarget {
        resource: u64,
        color: [f32; 4],
    },
}

/// 设备事件日志
///
/// 按发生顺序记录 CPU 调用和 GPU 完成情况。
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    /// CPU 提交了命令列表
    Submitted { queue: QueueType, commands: usize },
    /// CPU 在队列上插入了 Fence 写入
    Signaled { queue: QueueType, fence: usize, value: u64 },
    /// GPU 执行完一个命令列表
    Executed { queue: QueueType, commands: Vec<SimCommand> },
    /// GPU 写入了 Fence
    FenceCompleted { queue: QueueType, fence: usize, value: u64 },
    /// 队列上的 GPU 侧等待已满足
    QueueWaitSatisfied { queue: QueueType, fence: usize, value: u64 },
    /// CPU 阻塞等待返回
    CpuWaitSatisfied { fence: usize, value: u64 },
    /// 分配器被重置
    AllocatorReset { allocator: usize },
    /// 后缓冲被呈现
    Presented {
        buffer: u32,
        sync_interval: u32,
        flags: PresentFlags,
    },
    /// 交换链后缓冲被重建
    BackBuffersResized { width: u32, height: u32 },
    /// 设备丢失
    DeviceLost,
}

enum GpuOp {
    Execute { allocator: usize, commands: Vec<SimCommand> },
    Signal { fence: usize, value: u64 },
    Wait { fence: usize, value: u64 },
}

struct QueueState {
    queue_type: QueueType,
    pending: VecDeque<GpuOp>,
}

struct AllocatorState {
    queue_type: QueueType,
    in_flight: usize,
    open_list: Option<usize>,
}

struct ListState {
    queue_type: QueueType,
    allocator: usize,
    recording: bool,
    commands: Vec<SimCommand>,
    error: Option<String>,
}

impl ListState {
    fn record_error(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(message);
        }
    }
}

pub(super) struct SimState {
    queues: Vec<QueueState>,
    fences: Vec<u64>,
    allocators: Vec<AllocatorState>,
    lists: Vec<ListState>,
    rtvs: HashMap<usize, Weak<SimResourceData>>,
    next_descriptor: usize,
    next_resource_id: u64,
    allocator_resets: u64,
    lost: bool,
    shutdown: bool,
    log: Option<Vec<SimEvent>>,
}

impl SimState {
    fn new(event_log: bool) -> Self {
        Self {
            queues: Vec::new(),
            fences: Vec::new(),
            allocators: Vec::new(),
            lists: Vec::new(),
            rtvs: HashMap::new(),
            next_descriptor: 0x1000,
            next_resource_id: 1,
            allocator_resets: 0,
            lost: false,
            shutdown: false,
            log: event_log.then(Vec::new),
        }
    }

    pub(super) fn check_alive(&self) -> Result<()> {
        if self.lost {
            Err(GraphicsError::DeviceLost("simulated device was removed".to_string()).into())
        } else {
            Ok(())
        }
    }

    pub(super) fn next_resource_id(&mut self) -> u64 {
        let id = self.next_resource_id;
        self.next_resource_id += 1;
        id
    }

    pub(super) fn queue_has_pending(&self, queue: usize) -> bool {
        self.queues.get(queue).map_or(false, |q| !q.pending.is_empty())
    }

    pub(super) fn push_event(&mut self, event: SimEvent) {
        if let Some(log) = self.log.as_mut() {
            log.push(event);
        }
    }

    fn has_pending(&self) -> bool {
        self.queues.iter().any(|q| !q.pending.is_empty())
    }

    fn queue_index(&self, queue_type: QueueType) -> Option<usize> {
        self.queues.iter().position(|q| q.queue_type == queue_type)
    }

    /// 完成队列头部的一个操作，头部是未满足的等待时返回 `None`
    fn retire_one(&mut self, queue: usize) -> Option<RetiredOp> {
        if let Some(GpuOp::Wait { fence, value }) = self.queues[queue].pending.front() {
            if self.fences[*fence] < *value {
                return None;
            }
        }

        let op = self.queues[queue].pending.pop_front()?;
        let queue_type = self.queues[queue].queue_type;

        let retired = match op {
            GpuOp::Execute { allocator, commands } => {
                let state = &mut self.allocators[allocator];
                state.in_flight = state.in_flight.saturating_sub(1);
                self.push_event(SimEvent::Executed { queue: queue_type, commands });
                RetiredOp::Executed
            }
            GpuOp::Signal { fence, value } => {
                self.fences[fence] = self.fences[fence].max(value);
                self.push_event(SimEvent::FenceCompleted { queue: queue_type, fence, value });
                RetiredOp::Signaled(value)
            }
            GpuOp::Wait { fence, value } => {
                self.push_event(SimEvent::QueueWaitSatisfied { queue: queue_type, fence, value });
                RetiredOp::Waited
            }
        };

        Some(retired)
    }

    /// 完成所有当前可执行的操作
    fn retire_ready(&mut self) -> usize {
        let mut retired = 0;
        loop {
            let mut progressed = false;
            for queue in 0..self.queues.len() {
                while self.retire_one(queue).is_some() {
                    retired += 1;
                    progressed = true;
                }
            }
            if !progressed {
                return retired;
            }
        }
    }
}

enum RetiredOp {
    Executed,
    Signaled(u64),
    Waited,
}

pub(super) struct SimShared {
    pub(super) state: Mutex<SimState>,
    /// Fence 推进时通知
    progress: Condvar,
    /// 有新工作入队时通知
    work: Condvar,
}

/// 模拟图形设备
pub struct SimDevice {
    shared: Arc<SimShared>,
    desc: SimDeviceDesc,
    worker: Option<JoinHandle<()>>,
}

/// 模拟命令队列
#[derive(Debug)]
pub struct SimQueue {
    id: usize,
    queue_type: QueueType,
}

impl SimQueue {
    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }
}

/// 模拟 Fence
#[derive(Debug)]
pub struct SimFence {
    id: usize,
}

impl SimFence {
    pub fn id(&self) -> usize {
        self.id
    }
}

/// 模拟命令分配器
#[derive(Debug, Clone)]
pub struct SimAllocator {
    id: usize,
    queue_type: QueueType,
}

impl SimAllocator {
    pub fn id(&self) -> usize {
        self.id
    }
}

/// 模拟命令列表
#[derive(Debug)]
pub struct SimCommandList {
    id: usize,
    queue_type: QueueType,
}

/// 模拟 RTV 描述符堆
#[derive(Debug)]
pub struct SimDescriptorHeap {
    base: usize,
    count: u32,
}

impl SimDescriptorHeap {
    pub fn count(&self) -> u32 {
        self.count
    }
}

impl SimDevice {
    /// 创建模拟设备
    ///
    /// `SimClock::Timed` 会启动一个后台线程扮演 GPU。
    pub fn new(desc: SimDeviceDesc) -> Result<Self> {
        let shared = Arc::new(SimShared {
            state: Mutex::new(SimState::new(desc.event_log)),
            progress: Condvar::new(),
            work: Condvar::new(),
        });

        let worker = match desc.clock {
            SimClock::Manual => None,
            SimClock::Timed(latency) => {
                let worker_shared = Arc::clone(&shared);
                let handle = thread::Builder::new()
                    .name("sim-gpu".to_string())
                    .spawn(move || gpu_worker(worker_shared, latency))
                    .map_err(|e| GraphicsError::DeviceCreation(format!("Failed to start simulated GPU thread: {}", e)))?;
                Some(handle)
            }
        };

        debug!(
            clock = ?desc.clock,
            tearing = desc.tearing_supported,
            event_log = desc.event_log,
            "Simulated device created"
        );

        Ok(Self { shared, desc, worker })
    }

    /// 手动推进的模拟设备
    pub fn manual() -> Self {
        Self {
            shared: Arc::new(SimShared {
                state: Mutex::new(SimState::new(true)),
                progress: Condvar::new(),
                work: Condvar::new(),
            }),
            desc: SimDeviceDesc::manual(),
            worker: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.shared.state.lock()
    }

    /// 完成指定类型队列头部的一个操作
    pub fn retire_next(&self, queue_type: QueueType) -> bool {
        let mut state = self.lock();
        let Some(queue) = state.queue_index(queue_type) else {
            return false;
        };
        let retired = state.retire_one(queue).is_some();
        drop(state);
        if retired {
            self.shared.progress.notify_all();
        }
        retired
    }

    /// 完成指定队列的操作直到（包括）下一个 Fence 写入，返回写入的值
    pub fn retire_until_signal(&self, queue_type: QueueType) -> Option<u64> {
        let mut state = self.lock();
        let queue = state.queue_index(queue_type)?;
        let mut signaled = None;
        while let Some(op) = state.retire_one(queue) {
            if let RetiredOp::Signaled(value) = op {
                signaled = Some(value);
                break;
            }
        }
        drop(state);
        self.shared.progress.notify_all();
        signaled
    }

    /// 完成所有队列上当前可执行的操作
    pub fn retire_all(&self) -> usize {
        let retired = self.lock().retire_ready();
        self.shared.progress.notify_all();
        retired
    }

    /// 指定类型队列上尚未完成的操作数
    pub fn pending_ops(&self, queue_type: QueueType) -> usize {
        let state = self.lock();
        state
            .queue_index(queue_type)
            .map_or(0, |queue| state.queues[queue].pending.len())
    }

    /// 模拟设备移除，之后所有操作都返回设备丢失
    pub fn lose_device(&self) {
        let mut state = self.lock();
        state.lost = true;
        state.push_event(SimEvent::DeviceLost);
        drop(state);
        warn!("Simulated device lost");
        self.shared.progress.notify_all();
        self.shared.work.notify_all();
    }

    /// 事件日志快照
    pub fn events(&self) -> Vec<SimEvent> {
        self.lock().log.clone().unwrap_or_default()
    }

    pub fn clear_events(&self) {
        if let Some(log) = self.lock().log.as_mut() {
            log.clear();
        }
    }

    /// 分配器累计重置次数
    pub fn allocator_resets(&self) -> u64 {
        self.lock().allocator_resets
    }

    /// 已创建的分配器数量
    pub fn allocator_count(&self) -> usize {
        self.lock().allocators.len()
    }

    fn notify_work(&self) {
        self.shared.work.notify_all();
    }
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::manual()
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.lock().shutdown = true;
        self.shared.work.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Simulated GPU thread panicked");
            }
        }
    }
}

fn gpu_worker(shared: Arc<SimShared>, latency: Duration) {
    loop {
        {
            let mut state = shared.state.lock();
            while !state.shutdown && (state.lost || !state.has_pending()) {
                shared.work.wait(&mut state);
            }
            if state.shutdown {
                return;
            }
        }

        thread::sleep(latency);

        let mut state = shared.state.lock();
        if state.lost {
            continue;
        }
        let retired = state.retire_ready();
        drop(state);

        if retired > 0 {
            trace!(retired, "Simulated GPU retired work");
            shared.progress.notify_all();
        }
    }
}

fn validation_error(message: String) -> DirectEcsError {
    GraphicsError::CommandExecution(message).into()
}

impl GpuDevice for SimDevice {
    type Queue = SimQueue;
    type Fence = SimFence;
    type Allocator = SimAllocator;
    type CommandList = SimCommandList;
    type Resource = SimResource;
    type DescriptorHeap = SimDescriptorHeap;
    type SwapChain = SimSwapChain;

    fn backend_name(&self) -> &str {
        "Simulated"
    }

    fn create_command_queue(&self, queue_type: QueueType) -> Result<SimQueue> {
        let mut state = self.lock();
        state.check_alive()?;
        state.queues.push(QueueState {
            queue_type,
            pending: VecDeque::new(),
        });
        Ok(SimQueue {
            id: state.queues.len() - 1,
            queue_type,
        })
    }

    fn create_fence(&self, initial_value: u64) -> Result<SimFence> {
        let mut state = self.lock();
        state.check_alive()?;
        state.fences.push(initial_value);
        Ok(SimFence {
            id: state.fences.len() - 1,
        })
    }

    fn create_command_allocator(&self, queue_type: QueueType) -> Result<SimAllocator> {
        let mut state = self.lock();
        state.check_alive()?;
        state.allocators.push(AllocatorState {
            queue_type,
            in_flight: 0,
            open_list: None,
        });
        Ok(SimAllocator {
            id: state.allocators.len() - 1,
            queue_type,
        })
    }

    fn create_command_list(&self, queue_type: QueueType, allocator: &SimAllocator) -> Result<SimCommandList> {
        let mut state = self.lock();
        state.check_alive()?;

        if allocator.queue_type != queue_type {
            return Err(GraphicsError::ResourceCreation(format!(
                "{} command list created against a {} allocator",
                queue_type.name(),
                allocator.queue_type.name()
            ))
            .into());
        }
        if state.allocators[allocator.id].open_list.is_some() {
            return Err(validation_error(format!(
                "allocator {} already has a recording command list",
                allocator.id
            )));
        }

        let id = state.lists.len();
        state.lists.push(ListState {
            queue_type,
            allocator: allocator.id,
            recording: true,
            commands: Vec::new(),
            error: None,
        });
        state.allocators[allocator.id].open_list = Some(id);

        Ok(SimCommandList { id, queue_type })
    }

    fn reset_allocator(&self, allocator: &SimAllocator) -> Result<()> {
        let mut state = self.lock();
        state.check_alive()?;

        let alloc = &state.allocators[allocator.id];
        if alloc.in_flight > 0 {
            return Err(validation_error(format!(
                "allocator {} reset while {} submission(s) recorded from it are still executing",
                allocator.id, alloc.in_flight
            )));
        }
        if alloc.open_list.is_some() {
            return Err(validation_error(format!(
                "allocator {} reset while a command list is recording into it",
                allocator.id
            )));
        }

        state.allocator_resets += 1;
        state.push_event(SimEvent::AllocatorReset { allocator: allocator.id });
        Ok(())
    }

    fn reset_command_list(&self, list: &SimCommandList, allocator: &SimAllocator) -> Result<()> {
        let mut state = self.lock();
        state.check_alive()?;

        if state.lists[list.id].recording {
            return Err(validation_error(format!("command list {} reset while still recording", list.id)));
        }
        let allocator_type = state.allocators[allocator.id].queue_type;
        if allocator_type != list.queue_type {
            return Err(validation_error(format!(
                "{} command list reset against a {} allocator",
                list.queue_type.name(),
                allocator_type.name()
            )));
        }
        if state.allocators[allocator.id].open_list.is_some() {
            return Err(validation_error(format!(
                "allocator {} already has a recording command list",
                allocator.id
            )));
        }

        let lst = &mut state.lists[list.id];
        lst.allocator = allocator.id;
        lst.recording = true;
        lst.commands.clear();
        lst.error = None;
        state.allocators[allocator.id].open_list = Some(list.id);
        Ok(())
    }

    fn close_command_list(&self, list: &SimCommandList) -> Result<()> {
        let mut state = self.lock();
        state.check_alive()?;

        if !state.lists[list.id].recording {
            return Err(validation_error(format!("command list {} closed twice", list.id)));
        }

        let lst = &mut state.lists[list.id];
        lst.recording = false;
        let allocator = lst.allocator;
        let error = lst.error.take();
        state.allocators[allocator].open_list = None;

        match error {
            Some(message) => Err(validation_error(message)),
            None => Ok(()),
        }
    }

    fn resource_barrier(
        &self,
        list: &SimCommandList,
        resource: &SimResource,
        before: ResourceState,
        after: ResourceState,
    ) {
        let mut state = self.lock();
        let lst = &mut state.lists[list.id];

        if !lst.recording {
            lst.record_error(format!("barrier recorded into closed command list {}", list.id));
            return;
        }

        let current = resource.recorded_state();
        if current != before {
            lst.record_error(format!(
                "barrier on resource {} expects {:?} but the resource is in {:?}",
                resource.id(),
                before,
                current
            ));
            return;
        }

        resource.set_recorded_state(after);
        lst.commands.push(SimCommand::Barrier {
            resource: resource.id(),
            before,
            after,
        });
    }

    fn clear_render_target(&self, list: &SimCommandList, rtv: CpuDescriptor, color: [f32; 4]) {
        let mut state = self.lock();
        let target = state.rtvs.get(&rtv.0).and_then(Weak::upgrade);
        let lst = &mut state.lists[list.id];

        if !lst.recording {
            lst.record_error(format!("clear recorded into closed command list {}", list.id));
            return;
        }

        let Some(target) = target.map(SimResource::from_data) else {
            lst.record_error(format!("clear through stale render target view {:#x}", rtv.0));
            return;
        };

        if target.recorded_state() != ResourceState::RenderTarget {
            lst.record_error(format!(
                "clear on resource {} in {:?} state",
                target.id(),
                target.recorded_state()
            ));
            return;
        }

        lst.commands.push(SimCommand::ClearRenderTarget {
            resource: target.id(),
            color,
        });
    }

    fn execute_command_list(&self, queue: &SimQueue, list: &SimCommandList) -> Result<()> {
        let mut state = self.lock();
        state.check_alive()?;

        let lst = &state.lists[list.id];
        if lst.recording {
            return Err(validation_error(format!("command list {} executed while still open", list.id)));
        }
        if lst.queue_type != queue.queue_type {
            return Err(validation_error(format!(
                "{} command list executed on a {} queue",
                lst.queue_type.name(),
                queue.queue_type.name()
            )));
        }

        let allocator = lst.allocator;
        let commands = lst.commands.clone();
        let command_count = commands.len();

        state.allocators[allocator].in_flight += 1;
        state.queues[queue.id].pending.push_back(GpuOp::Execute { allocator, commands });
        state.push_event(SimEvent::Submitted {
            queue: queue.queue_type,
            commands: command_count,
        });
        drop(state);

        self.notify_work();
        Ok(())
    }

    fn signal(&self, queue: &SimQueue, fence: &SimFence, value: u64) -> Result<()> {
        let mut state = self.lock();
        state.check_alive()?;
        state.queues[queue.id].pending.push_back(GpuOp::Signal { fence: fence.id, value });
        state.push_event(SimEvent::Signaled {
            queue: queue.queue_type,
            fence: fence.id,
            value,
        });
        drop(state);

        self.notify_work();
        Ok(())
    }

    fn queue_wait(&self, queue: &SimQueue, fence: &SimFence, value: u64) -> Result<()> {
        let mut state = self.lock();
        state.check_alive()?;
        state.queues[queue.id].pending.push_back(GpuOp::Wait { fence: fence.id, value });
        drop(state);

        self.notify_work();
        Ok(())
    }

    fn completed_value(&self, fence: &SimFence) -> Result<u64> {
        let state = self.lock();
        state.check_alive()?;
        Ok(state.fences[fence.id])
    }

    fn wait_for_fence(&self, fence: &SimFence, value: u64, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();

        loop {
            state.check_alive()?;

            if state.fences[fence.id] >= value {
                state.push_event(SimEvent::CpuWaitSatisfied { fence: fence.id, value });
                return Ok(true);
            }

            match deadline {
                None => self.shared.progress.wait(&mut state),
                Some(deadline) => {
                    let timed_out = self.shared.progress.wait_until(&mut state, deadline).timed_out();
                    if timed_out && state.fences[fence.id] < value {
                        state.check_alive()?;
                        return Ok(false);
                    }
                }
            }
        }
    }

    fn create_rtv_heap(&self, descriptor_count: u32) -> Result<SimDescriptorHeap> {
        let mut state = self.lock();
        state.check_alive()?;
        let base = state.next_descriptor;
        state.next_descriptor += descriptor_count as usize * RTV_INCREMENT;
        Ok(SimDescriptorHeap {
            base,
            count: descriptor_count,
        })
    }

    fn rtv_handle(&self, heap: &SimDescriptorHeap, index: u32) -> CpuDescriptor {
        CpuDescriptor(heap.base).offset(index, RTV_INCREMENT)
    }

    fn create_render_target_view(&self, resource: &SimResource, handle: CpuDescriptor) {
        self.lock().rtvs.insert(handle.0, resource.downgrade());
    }

    fn is_tearing_supported(&self) -> bool {
        self.desc.tearing_supported
    }

    fn create_swap_chain(&self, queue: &SimQueue, window: &dyn WindowHost, desc: &SwapChainDesc) -> Result<SimSwapChain> {
        let mut state = self.lock();
        state.check_alive()?;

        if queue.queue_type != QueueType::Graphics {
            return Err(GraphicsError::SwapchainError(format!(
                "swap chain created on a {} queue",
                queue.queue_type.name()
            ))
            .into());
        }
        if desc.allow_tearing && !self.desc.tearing_supported {
            return Err(GraphicsError::SwapchainError(
                "tearing requested but the output does not support it".to_string(),
            )
            .into());
        }

        let (width, height) = if desc.width == 0 || desc.height == 0 {
            window.client_size()
        } else {
            (desc.width, desc.height)
        };

        let swap_chain = SimSwapChain::new(Arc::clone(&self.shared), queue.id, desc, width, height, &mut state);
        Ok(swap_chain)
    }
}
