//! DirectX 12 设备

use std::mem::{size_of, ManuallyDrop};
use std::time::Duration;

use tracing::{debug, info, warn};
use windows::core::{Interface, BOOL};
use windows::Win32::Foundation::{CloseHandle, HANDLE, HWND, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject, INFINITE};
use raw_window_handle::RawWindowHandle;

use super::swap_chain::Dx12SwapChain;
use crate::core::error::{DirectEcsError, GraphicsError, Result};
use crate::gfx::backend::{CpuDescriptor, GpuDevice, SwapChainDesc, WindowHost};
use crate::renderer::command::QueueType;
use crate::renderer::resource::ResourceState;

pub(super) const BACK_BUFFER_FORMAT: DXGI_FORMAT = DXGI_FORMAT_R8G8B8A8_UNORM;

fn list_type(queue_type: QueueType) -> D3D12_COMMAND_LIST_TYPE {
    match queue_type {
        QueueType::Graphics => D3D12_COMMAND_LIST_TYPE_DIRECT,
        QueueType::Compute => D3D12_COMMAND_LIST_TYPE_COMPUTE,
        QueueType::Copy => D3D12_COMMAND_LIST_TYPE_COPY,
    }
}

fn native_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,
        ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
    }
}

fn creation_error(what: &str, e: windows::core::Error) -> DirectEcsError {
    GraphicsError::ResourceCreation(format!("Failed to create {}: {:?}", what, e)).into()
}

fn execution_error(what: &str, e: windows::core::Error) -> DirectEcsError {
    GraphicsError::CommandExecution(format!("{} failed: {:?}", what, e)).into()
}

/// Fence 与其完成事件
pub struct Dx12Fence {
    fence: ID3D12Fence,
    event: HANDLE,
}

impl Drop for Dx12Fence {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = CloseHandle(self.event) {
                warn!("Failed to close fence event: {:?}", e);
            }
        }
    }
}

/// RTV 描述符堆
pub struct Dx12DescriptorHeap {
    heap: ID3D12DescriptorHeap,
    increment: usize,
}

/// DirectX 12 设备
pub struct Dx12Device {
    factory: IDXGIFactory4,
    device: ID3D12Device,
    tearing_supported: bool,
}

impl Dx12Device {
    /// 创建设备
    ///
    /// `use_warp` 为 true 时使用 WARP 软件光栅器，否则选择独立显存最大的硬件适配器。
    pub fn new(use_warp: bool) -> Result<Self> {
        unsafe {
            #[cfg(debug_assertions)]
            {
                let mut debug: Option<ID3D12Debug> = None;
                match D3D12GetDebugInterface(&mut debug) {
                    Ok(()) => {
                        if let Some(debug) = debug {
                            debug.EnableDebugLayer();
                            debug!("DX12 Debug Layer enabled");
                        }
                    }
                    Err(_) => warn!("Failed to enable DX12 Debug Layer"),
                }
            }

            #[cfg(debug_assertions)]
            let factory_flags = DXGI_CREATE_FACTORY_DEBUG;
            #[cfg(not(debug_assertions))]
            let factory_flags = DXGI_CREATE_FACTORY_FLAGS(0);

            let factory: IDXGIFactory4 = CreateDXGIFactory2(factory_flags)
                .map_err(|e| GraphicsError::DeviceCreation(format!("Failed to create DXGI factory: {:?}", e)))?;

            let adapter = select_adapter(&factory, use_warp)?;

            let mut device: Option<ID3D12Device> = None;
            D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device)
                .map_err(|e| GraphicsError::DeviceCreation(format!("Failed to create D3D12 device: {:?}", e)))?;
            let device = device
                .ok_or_else(|| GraphicsError::DeviceCreation("D3D12CreateDevice returned no device".to_string()))?;

            let tearing_supported = check_tearing_support(&factory);

            info!(warp = use_warp, tearing = tearing_supported, "D3D12 device created");

            Ok(Self {
                factory,
                device,
                tearing_supported,
            })
        }
    }

    /// 检查设备是否已被移除
    fn device_removed(&self) -> Option<DirectEcsError> {
        unsafe {
            self.device
                .GetDeviceRemovedReason()
                .err()
                .map(|e| GraphicsError::DeviceLost(format!("{:?}", e)).into())
        }
    }
}

unsafe fn select_adapter(factory: &IDXGIFactory4, use_warp: bool) -> Result<IDXGIAdapter1> {
    if use_warp {
        let adapter: IDXGIAdapter1 = factory
            .EnumWarpAdapter()
            .map_err(|e| GraphicsError::DeviceCreation(format!("Failed to get WARP adapter: {:?}", e)))?;
        debug!("Using WARP adapter");
        return Ok(adapter);
    }

    let mut best: Option<(IDXGIAdapter1, usize)> = None;
    let mut index = 0;
    while let Ok(adapter) = factory.EnumAdapters1(index) {
        index += 1;

        let desc = match adapter.GetDesc1() {
            Ok(desc) => desc,
            Err(_) => continue,
        };
        if (desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32) != 0 {
            continue;
        }

        let memory = desc.DedicatedVideoMemory;
        if best.as_ref().map_or(true, |(_, m)| memory > *m) {
            best = Some((adapter, memory));
        }
    }

    let (adapter, memory) =
        best.ok_or_else(|| GraphicsError::DeviceCreation("No hardware adapter supports Direct3D 12".to_string()))?;
    debug!(dedicated_memory_mb = memory / (1024 * 1024), "Hardware adapter selected");
    Ok(adapter)
}

unsafe fn check_tearing_support(factory: &IDXGIFactory4) -> bool {
    let Ok(factory5) = factory.cast::<IDXGIFactory5>() else {
        return false;
    };

    let mut allow_tearing = BOOL(0);
    let result = factory5.CheckFeatureSupport(
        DXGI_FEATURE_PRESENT_ALLOW_TEARING,
        &mut allow_tearing as *mut BOOL as *mut std::ffi::c_void,
        size_of::<BOOL>() as u32,
    );

    result.is_ok() && allow_tearing.as_bool()
}

fn hwnd_from(window: &dyn WindowHost) -> Result<HWND> {
    match window.raw_window_handle() {
        Some(RawWindowHandle::Win32(handle)) => Ok(HWND(handle.hwnd.get() as *mut std::ffi::c_void)),
        _ => Err(GraphicsError::SwapchainError("Expected a Win32 window handle".to_string()).into()),
    }
}

impl GpuDevice for Dx12Device {
    type Queue = ID3D12CommandQueue;
    type Fence = Dx12Fence;
    type Allocator = ID3D12CommandAllocator;
    type CommandList = ID3D12GraphicsCommandList;
    type Resource = ID3D12Resource;
    type DescriptorHeap = Dx12DescriptorHeap;
    type SwapChain = Dx12SwapChain;

    fn backend_name(&self) -> &str {
        "DirectX 12"
    }

    fn create_command_queue(&self, queue_type: QueueType) -> Result<ID3D12CommandQueue> {
        let desc = D3D12_COMMAND_QUEUE_DESC {
            Type: list_type(queue_type),
            Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
            ..Default::default()
        };
        unsafe {
            self.device
                .CreateCommandQueue(&desc)
                .map_err(|e| GraphicsError::QueueCreation(format!("{} queue: {:?}", queue_type.name(), e)).into())
        }
    }

    fn create_fence(&self, initial_value: u64) -> Result<Dx12Fence> {
        unsafe {
            let fence: ID3D12Fence = self
                .device
                .CreateFence(initial_value, D3D12_FENCE_FLAG_NONE)
                .map_err(|e| creation_error("fence", e))?;
            let event = CreateEventA(None, false, false, None).map_err(|e| creation_error("fence event", e))?;
            Ok(Dx12Fence { fence, event })
        }
    }

    fn create_command_allocator(&self, queue_type: QueueType) -> Result<ID3D12CommandAllocator> {
        unsafe {
            self.device
                .CreateCommandAllocator(list_type(queue_type))
                .map_err(|e| creation_error("command allocator", e))
        }
    }

    fn create_command_list(
        &self,
        queue_type: QueueType,
        allocator: &ID3D12CommandAllocator,
    ) -> Result<ID3D12GraphicsCommandList> {
        unsafe {
            self.device
                .CreateCommandList(0, list_type(queue_type), allocator, None::<&ID3D12PipelineState>)
                .map_err(|e| creation_error("command list", e))
        }
    }

    fn reset_allocator(&self, allocator: &ID3D12CommandAllocator) -> Result<()> {
        unsafe { allocator.Reset().map_err(|e| execution_error("Command allocator reset", e)) }
    }

    fn reset_command_list(&self, list: &ID3D12GraphicsCommandList, allocator: &ID3D12CommandAllocator) -> Result<()> {
        unsafe {
            list.Reset(allocator, None::<&ID3D12PipelineState>)
                .map_err(|e| execution_error("Command list reset", e))
        }
    }

    fn close_command_list(&self, list: &ID3D12GraphicsCommandList) -> Result<()> {
        unsafe { list.Close().map_err(|e| execution_error("Command list close", e)) }
    }

    fn resource_barrier(
        &self,
        list: &ID3D12GraphicsCommandList,
        resource: &ID3D12Resource,
        before: ResourceState,
        after: ResourceState,
    ) {
        let barrier = D3D12_RESOURCE_BARRIER {
            Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
            Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
            Anonymous: D3D12_RESOURCE_BARRIER_0 {
                Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                    pResource: ManuallyDrop::new(Some(resource.clone())),
                    Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                    StateBefore: native_state(before),
                    StateAfter: native_state(after),
                }),
            },
        };
        unsafe {
            let barriers = [barrier];
            list.ResourceBarrier(&barriers);
            // 释放屏障持有的资源引用
            let [barrier] = barriers;
            let transition = ManuallyDrop::into_inner(barrier.Anonymous.Transition);
            drop(ManuallyDrop::into_inner(transition.pResource));
        }
    }

    fn clear_render_target(&self, list: &ID3D12GraphicsCommandList, rtv: CpuDescriptor, color: [f32; 4]) {
        let handle = D3D12_CPU_DESCRIPTOR_HANDLE { ptr: rtv.0 };
        unsafe {
            list.ClearRenderTargetView(handle, color.as_ptr(), None);
        }
    }

    fn execute_command_list(&self, queue: &ID3D12CommandQueue, list: &ID3D12GraphicsCommandList) -> Result<()> {
        let lists = [Some(list.clone().into())];
        unsafe {
            queue.ExecuteCommandLists(&lists);
        }
        match self.device_removed() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn signal(&self, queue: &ID3D12CommandQueue, fence: &Dx12Fence, value: u64) -> Result<()> {
        unsafe {
            queue
                .Signal(&fence.fence, value)
                .map_err(|e| self.device_removed().unwrap_or_else(|| execution_error("Queue signal", e)))
        }
    }

    fn queue_wait(&self, queue: &ID3D12CommandQueue, fence: &Dx12Fence, value: u64) -> Result<()> {
        unsafe {
            queue
                .Wait(&fence.fence, value)
                .map_err(|e| self.device_removed().unwrap_or_else(|| execution_error("Queue wait", e)))
        }
    }

    fn completed_value(&self, fence: &Dx12Fence) -> Result<u64> {
        let value = unsafe { fence.fence.GetCompletedValue() };
        // 设备移除后 Fence 读回全 1
        if value == u64::MAX {
            if let Some(e) = self.device_removed() {
                return Err(e);
            }
        }
        Ok(value)
    }

    fn wait_for_fence(&self, fence: &Dx12Fence, value: u64, timeout: Option<Duration>) -> Result<bool> {
        if self.completed_value(fence)? >= value {
            return Ok(true);
        }

        let millis = timeout.map_or(INFINITE, |t| t.as_millis().min(u32::MAX as u128 - 1) as u32);
        unsafe {
            fence
                .fence
                .SetEventOnCompletion(value, fence.event)
                .map_err(|e| execution_error("SetEventOnCompletion", e))?;

            let result = WaitForSingleObject(fence.event, millis);
            if result == WAIT_OBJECT_0 {
                Ok(true)
            } else if result == WAIT_TIMEOUT {
                // 可能在超时后恰好完成
                Ok(self.completed_value(fence)? >= value)
            } else {
                Err(GraphicsError::CommandExecution(format!("WaitForSingleObject returned {:?}", result)).into())
            }
        }
    }

    fn create_rtv_heap(&self, descriptor_count: u32) -> Result<Dx12DescriptorHeap> {
        let desc = D3D12_DESCRIPTOR_HEAP_DESC {
            NumDescriptors: descriptor_count,
            Type: D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
            Flags: D3D12_DESCRIPTOR_HEAP_FLAG_NONE,
            NodeMask: 0,
        };
        unsafe {
            let heap: ID3D12DescriptorHeap = self
                .device
                .CreateDescriptorHeap(&desc)
                .map_err(|e| creation_error("RTV descriptor heap", e))?;
            let increment = self.device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_RTV) as usize;
            Ok(Dx12DescriptorHeap { heap, increment })
        }
    }

    fn rtv_handle(&self, heap: &Dx12DescriptorHeap, index: u32) -> CpuDescriptor {
        let start = unsafe { heap.heap.GetCPUDescriptorHandleForHeapStart() };
        CpuDescriptor(start.ptr).offset(index, heap.increment)
    }

    fn create_render_target_view(&self, resource: &ID3D12Resource, handle: CpuDescriptor) {
        unsafe {
            self.device
                .CreateRenderTargetView(resource, None, D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.0 });
        }
    }

    fn is_tearing_supported(&self) -> bool {
        self.tearing_supported
    }

    fn create_swap_chain(
        &self,
        queue: &ID3D12CommandQueue,
        window: &dyn WindowHost,
        desc: &SwapChainDesc,
    ) -> Result<Dx12SwapChain> {
        let hwnd = hwnd_from(window)?;
        let flags = if desc.allow_tearing {
            DXGI_SWAP_CHAIN_FLAG_ALLOW_TEARING.0 as u32
        } else {
            0
        };

        let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: desc.width,
            Height: desc.height,
            Format: BACK_BUFFER_FORMAT,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                ..Default::default()
            },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: desc.buffer_count,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            Flags: flags,
            ..Default::default()
        };

        unsafe {
            let swap_chain: IDXGISwapChain1 = self
                .factory
                .CreateSwapChainForHwnd(queue, hwnd, &swap_chain_desc, None, None)
                .map_err(|e| GraphicsError::SwapchainError(format!("Failed to create swap chain: {:?}", e)))?;

            // 全屏由窗口层处理
            self.factory
                .MakeWindowAssociation(hwnd, DXGI_MWA_NO_ALT_ENTER)
                .map_err(|e| GraphicsError::SwapchainError(format!("MakeWindowAssociation failed: {:?}", e)))?;

            let swap_chain: IDXGISwapChain3 = swap_chain
                .cast()
                .map_err(|e| GraphicsError::SwapchainError(format!("IDXGISwapChain3 unavailable: {:?}", e)))?;

            info!(width = desc.width, height = desc.height, buffers = desc.buffer_count, "Swap chain created");

            Ok(Dx12SwapChain::new(swap_chain, flags))
        }
    }
}
