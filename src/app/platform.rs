//! 平台层
//!
//! 基于 winit 的消息循环和窗口。把 winit 事件翻译成 `PlatformEvent` 交给
//! `Application`，每次循环迭代请求一次重绘。
//!
//! 快捷键：
//! - `F11`：切换全屏
//! - `V`：切换垂直同步
//! - `Esc`：退出

use std::sync::Arc;

use anyhow::Context;
use raw_window_handle::RawWindowHandle;
use tracing::{error, info};
use winit::dpi::LogicalSize;
use winit::event::{ElementState, Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::raw_window_handle::HasWindowHandle;
use winit::window::{Fullscreen, Window, WindowBuilder};

use super::Application;
use crate::core::config::{Config, GraphicsBackend};
use crate::core::error::{DirectEcsError, Result};
use crate::core::event::{LoopControl, PlatformEvent};
use crate::gfx::backend::{GpuDevice, WindowHost};
use crate::gfx::sim::{SimDevice, SimDeviceDesc};

/// winit 窗口
pub struct WinitWindow {
    window: Window,
}

impl WinitWindow {
    pub fn new(window: Window) -> Self {
        Self { window }
    }

    pub fn window(&self) -> &Window {
        &self.window
    }
}

impl WindowHost for WinitWindow {
    fn client_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn set_fullscreen(&mut self, fullscreen: bool) {
        let mode = if fullscreen {
            Some(Fullscreen::Borderless(None))
        } else {
            None
        };
        self.window.set_fullscreen(mode);
    }

    fn raw_window_handle(&self) -> Option<RawWindowHandle> {
        self.window.window_handle().ok().map(|handle| handle.as_raw())
    }
}

/// 把 winit 窗口事件翻译成平台事件
fn translate(event: &WindowEvent) -> Option<PlatformEvent> {
    match event {
        WindowEvent::CloseRequested => Some(PlatformEvent::CloseRequested),
        WindowEvent::Resized(size) => Some(PlatformEvent::Resized {
            width: size.width,
            height: size.height,
        }),
        WindowEvent::RedrawRequested => Some(PlatformEvent::Redraw),
        WindowEvent::KeyboardInput { event, .. } => key_action(event.state, event.repeat, event.physical_key),
        _ => None,
    }
}

/// 快捷键映射，只响应首次按下
fn key_action(state: ElementState, repeat: bool, key: PhysicalKey) -> Option<PlatformEvent> {
    if state != ElementState::Pressed || repeat {
        return None;
    }
    match key {
        PhysicalKey::Code(KeyCode::Escape) => Some(PlatformEvent::CloseRequested),
        PhysicalKey::Code(KeyCode::F11) => Some(PlatformEvent::ToggleFullscreen),
        PhysicalKey::Code(KeyCode::KeyV) => Some(PlatformEvent::ToggleVsync),
        _ => None,
    }
}

/// 创建窗口与设备并运行消息循环直到退出，返回进程退出码
pub fn exec(config: &Config) -> i32 {
    match run_platform(config) {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    }
}

/// 以阻塞对话框通知窗口层失败，只对 `DirectEcsError::Window` 生效
///
/// 返回是否弹出了对话框。
fn notify_window_failure(error: &DirectEcsError) -> bool {
    let DirectEcsError::Window(message) = error else {
        return false;
    };
    show_error_dialog(message)
}

#[cfg(target_os = "windows")]
fn show_error_dialog(message: &str) -> bool {
    use windows::core::{w, HSTRING};
    use windows::Win32::UI::WindowsAndMessaging::{MessageBoxW, MB_ICONERROR, MB_OK};

    let text = HSTRING::from(message);
    unsafe {
        MessageBoxW(None, &text, w!("Error"), MB_OK | MB_ICONERROR);
    }
    true
}

#[cfg(not(target_os = "windows"))]
fn show_error_dialog(_message: &str) -> bool {
    false
}

fn create_window(config: &Config) -> Result<(EventLoop<()>, WinitWindow)> {
    let event_loop = EventLoop::new()
        .map_err(|e| DirectEcsError::Window(format!("Unable to register the window class: {}", e)))?;

    let window = WindowBuilder::new()
        .with_title(format!("{} [{}]", config.window.title, config.graphics.backend.name()))
        .with_inner_size(LogicalSize::new(config.window.width, config.window.height))
        .with_resizable(config.window.resizable)
        .build(&event_loop)
        .map_err(|e| DirectEcsError::Window(format!("Could not create the render window: {}", e)))?;

    Ok((event_loop, WinitWindow::new(window)))
}

fn run_platform(config: &Config) -> anyhow::Result<()> {
    let (event_loop, window) = match create_window(config) {
        Ok(created) => created,
        Err(e) => {
            notify_window_failure(&e);
            return Err(e).context("Window creation failed");
        }
    };

    match config.graphics.backend {
        #[cfg(target_os = "windows")]
        GraphicsBackend::Dx12 => {
            let device = crate::gfx::dx12::Dx12Device::new(config.graphics.use_warp)
                .context("Failed to create DirectX 12 device")?;
            run(event_loop, window, Arc::new(device), config)
        }
        #[cfg(not(target_os = "windows"))]
        GraphicsBackend::Dx12 => anyhow::bail!("DirectX 12 backend is only available on Windows"),
        GraphicsBackend::Simulated => {
            let desc = SimDeviceDesc::timed(config.simulation.gpu_latency())
                .with_tearing(config.simulation.tearing_supported)
                .with_event_log(false);
            let device = SimDevice::new(desc).context("Failed to create simulated device")?;
            run(event_loop, window, Arc::new(device), config)
        }
    }
}

fn run<D: GpuDevice>(
    event_loop: EventLoop<()>,
    mut window: WinitWindow,
    device: Arc<D>,
    config: &Config,
) -> anyhow::Result<()> {
    let mut app = Application::new();
    app.init(device, &window, config)
        .context("Failed to initialize application")?;

    info!("Entering main loop...");

    let mut failure: Option<DirectEcsError> = None;
    event_loop
        .run(|event, elwt| {
            elwt.set_control_flow(ControlFlow::Poll);
            if failure.is_some() {
                return;
            }

            let platform_event = match &event {
                Event::WindowEvent { event, window_id } if *window_id == window.window().id() => translate(event),
                Event::AboutToWait => {
                    window.window().request_redraw();
                    None
                }
                _ => None,
            };

            let Some(platform_event) = platform_event else {
                return;
            };

            match app.handle_event(platform_event, &mut window) {
                Ok(LoopControl::Continue) => {}
                Ok(LoopControl::Exit) => elwt.exit(),
                Err(e) => {
                    error!(event = %platform_event, "Frame loop failed: {}", e);
                    failure = Some(e);
                    elwt.exit();
                }
            }
        })
        .context("Event loop terminated abnormally")?;

    let shutdown = app.shutdown();

    if let Some(e) = failure {
        if let Err(shutdown_error) = shutdown {
            error!("Shutdown after failure also failed: {}", shutdown_error);
        }
        return Err(e).context("Frame loop stopped");
    }

    shutdown.context("Failed to flush GPU work at shutdown")?;
    info!("Exited cleanly");
    Ok(())
}
