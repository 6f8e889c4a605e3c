//! 通过 `Application` 在模拟后端上运行完整的帧循环

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use direct_ecs::app::{Application, System};
use direct_ecs::core::{Config, LoopControl, PlatformEvent};
use direct_ecs::gfx::sim::{HeadlessWindow, SimDevice, SimDeviceDesc, SimEvent};
use direct_ecs::renderer::{QueueType, ResourceState, BUFFER_COUNT};

struct FrameCounter {
    updates: Rc<Cell<u32>>,
}

impl System for FrameCounter {
    fn name(&self) -> &str {
        "frame-counter"
    }

    fn update(&mut self, delta_seconds: f64) {
        assert!(delta_seconds >= 0.0);
        self.updates.set(self.updates.get() + 1);
    }
}

fn timed_device() -> Arc<SimDevice> {
    Arc::new(SimDevice::new(SimDeviceDesc::timed(Duration::from_millis(1))).unwrap())
}

fn config(max_frames: u64) -> Config {
    let mut config = Config::default();
    config.app.max_frames = max_frames;
    config.graphics.fence_timeout_ms = Some(5_000);
    config
}

/// 持续发送 Redraw 直到应用要求退出
fn pump(app: &mut Application<SimDevice>, window: &mut HeadlessWindow) -> u64 {
    let mut redraws = 0;
    while app.handle_event(PlatformEvent::Redraw, window).unwrap() == LoopControl::Continue {
        redraws += 1;
        assert!(redraws < 10_000, "frame limit never reached");
    }
    redraws + 1
}

#[test]
fn runs_until_frame_limit() {
    let device = timed_device();
    let mut window = HeadlessWindow::new(640, 480);
    let updates = Rc::new(Cell::new(0));

    let mut app = Application::new();
    app.add_system(Box::new(FrameCounter { updates: Rc::clone(&updates) }));
    app.init(Arc::clone(&device), &window, &config(30)).unwrap();

    assert_eq!(pump(&mut app, &mut window), 30);
    assert_eq!(app.frame_count(), 30);
    assert_eq!(updates.get(), 30);

    let ring = app.ring().unwrap();
    assert_eq!(ring.frames_presented(), 30);
    assert_eq!(ring.swap_chain().present_count(), 30);

    // 在途帧数不超过后缓冲数量，分配器数量随之有界
    let pool = app.queues().unwrap().get(QueueType::Graphics).allocator_pool();
    assert!(pool.allocator_count() <= BUFFER_COUNT as usize + 1);

    app.shutdown().unwrap();
    for queue_type in QueueType::ALL {
        assert_eq!(device.pending_ops(queue_type), 0);
    }
}

#[test]
fn presents_alternate_between_back_buffers() {
    let device = timed_device();
    let mut window = HeadlessWindow::new(640, 480);

    let mut app = Application::new();
    app.init(Arc::clone(&device), &window, &config(6)).unwrap();
    pump(&mut app, &mut window);

    let presented: Vec<u32> = device
        .events()
        .into_iter()
        .filter_map(|e| match e {
            SimEvent::Presented { buffer, .. } => Some(buffer),
            _ => None,
        })
        .collect();
    assert_eq!(presented, vec![0, 1, 0, 1, 0, 1]);

    app.shutdown().unwrap();
}

#[test]
fn second_init_is_ignored() {
    let device = timed_device();
    let window = HeadlessWindow::new(320, 240);

    let mut app = Application::new();
    app.init(Arc::clone(&device), &window, &config(0)).unwrap();
    let size = app.ring().unwrap().size();

    let other = HeadlessWindow::new(1024, 768);
    app.init(Arc::clone(&device), &other, &config(0)).unwrap();
    assert_eq!(app.ring().unwrap().size(), size);

    app.shutdown().unwrap();
}

#[test]
fn resize_and_fullscreen_between_frames() {
    let device = timed_device();
    let mut window = HeadlessWindow::new(640, 480).with_display_size(1920, 1080);

    let mut app = Application::new();
    app.init(Arc::clone(&device), &window, &config(0)).unwrap();

    app.handle_event(PlatformEvent::Redraw, &mut window).unwrap();

    // 最小化
    window.set_client_size(0, 0);
    app.handle_event(PlatformEvent::Resized { width: 0, height: 0 }, &mut window)
        .unwrap();
    assert_eq!(app.ring().unwrap().size(), (1, 1));
    app.handle_event(PlatformEvent::Redraw, &mut window).unwrap();

    window.set_client_size(800, 600);
    app.handle_event(PlatformEvent::Resized { width: 800, height: 600 }, &mut window)
        .unwrap();
    app.handle_event(PlatformEvent::Redraw, &mut window).unwrap();

    app.handle_event(PlatformEvent::ToggleFullscreen, &mut window).unwrap();
    assert!(window.is_fullscreen());
    assert_eq!(app.ring().unwrap().size(), (1920, 1080));
    app.handle_event(PlatformEvent::Redraw, &mut window).unwrap();

    app.handle_event(PlatformEvent::ToggleFullscreen, &mut window).unwrap();
    assert_eq!(app.ring().unwrap().size(), (800, 600));
    app.handle_event(PlatformEvent::Redraw, &mut window).unwrap();

    let resizes = device
        .events()
        .iter()
        .filter(|e| matches!(e, SimEvent::BackBuffersResized { .. }))
        .count();
    assert_eq!(resizes, 4);

    for buffer in app.ring().unwrap().back_buffers() {
        assert_eq!(buffer.state(), ResourceState::Present);
    }

    assert_eq!(
        app.handle_event(PlatformEvent::CloseRequested, &mut window).unwrap(),
        LoopControl::Exit
    );
    app.shutdown().unwrap();
}

#[test]
fn device_loss_stops_the_frame_loop() {
    let device = timed_device();
    let mut window = HeadlessWindow::new(320, 240);

    let mut app = Application::new();
    app.init(Arc::clone(&device), &window, &config(0)).unwrap();
    app.handle_event(PlatformEvent::Redraw, &mut window).unwrap();

    device.lose_device();

    let mut lost = None;
    for _ in 0..BUFFER_COUNT + 1 {
        if let Err(e) = app.handle_event(PlatformEvent::Redraw, &mut window) {
            lost = Some(e);
            break;
        }
    }
    assert!(lost.map_or(false, |e| e.is_device_lost()));
    assert!(app.shutdown().unwrap_err().is_device_lost());
}

#[test]
fn long_run_without_event_log_keeps_it_empty() {
    let desc = SimDeviceDesc::timed(Duration::from_millis(1)).with_event_log(false);
    let device = Arc::new(SimDevice::new(desc).unwrap());
    let mut window = HeadlessWindow::new(320, 240);

    let mut app = Application::new();
    app.init(Arc::clone(&device), &window, &config(500)).unwrap();
    assert_eq!(pump(&mut app, &mut window), 500);

    assert!(device.events().is_empty());
    assert_eq!(app.ring().unwrap().frames_presented(), 500);
    app.shutdown().unwrap();
}
