//! 无头窗口
//!
//! 没有原生句柄的窗口，测试和离屏运行时代替平台窗口。

use raw_window_handle::RawWindowHandle;

use crate::gfx::backend::WindowHost;

#[derive(Debug, Clone)]
pub struct HeadlessWindow {
    windowed: (u32, u32),
    display: (u32, u32),
    fullscreen: bool,
}

impl HeadlessWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            windowed: (width, height),
            display: (1920, 1080),
            fullscreen: false,
        }
    }

    /// 全屏时使用的显示器分辨率
    pub fn with_display_size(mut self, width: u32, height: u32) -> Self {
        self.display = (width, height);
        self
    }

    /// 模拟用户拖动窗口边框
    pub fn set_client_size(&mut self, width: u32, height: u32) {
        self.windowed = (width, height);
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }
}

impl WindowHost for HeadlessWindow {
    fn client_size(&self) -> (u32, u32) {
        if self.fullscreen {
            self.display
        } else {
            self.windowed
        }
    }

    fn set_fullscreen(&mut self, fullscreen: bool) {
        self.fullscreen = fullscreen;
    }

    fn raw_window_handle(&self) -> Option<RawWindowHandle> {
        None
    }
}
