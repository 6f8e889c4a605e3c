//! 事件模块
//!
//! 帧循环只依赖这里定义的平台无关事件，具体的事件来源（winit 消息循环、
//! 测试脚本）负责把原始输入翻译成 `PlatformEvent`。
//!
//! # 使用示例
//!
//! ```
//! use direct_ecs::core::event::{PlatformEvent, EventType};
//!
//! let event = PlatformEvent::Resized { width: 1920, height: 1080 };
//! assert_eq!(event.event_type(), EventType::WindowResize);
//! assert_eq!(event.detail(), "WindowResize: 1920x1080");
//! ```

use std::fmt;

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// 窗口客户区尺寸变化
    WindowResize,
    /// 窗口关闭（或退出请求）
    WindowClose,
    /// 切换全屏
    ToggleFullscreen,
    /// 切换垂直同步
    ToggleVsync,
    /// 绘制一帧
    Redraw,
}

impl EventType {
    pub fn name(&self) -> &'static str {
        match self {
            EventType::WindowResize => "WindowResize",
            EventType::WindowClose => "WindowClose",
            EventType::ToggleFullscreen => "ToggleFullscreen",
            EventType::ToggleVsync => "ToggleVsync",
            EventType::Redraw => "Redraw",
        }
    }
}

/// 平台事件
///
/// 每次消息循环迭代产生零个或多个事件，`Redraw` 驱动一次帧更新。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
    /// 客户区尺寸变化（最小化时可能为 0x0）
    Resized { width: u32, height: u32 },
    /// 用户请求关闭
    CloseRequested,
    /// 切换全屏
    ToggleFullscreen,
    /// 切换垂直同步
    ToggleVsync,
    /// 绘制一帧
    Redraw,
}

impl PlatformEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            PlatformEvent::Resized { .. } => EventType::WindowResize,
            PlatformEvent::CloseRequested => EventType::WindowClose,
            PlatformEvent::ToggleFullscreen => EventType::ToggleFullscreen,
            PlatformEvent::ToggleVsync => EventType::ToggleVsync,
            PlatformEvent::Redraw => EventType::Redraw,
        }
    }

    /// 事件详情，用于日志
    pub fn detail(&self) -> String {
        match self {
            PlatformEvent::Resized { width, height } => {
                format!("{}: {}x{}", self.event_type().name(), width, height)
            }
            _ => self.event_type().name().to_string(),
        }
    }
}

impl fmt::Display for PlatformEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.detail())
    }
}

/// 事件处理后的循环控制
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    /// 继续运行
    Continue,
    /// 退出消息循环
    Exit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_detail() {
        assert_eq!(PlatformEvent::Redraw.detail(), "Redraw");
        assert_eq!(
            PlatformEvent::Resized { width: 0, height: 0 }.to_string(),
            "WindowResize: 0x0"
        );
        assert_eq!(PlatformEvent::CloseRequested.event_type(), EventType::WindowClose);
    }
}
