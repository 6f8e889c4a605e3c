//! 每帧更新回调
//!
//! 游戏或模拟逻辑以 `System` 的形式注册到应用，每帧在渲染转换开始之前
//! 按注册顺序收到一次帧间隔时间。

/// 每帧更新的系统
pub trait System {
    /// 系统名称，用于日志和启用/禁用
    fn name(&self) -> &str;

    /// 每帧调用一次
    fn update(&mut self, delta_seconds: f64);
}

struct SystemEntry {
    system: Box<dyn System>,
    enabled: bool,
}

/// 按注册顺序更新的系统集合
#[derive(Default)]
pub struct SystemSet {
    entries: Vec<SystemEntry>,
}

impl SystemSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册系统，默认启用
    pub fn add(&mut self, system: Box<dyn System>) {
        self.entries.push(SystemEntry { system, enabled: true });
    }

    /// 启用或禁用同名系统，找不到时返回 false
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.entries.iter_mut().find(|e| e.system.name() == name) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// 更新所有启用的系统
    pub fn update(&mut self, delta_seconds: f64) {
        for entry in self.entries.iter_mut().filter(|e| e.enabled) {
            entry.system.update(delta_seconds);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.system.name())
    }
}
