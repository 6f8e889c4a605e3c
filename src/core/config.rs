//! 配置管理模块
//!
//! 提供引擎配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//! 所有配置项只在 `Application::init` 时读取一次。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [window]
//! title = "DirectEcs"
//! width = 1280
//! height = 720
//! resizable = true
//!
//! [graphics]
//! backend = "dx12"    # 或 "simulated"
//! vsync = true
//! use_warp = false
//! clear_color = [0.4, 0.6, 0.9, 1.0]
//! # fence_timeout_ms = 5000
//!
//! [simulation]
//! gpu_latency_ms = 2
//!
//! [app]
//! max_frames = 0      # 0 表示运行到退出
//!
//! [logging]
//! level = "info"      # trace, debug, info, warn, error
//! file_output = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::error::{ConfigError, Result};

/// 引擎配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 窗口配置
    #[serde(default)]
    pub window: WindowConfig,

    /// 图形配置
    #[serde(default)]
    pub graphics: GraphicsConfig,

    /// 模拟后端配置
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// 应用配置
    #[serde(default)]
    pub app: AppConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 窗口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// 窗口标题
    #[serde(default = "default_title")]
    pub title: String,

    /// 初始客户区宽度
    #[serde(default = "default_width")]
    pub width: u32,

    /// 初始客户区高度
    #[serde(default = "default_height")]
    pub height: u32,

    /// 是否可调整大小
    #[serde(default = "default_resizable")]
    pub resizable: bool,
}

/// 图形配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsConfig {
    /// 图形后端选择
    #[serde(default = "default_backend")]
    pub backend: GraphicsBackend,

    /// 垂直同步
    #[serde(default = "default_vsync")]
    pub vsync: bool,

    /// 使用 WARP 软件适配器
    #[serde(default)]
    pub use_warp: bool,

    /// 后缓冲清屏颜色
    #[serde(default = "default_clear_color")]
    pub clear_color: [f32; 4],

    /// Fence 等待超时（毫秒），缺省为无限等待
    #[serde(default)]
    pub fence_timeout_ms: Option<u64>,
}

/// 图形后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsBackend {
    /// DirectX 12 后端（仅 Windows）
    Dx12,
    /// 软件模拟的 GPU 时间线
    Simulated,
}

/// 模拟后端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// 模拟 GPU 完成一批工作的耗时（毫秒）
    #[serde(default = "default_gpu_latency")]
    pub gpu_latency_ms: u64,

    /// 模拟输出是否支持撕裂（可变刷新率）
    #[serde(default = "default_tearing")]
    pub tearing_supported: bool,
}

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 渲染指定帧数后退出，0 表示不限
    #[serde(default)]
    pub max_frames: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件路径
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_title() -> String { "DirectEcs".to_string() }
fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_resizable() -> bool { true }
fn default_vsync() -> bool { true }
fn default_clear_color() -> [f32; 4] { [0.4, 0.6, 0.9, 1.0] }
fn default_gpu_latency() -> u64 { 2 }
fn default_tearing() -> bool { true }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_log_file() -> String { "direct_ecs.log".to_string() }

#[cfg(target_os = "windows")]
fn default_backend() -> GraphicsBackend { GraphicsBackend::Dx12 }
#[cfg(not(target_os = "windows"))]
fn default_backend() -> GraphicsBackend { GraphicsBackend::Simulated }

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            width: default_width(),
            height: default_height(),
            resizable: default_resizable(),
        }
    }
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            vsync: default_vsync(),
            use_warp: false,
            clear_color: default_clear_color(),
            fence_timeout_ms: None,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            gpu_latency_ms: default_gpu_latency(),
            tearing_supported: default_tearing(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_file: default_log_file(),
        }
    }
}

impl Config {
    /// 从配置文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str))?;

        Self::from_toml_str(&contents)
    }

    /// 从 TOML 字符串解析
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--dx12` / `--sim`: 选择图形后端
    /// - `--vsync` / `--no-vsync`: 垂直同步开关
    /// - `--warp`: 使用 WARP 软件适配器
    /// - `--width <value>` / `--height <value>`: 初始窗口尺寸
    /// - `--frames <value>`: 渲染指定帧数后退出
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        for arg in &args {
            match arg.as_str() {
                "--dx12" => self.graphics.backend = GraphicsBackend::Dx12,
                "--sim" => self.graphics.backend = GraphicsBackend::Simulated,
                "--vsync" => self.graphics.vsync = true,
                "--no-vsync" => self.graphics.vsync = false,
                "--warp" => self.graphics.use_warp = true,
                _ => {}
            }
        }

        if let Some(width) = parse_flag_value(&args, "--width") {
            self.window.width = width;
        }
        if let Some(height) = parse_flag_value(&args, "--height") {
            self.window.height = height;
        }
        if let Some(frames) = parse_flag_value(&args, "--frames") {
            self.app.max_frames = frames;
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::InvalidValue {
                field: "window.width/height".to_string(),
                reason: "Window dimensions must be greater than 0".to_string(),
            }
            .into());
        }

        if self.graphics.clear_color.iter().any(|c| !(0.0..=1.0).contains(c)) {
            return Err(ConfigError::InvalidValue {
                field: "graphics.clear_color".to_string(),
                reason: "Color components must be within [0, 1]".to_string(),
            }
            .into());
        }

        if self.graphics.fence_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "graphics.fence_timeout_ms".to_string(),
                reason: "Timeout must be greater than 0 (omit it for unbounded waits)".to_string(),
            }
            .into());
        }

        #[cfg(not(target_os = "windows"))]
        if self.graphics.backend == GraphicsBackend::Dx12 {
            return Err(ConfigError::InvalidValue {
                field: "graphics.backend".to_string(),
                reason: "DX12 backend is only available on Windows".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

impl GraphicsConfig {
    /// Fence 等待超时
    pub fn fence_timeout(&self) -> Option<Duration> {
        self.fence_timeout_ms.map(Duration::from_millis)
    }
}

impl SimulationConfig {
    /// 模拟 GPU 延迟
    pub fn gpu_latency(&self) -> Duration {
        Duration::from_millis(self.gpu_latency_ms)
    }
}

impl GraphicsBackend {
    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            GraphicsBackend::Dx12 => "DirectX 12",
            GraphicsBackend::Simulated => "Simulated",
        }
    }
}

fn parse_flag_value<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    let idx = args.iter().position(|a| a == flag)?;
    args.get(idx + 1)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
        assert!(config.graphics.vsync);
        assert_eq!(config.graphics.fence_timeout(), None);
        assert_eq!(config.app.max_frames, 0);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = Config::from_toml_str(
            r#"
            [window]
            title = "Sandbox"

            [graphics]
            backend = "simulated"
            vsync = false
            fence_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "Sandbox");
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.graphics.backend, GraphicsBackend::Simulated);
        assert!(!config.graphics.vsync);
        assert_eq!(config.graphics.fence_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_parse_error() {
        let err = Config::from_toml_str("[graphics]\nbackend = \"vulkan\"").unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.apply_args(["direct_ecs", "--sim", "--no-vsync", "--width", "640", "--height", "480", "--frames", "30"]);

        assert_eq!(config.graphics.backend, GraphicsBackend::Simulated);
        assert!(!config.graphics.vsync);
        assert_eq!(config.window.width, 640);
        assert_eq!(config.window.height, 480);
        assert_eq!(config.app.max_frames, 30);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.graphics.backend = GraphicsBackend::Simulated;
        assert!(config.validate().is_ok());

        config.window.width = 0;
        assert!(config.validate().is_err());

        config.window.width = 800;
        config.graphics.fence_timeout_ms = Some(0);
        assert!(config.validate().is_err());

        config.graphics.fence_timeout_ms = None;
        config.graphics.clear_color = [1.5, 0.0, 0.0, 1.0];
        assert!(config.validate().is_err());
    }
}
