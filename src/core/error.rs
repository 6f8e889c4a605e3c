//! 错误处理模块
//!
//! 定义了引擎中使用的统一错误类型，使用 `thiserror` 提供友好的错误消息。
//!
//! # 错误分类
//!
//! - 启动阶段的原生调用失败（设备、队列、交换链、Fence 创建）：直接终止启动
//! - 设备丢失：启动成功后在队列/Fence 操作中检测到，终止帧循环
//! - 单帧内的提交/呈现失败：视为致命错误，不做回滚

use thiserror::Error;

/// 引擎统一的 Result 类型
pub type Result<T> = std::result::Result<T, DirectEcsError>;

/// DirectEcs 引擎的错误类型
#[derive(Debug, Error)]
pub enum DirectEcsError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// 图形 API 错误
    #[error("Graphics error: {0}")]
    Graphics(#[from] GraphicsError),

    /// 窗口创建或平台层错误
    #[error("Window error: {0}")]
    Window(String),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 日志系统错误
    #[error("Log error: {0}")]
    Log(String),

    /// 初始化错误
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// 运行时错误
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// 配置相关的错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置文件未找到
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    /// 配置文件解析失败
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// 配置值无效
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
#[derive(Debug, Error)]
pub enum GraphicsError {
    /// 设备创建失败
    #[error("Device creation failed: {0}")]
    DeviceCreation(String),

    /// 命令队列创建失败
    #[error("Command queue creation failed: {0}")]
    QueueCreation(String),

    /// 交换链错误
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// 资源创建失败（Fence、分配器、命令列表、描述符堆等）
    #[error("Resource creation failed: {0}")]
    ResourceCreation(String),

    /// 命令记录或执行失败
    #[error("Command execution failed: {0}")]
    CommandExecution(String),

    /// 设备丢失
    #[error("Device lost: {0}")]
    DeviceLost(String),

    /// 呈现失败
    #[error("Present failed: {0}")]
    PresentFailed(String),

    /// 等待 Fence 超时
    #[error("Timed out waiting for fence value {value}")]
    WaitTimeout { value: u64 },
}

impl DirectEcsError {
    /// 是否为设备丢失错误
    pub fn is_device_lost(&self) -> bool {
        matches!(self, DirectEcsError::Graphics(GraphicsError::DeviceLost(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err: DirectEcsError = GraphicsError::WaitTimeout { value: 7 }.into();
        assert_eq!(err.to_string(), "Graphics error: Timed out waiting for fence value 7");

        let err: DirectEcsError = ConfigError::InvalidValue {
            field: "window.width".to_string(),
            reason: "must be positive".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid value for 'window.width': must be positive"
        );
    }

    #[test]
    fn test_device_lost_detection() {
        let lost: DirectEcsError = GraphicsError::DeviceLost("removed".to_string()).into();
        assert!(lost.is_device_lost());

        let other: DirectEcsError = GraphicsError::PresentFailed("busy".to_string()).into();
        assert!(!other.is_device_lost());
    }
}
