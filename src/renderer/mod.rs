//! 渲染器模块
//!
//! 与具体图形 API 无关的命令提交与帧同步核心，只通过 `gfx::backend::GpuDevice` 访问设备。
//!
//! # 架构设计
//!
//! - `sync`：Fence 跟踪器
//! - `command`：队列类型、命令记录上下文、命令分配器池
//! - `queue`：命令队列，以及按队列类型查找的三队列集合
//! - `resource` / `descriptor`：后缓冲与其 RTV
//! - `present`：帧呈现环（交换链、后缓冲轮转、帧协议）

pub mod sync;
pub mod command;
pub mod queue;
pub mod resource;
pub mod descriptor;
pub mod present;

pub use command::{CommandAllocatorPool, QueueType, RecordingContext};
pub use present::{FramePresentationRing, PresentPolicy, BUFFER_COUNT};
pub use queue::{CommandQueue, CommandQueues};
pub use resource::{BackBuffer, ResourceState};
pub use sync::{FenceTracker, FenceValue};
