//! 基础设施层
//!
//! 提供激活容器的具体实现：
//! - 请求与上下文
//! - 策略分派与包装器
//! - 片段编译与例程缓存
//! - 生命周期作用域与释放跟踪

// 容器实现
pub mod container;

// 重新导出API
pub use container::{ServiceContainer, ServiceLifetime};
