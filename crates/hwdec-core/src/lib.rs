//! # hwdec-core
//!
//! hwdec 解码编排层核心库, 提供错误分类、对齐工具、资源句柄与设备协作接口.
//!
//! 编排层本身不提交命令, 也不管理显存放置策略; 这些由实现 [`Device`] 的外部协作方负责.

pub mod align;
pub mod chroma;
pub mod device;
pub mod error;
pub mod resource;

// 重导出常用类型
pub use chroma::ChromaFormat;
pub use device::{Device, DeviceOp, MockDevice};
pub use error::{ErrorKind, HwdecError, HwdecResult};
pub use resource::{AllocFlags, BufferDesc, Engine, ResourceHandle, SyncObject};
