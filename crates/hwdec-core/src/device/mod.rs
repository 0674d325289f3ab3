//! 设备协作接口.
//!
//! 编排层通过 [`Device`] 申请/释放缓冲区、发起硬件拷贝、创建同步对象并提交命令流.
//! 命令本身的编码由上层的命令发射器负责, 设备只看到"开始/提交"边界.

mod mock;

pub use mock::{DeviceOp, MockDevice};

use crate::HwdecResult;
use crate::resource::{BufferDesc, Engine, ResourceHandle, SyncObject};

/// 设备上下文 trait
///
/// 所有同步均通过显式的 signal/wait 表达, 真正的等待发生在硬件时间线上.
pub trait Device: Send {
    /// 分配线性缓冲区
    ///
    /// 失败时返回 `ResourceExhaustion`.
    fn allocate(&mut self, desc: &BufferDesc) -> HwdecResult<ResourceHandle>;

    /// 释放缓冲区, 重复释放或未知句柄被忽略
    fn free(&mut self, handle: ResourceHandle);

    /// 查询缓冲区字节大小
    fn buffer_size(&self, handle: ResourceHandle) -> Option<u32>;

    /// CPU 写入缓冲区
    fn write(&mut self, handle: ResourceHandle, offset: u32, data: &[u8]) -> HwdecResult<()>;

    /// 在指定命令流上发起硬件拷贝
    fn copy(
        &mut self,
        engine: Engine,
        src: ResourceHandle,
        src_offset: u32,
        dst: ResourceHandle,
        dst_offset: u32,
        size: u32,
    ) -> HwdecResult<()>;

    /// 创建同步对象
    fn create_sync_object(&mut self) -> HwdecResult<SyncObject>;

    /// 命令流执行到此处时 signal
    fn signal(&mut self, engine: Engine, sync: SyncObject) -> HwdecResult<()>;

    /// 命令流在此处等待 signal
    fn wait(&mut self, engine: Engine, sync: SyncObject) -> HwdecResult<()>;

    /// 获取命令缓冲区, 之后发射的命令写入该缓冲区
    fn acquire_command_buffer(&mut self, engine: Engine) -> HwdecResult<()>;

    /// 提交命令缓冲区
    fn submit(&mut self, engine: Engine) -> HwdecResult<()>;
}
