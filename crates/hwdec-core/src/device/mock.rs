//! 记录型模拟设备.
//!
//! 在内存中保存缓冲区内容, 并记录全部设备操作, 供测试与命令行回放使用.
//! 拷贝立即执行, signal/wait 只做记录.

use std::collections::HashMap;

use bytes::BytesMut;
use log::debug;

use super::Device;
use crate::resource::{AllocFlags, BufferDesc, Engine, ResourceHandle, SyncObject};
use crate::{HwdecError, HwdecResult};

/// 设备操作记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOp {
    Allocate {
        handle: ResourceHandle,
        name: &'static str,
        size: u32,
    },
    Free(ResourceHandle),
    Write {
        handle: ResourceHandle,
        offset: u32,
        len: u32,
    },
    Copy {
        engine: Engine,
        src: ResourceHandle,
        dst: ResourceHandle,
        dst_offset: u32,
        size: u32,
    },
    CreateSync(SyncObject),
    Signal(Engine, SyncObject),
    Wait(Engine, SyncObject),
    AcquireCommandBuffer(Engine),
    Submit(Engine),
}

struct MockBuffer {
    name: &'static str,
    data: BytesMut,
}

/// 模拟设备
#[derive(Default)]
pub struct MockDevice {
    buffers: HashMap<u32, MockBuffer>,
    ops: Vec<DeviceOp>,
    next_handle: u32,
    next_sync: u32,
    /// 剩余可成功分配次数, `None` 表示不限
    alloc_budget: Option<usize>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后仅允许 `count` 次分配成功, 用于注入资源耗尽
    pub fn fail_allocations_after(&mut self, count: usize) {
        self.alloc_budget = Some(count);
    }

    /// 全部操作记录
    pub fn ops(&self) -> &[DeviceOp] {
        &self.ops
    }

    /// 清空操作记录 (不影响缓冲区)
    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// 读取缓冲区内容
    pub fn contents(&self, handle: ResourceHandle) -> Option<&[u8]> {
        self.buffers.get(&handle.0).map(|b| &b.data[..])
    }

    /// 当前存活的缓冲区数量
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// 按名称统计存活缓冲区
    pub fn live_buffers_named(&self, name: &str) -> usize {
        self.buffers.values().filter(|b| b.name == name).count()
    }

    /// 统计指定名称缓冲区的分配次数
    pub fn allocation_count(&self, name: &str) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, DeviceOp::Allocate { name: n, .. } if *n == name))
            .count()
    }

    /// 统计在指定命令流上发起的拷贝次数
    pub fn copy_count(&self, engine: Engine) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, DeviceOp::Copy { engine: e, .. } if *e == engine))
            .count()
    }

    /// 创建一个填充了给定内容的缓冲区, 模拟调用方提交的码流
    pub fn upload(&mut self, name: &'static str, data: &[u8]) -> HwdecResult<ResourceHandle> {
        let size = u32::try_from(data.len())
            .map_err(|_| HwdecError::InvalidParameter(format!("{name} 超过 4GiB")))?;
        let handle = self.allocate(&BufferDesc::new(name, size).with_flags(AllocFlags::CPU_WRITE))?;
        self.write(handle, 0, data)?;
        Ok(handle)
    }

    fn buffer_mut(&mut self, handle: ResourceHandle) -> HwdecResult<&mut MockBuffer> {
        self.buffers.get_mut(&handle.0).ok_or_else(|| {
            HwdecError::InternalConsistency(format!("访问未分配的缓冲区 {handle}"))
        })
    }
}

impl Device for MockDevice {
    fn allocate(&mut self, desc: &BufferDesc) -> HwdecResult<ResourceHandle> {
        if let Some(budget) = self.alloc_budget.as_mut() {
            if *budget == 0 {
                return Err(HwdecError::ResourceExhaustion(format!(
                    "分配 {} ({} 字节) 失败",
                    desc.name, desc.size
                )));
            }
            *budget -= 1;
        }

        self.next_handle += 1;
        let handle = ResourceHandle(self.next_handle);
        let data = BytesMut::zeroed(desc.size as usize);
        self.buffers.insert(
            handle.0,
            MockBuffer {
                name: desc.name,
                data,
            },
        );
        debug!("mock: 分配 {} {} 字节 -> {}", desc.name, desc.size, handle);
        self.ops.push(DeviceOp::Allocate {
            handle,
            name: desc.name,
            size: desc.size,
        });
        Ok(handle)
    }

    fn free(&mut self, handle: ResourceHandle) {
        if self.buffers.remove(&handle.0).is_some() {
            self.ops.push(DeviceOp::Free(handle));
        }
    }

    fn buffer_size(&self, handle: ResourceHandle) -> Option<u32> {
        self.buffers.get(&handle.0).map(|b| b.data.len() as u32)
    }

    fn write(&mut self, handle: ResourceHandle, offset: u32, data: &[u8]) -> HwdecResult<()> {
        let buffer = self.buffer_mut(handle)?;
        let start = offset as usize;
        let end = start + data.len();
        if end > buffer.data.len() {
            return Err(HwdecError::InvalidParameter(format!(
                "写入 {handle} 越界: {end} > {}",
                buffer.data.len()
            )));
        }
        buffer.data[start..end].copy_from_slice(data);
        self.ops.push(DeviceOp::Write {
            handle,
            offset,
            len: data.len() as u32,
        });
        Ok(())
    }

    fn copy(
        &mut self,
        engine: Engine,
        src: ResourceHandle,
        src_offset: u32,
        dst: ResourceHandle,
        dst_offset: u32,
        size: u32,
    ) -> HwdecResult<()> {
        let chunk = {
            let source = self.buffer_mut(src)?;
            let start = src_offset as usize;
            let end = start + size as usize;
            if end > source.data.len() {
                return Err(HwdecError::InvalidParameter(format!(
                    "拷贝源 {src} 越界: {end} > {}",
                    source.data.len()
                )));
            }
            source.data[start..end].to_vec()
        };

        let target = self.buffer_mut(dst)?;
        let start = dst_offset as usize;
        let end = start + chunk.len();
        if end > target.data.len() {
            return Err(HwdecError::InvalidParameter(format!(
                "拷贝目标 {dst} 越界: {end} > {}",
                target.data.len()
            )));
        }
        target.data[start..end].copy_from_slice(&chunk);

        self.ops.push(DeviceOp::Copy {
            engine,
            src,
            dst,
            dst_offset,
            size,
        });
        Ok(())
    }

    fn create_sync_object(&mut self) -> HwdecResult<SyncObject> {
        self.next_sync += 1;
        let sync = SyncObject(self.next_sync);
        self.ops.push(DeviceOp::CreateSync(sync));
        Ok(sync)
    }

    fn signal(&mut self, engine: Engine, sync: SyncObject) -> HwdecResult<()> {
        self.ops.push(DeviceOp::Signal(engine, sync));
        Ok(())
    }

    fn wait(&mut self, engine: Engine, sync: SyncObject) -> HwdecResult<()> {
        self.ops.push(DeviceOp::Wait(engine, sync));
        Ok(())
    }

    fn acquire_command_buffer(&mut self, engine: Engine) -> HwdecResult<()> {
        self.ops.push(DeviceOp::AcquireCommandBuffer(engine));
        Ok(())
    }

    fn submit(&mut self, engine: Engine) -> HwdecResult<()> {
        self.ops.push(DeviceOp::Submit(engine));
        Ok(())
    }
}
