//! 分片码流拼接.
//!
//! 一帧的码流可能分多次提交. 首次提交时根据最后一个 slice 的偏移与长度得到整帧字节数,
//! 已交付字节不足时把各分片按字节紧密拼接到拼接缓冲区, 直到累计字节达到整帧字节数.
//! 拼接缓冲区大小按 cacheline 对齐, 分片位置不对齐.
//! 拷贝在独立的拷贝命令流上执行, 帧完整后由 fence 通知主解码流.

use log::debug;

use hwdec_core::align::CACHELINE_SIZE;
use hwdec_core::{
    AllocFlags, BufferDesc, Device, Engine, HwdecError, HwdecResult, ResourceHandle, SyncObject,
};

use crate::params::SliceParameters;

/// 主解码读取码流的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// 调用方提交的码流缓冲区
    Caller { buffer: ResourceHandle, offset: u32 },
    /// 拼接缓冲区
    Concatenated { buffer: ResourceHandle, size: u32 },
}

impl DataSource {
    pub fn buffer(&self) -> ResourceHandle {
        match self {
            Self::Caller { buffer, .. } | Self::Concatenated { buffer, .. } => *buffer,
        }
    }
}

fn align_cacheline(value: u32) -> HwdecResult<u32> {
    value
        .checked_add(CACHELINE_SIZE - 1)
        .map(|v| v & !(CACHELINE_SIZE - 1))
        .ok_or_else(|| HwdecError::InvalidParameter(format!("码流长度 {value} 溢出")))
}

/// 码流拼接器
#[derive(Debug, Default)]
pub struct BitstreamReassembler {
    /// 最后一个 slice 的结束位置
    frame_end: u32,
    /// 按 cacheline 对齐的整帧估算, 用于缓冲区大小
    estimate: u32,
    first_call: bool,
    incomplete: bool,
    copy_in_use: bool,
    write_offset: u32,
    buffer: Option<ResourceHandle>,
    capacity: u32,
    sync: Option<SyncObject>,
    copy_passes: usize,
}

impl BitstreamReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新帧首次提交: 按最后一个 slice 估算整帧大小
    pub fn initialize(&mut self, last_slice: &SliceParameters) -> HwdecResult<()> {
        self.frame_end = last_slice.data_end()?;
        self.estimate = align_cacheline(self.frame_end)?;
        self.first_call = true;
        self.incomplete = false;
        self.copy_in_use = false;
        self.write_offset = 0;
        self.copy_passes = 0;
        Ok(())
    }

    /// 处理一次提交的码流
    ///
    /// 首次提交时, 自 `data_offset` 起交付的字节覆盖整帧则直接完成, 否则进入拷贝模式.
    /// 后续提交超出拼接缓冲区容量时返回 `BitstreamOverrun`.
    pub fn check_and_append(
        &mut self,
        device: &mut dyn Device,
        src: ResourceHandle,
        data_offset: u32,
        data_size: u32,
    ) -> HwdecResult<()> {
        if self.first_call {
            self.first_call = false;
            if data_size >= self.frame_end {
                return Ok(());
            }

            debug!(
                "码流分多次提交: 整帧 {} 字节, 首次交付 {data_size} 字节",
                self.frame_end
            );
            if self.buffer.is_none() || self.capacity < self.estimate {
                if let Some(old) = self.buffer.take() {
                    device.free(old);
                }
                let desc = BufferDesc::new("BitstreamCopyBuffer", self.estimate)
                    .with_flags(AllocFlags::ZEROED);
                self.buffer = Some(device.allocate(&desc)?);
                self.capacity = self.estimate;
            }
            self.incomplete = true;
            if data_size > 0 {
                self.copy_chunk(device, src, data_offset, data_size)?;
            }
            return Ok(());
        }

        if data_size > 0 {
            self.copy_chunk(device, src, 0, data_size)?;
        }
        Ok(())
    }

    fn copy_chunk(
        &mut self,
        device: &mut dyn Device,
        src: ResourceHandle,
        src_offset: u32,
        size: u32,
    ) -> HwdecResult<()> {
        let dst = self.buffer.ok_or_else(|| {
            HwdecError::InternalConsistency("拼接缓冲区未分配".into())
        })?;
        let end = self
            .write_offset
            .checked_add(size)
            .filter(|&end| end <= self.capacity)
            .ok_or(HwdecError::BitstreamOverrun {
                offset: self.write_offset,
                size,
                capacity: self.capacity,
            })?;

        device.acquire_command_buffer(Engine::Copy)?;
        device.copy(Engine::Copy, src, src_offset, dst, self.write_offset, size)?;
        self.write_offset = end;
        self.copy_in_use = true;
        self.copy_passes += 1;

        if self.write_offset >= self.frame_end {
            self.incomplete = false;
            let sync = match self.sync {
                Some(sync) => sync,
                None => {
                    let sync = device.create_sync_object()?;
                    self.sync = Some(sync);
                    sync
                }
            };
            device.signal(Engine::Copy, sync)?;
            device.wait(Engine::Video, sync)?;
            debug!("码流拼接完成: {} 字节, {} 次拷贝", self.write_offset, self.copy_passes);
        }
        device.submit(Engine::Copy)
    }

    /// 帧码流尚未交付完整
    pub fn is_incomplete(&self) -> bool {
        self.incomplete
    }

    /// 本帧使用了拼接缓冲区
    pub fn copy_in_use(&self) -> bool {
        self.copy_in_use
    }

    pub fn estimate(&self) -> u32 {
        self.estimate
    }

    /// 整帧字节数
    pub fn frame_end(&self) -> u32 {
        self.frame_end
    }

    pub fn write_offset(&self) -> u32 {
        self.write_offset
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn buffer(&self) -> Option<ResourceHandle> {
        self.buffer
    }

    /// 本帧发起的拷贝次数
    pub fn copy_passes(&self) -> usize {
        self.copy_passes
    }

    /// 主解码读取码流的位置
    pub fn data_source(&self, caller: ResourceHandle, caller_offset: u32) -> DataSource {
        match self.buffer {
            Some(buffer) if self.copy_in_use => DataSource::Concatenated {
                buffer,
                size: self.write_offset,
            },
            _ => DataSource::Caller {
                buffer: caller,
                offset: caller_offset,
            },
        }
    }

    /// 释放拼接缓冲区
    pub fn release(&mut self, device: &mut dyn Device) {
        if let Some(buffer) = self.buffer.take() {
            device.free(buffer);
        }
        self.capacity = 0;
        self.copy_in_use = false;
        self.incomplete = false;
    }
}
