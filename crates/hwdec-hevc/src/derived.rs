//! 预处理派生命令流与 DMEM 的轮转缓冲池.
//!
//! 每个槽位持有一块 DMEM 缓冲区和一块派生命令流缓冲区.
//! 每个经过预处理的帧轮转一次索引, 使第 N 帧的预处理可以与第 N-1 帧的主解码重叠.

use log::debug;

use hwdec_core::{AllocFlags, BufferDesc, Device, HwdecError, HwdecResult, ResourceHandle};

/// 轮转池最小槽位数
pub const MIN_DERIVED_POOL_SIZE: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Backing {
    handle: Option<ResourceHandle>,
    size: u32,
}

impl Backing {
    fn ensure(
        &mut self,
        name: &'static str,
        size: u32,
        device: &mut dyn Device,
    ) -> HwdecResult<ResourceHandle> {
        if let Some(handle) = self.handle {
            if self.size >= size {
                return Ok(handle);
            }
            device.free(handle);
            self.handle = None;
        }
        let desc = BufferDesc::new(name, size).with_flags(AllocFlags::CPU_WRITE);
        let handle = device.allocate(&desc)?;
        self.handle = Some(handle);
        self.size = size;
        Ok(handle)
    }

    fn release(&mut self, device: &mut dyn Device) {
        if let Some(handle) = self.handle.take() {
            device.free(handle);
        }
        self.size = 0;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    dmem: Backing,
    stream: Backing,
}

/// 当前帧使用的派生资源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivedSlot {
    pub index: usize,
    pub dmem: ResourceHandle,
    pub dmem_size: u32,
    pub stream: ResourceHandle,
    pub stream_size: u32,
    /// 派生命令流个数 (真实 tile 模式下每个 tile 列一段)
    pub stream_count: usize,
}

/// 轮转缓冲池
#[derive(Debug)]
pub struct DerivedStreamPool {
    slots: Vec<Slot>,
    index: usize,
    rotations: usize,
}

impl DerivedStreamPool {
    /// 创建缓冲池, 槽位数至少为 2
    pub fn new(size: usize) -> Self {
        Self {
            slots: vec![Slot::default(); size.max(MIN_DERIVED_POOL_SIZE)],
            index: 0,
            rotations: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    /// 已经轮转的次数
    pub fn rotations(&self) -> usize {
        self.rotations
    }

    /// 轮转到下一个槽位并确保其缓冲区足够大
    ///
    /// 首帧使用槽位 0, 之后每次调用前进一个槽位.
    pub fn rotate_and_prepare(
        &mut self,
        device: &mut dyn Device,
        dmem_size: u32,
        stream_size: u32,
        stream_count: usize,
    ) -> HwdecResult<DerivedSlot> {
        if self.rotations > 0 {
            self.index = (self.index + 1) % self.slots.len();
        }
        self.rotations += 1;

        let total_stream = u32::try_from(stream_count)
            .ok()
            .and_then(|n| n.checked_mul(stream_size))
            .ok_or_else(|| {
                HwdecError::InvalidParameter(format!(
                    "派生命令流 {stream_count}x{stream_size} 字节溢出"
                ))
            })?;

        let slot = &mut self.slots[self.index];
        let dmem = slot.dmem.ensure("DmemBuffer", dmem_size, device)?;
        let stream = slot.stream.ensure("SecondLevelBatchBuffer", total_stream, device)?;
        debug!(
            "派生资源槽位 {}: DMEM {} 字节, 命令流 {}x{} 字节",
            self.index, dmem_size, stream_count, stream_size
        );
        Ok(DerivedSlot {
            index: self.index,
            dmem,
            dmem_size,
            stream,
            stream_size,
            stream_count,
        })
    }

    /// 释放全部缓冲区
    pub fn release_all(&mut self, device: &mut dyn Device) {
        for slot in &mut self.slots {
            slot.dmem.release(device);
            slot.stream.release(device);
        }
        self.index = 0;
        self.rotations = 0;
    }
}
