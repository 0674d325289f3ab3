//! MV 时域缓冲池.
//!
//! 固定容量 (参考帧上限 + 1) 的缓冲池, 按帧索引记录归属.
//! 每帧获取前先清空占用标记, 再按上一帧参考列表重新标记, 只有未被引用的槽位可被复用.

use log::debug;

use hwdec_core::{BufferDesc, Device, HwdecError, HwdecResult, ResourceHandle};

use crate::limits::NUM_MV_BUFFERS;

/// 缓冲池槽位
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MvBufferSlot {
    /// 归属帧的 DPB 索引
    pub frame_id: Option<u8>,
    pub in_use: bool,
    pub handle: Option<ResourceHandle>,
    pub size: u32,
}

/// MV 缓冲池
#[derive(Debug)]
pub struct MvBufferPool {
    slots: [MvBufferSlot; NUM_MV_BUFFERS],
}

impl Default for MvBufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MvBufferPool {
    pub fn new() -> Self {
        Self {
            slots: [MvBufferSlot::default(); NUM_MV_BUFFERS],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: u8) -> Option<&MvBufferSlot> {
        self.slots.get(index as usize)
    }

    /// 当前占用槽位数量
    pub fn in_use_count(&self) -> usize {
        self.slots.iter().filter(|s| s.in_use).count()
    }

    /// 清除全部占用标记与归属
    pub fn clear_all(&mut self) {
        for slot in &mut self.slots {
            slot.in_use = false;
            slot.frame_id = None;
        }
    }

    /// 重新标记仍被参考帧 `frame_idx` 持有的槽位
    pub fn mark_in_use(&mut self, index: u8, frame_idx: u8) -> HwdecResult<()> {
        let slot = self.slots.get_mut(index as usize).ok_or_else(|| {
            HwdecError::InternalConsistency(format!("MV 槽位 {index} 超出缓冲池容量"))
        })?;
        slot.in_use = true;
        slot.frame_id = Some(frame_idx);
        Ok(())
    }

    /// 为当前帧获取一个空闲槽位
    ///
    /// 池容量保证合法配置下总有空闲槽位, 耗尽视为内部一致性错误.
    pub fn acquire(&mut self, frame_idx: u8) -> HwdecResult<u8> {
        let index = self
            .slots
            .iter()
            .position(|s| !s.in_use)
            .ok_or_else(|| {
                HwdecError::InternalConsistency(format!(
                    "MV 缓冲池耗尽, 无法为帧 {frame_idx} 分配槽位"
                ))
            })?;
        let slot = &mut self.slots[index];
        slot.in_use = true;
        slot.frame_id = Some(frame_idx);
        debug!("MV 槽位 {index} -> 帧 {frame_idx}");
        Ok(index as u8)
    }

    /// 查找指定帧占用的槽位
    pub fn find_slot_for_frame(&self, frame_idx: u8) -> Option<u8> {
        self.slots
            .iter()
            .position(|s| s.in_use && s.frame_id == Some(frame_idx))
            .map(|i| i as u8)
    }

    /// 确保槽位后备缓冲区存在且不小于 `size`
    pub fn ensure_buffer(
        &mut self,
        index: u8,
        size: u32,
        device: &mut dyn Device,
    ) -> HwdecResult<ResourceHandle> {
        let slot = self.slots.get_mut(index as usize).ok_or_else(|| {
            HwdecError::InternalConsistency(format!("MV 槽位 {index} 超出缓冲池容量"))
        })?;
        if let Some(handle) = slot.handle {
            if slot.size >= size {
                return Ok(handle);
            }
            device.free(handle);
            slot.handle = None;
        }
        let handle = device.allocate(&BufferDesc::new("MvTemporalBuffer", size))?;
        slot.handle = Some(handle);
        slot.size = size;
        Ok(handle)
    }

    /// 已分配的后备缓冲区
    pub fn handle(&self, index: u8) -> Option<ResourceHandle> {
        self.slots.get(index as usize).and_then(|s| s.handle)
    }

    /// 释放全部后备缓冲区并重置槽位
    pub fn release_all(&mut self, device: &mut dyn Device) {
        for slot in &mut self.slots {
            if let Some(handle) = slot.handle.take() {
                device.free(handle);
            }
            *slot = MvBufferSlot::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwdec_core::MockDevice;

    #[test]
    fn test_acquire_skips_referenced_slots() {
        let mut pool = MvBufferPool::new();
        let a = pool.acquire(0).expect("获取失败");
        let b = pool.acquire(1).expect("获取失败");
        assert_ne!(a, b);

        // 新帧: 只有帧 1 仍被参考
        pool.clear_all();
        pool.mark_in_use(b, 1).expect("标记失败");
        let c = pool.acquire(2).expect("获取失败");
        assert_ne!(c, b, "仍被参考的槽位不能被复用");
        assert_eq!(c, a, "未被参考的槽位应优先复用");
        assert_eq!(pool.find_slot_for_frame(1), Some(b));
        assert_eq!(pool.find_slot_for_frame(0), None, "槽位已转给新帧");
    }

    #[test]
    fn test_exhaustion_is_internal_error() {
        let mut pool = MvBufferPool::new();
        for i in 0..pool.capacity() {
            pool.acquire(i as u8).expect("获取失败");
        }
        let err = pool.acquire(100).expect_err("池满时应失败");
        assert_eq!(err.kind(), hwdec_core::ErrorKind::InternalConsistency);
    }

    #[test]
    fn test_buffer_grows_with_size_class() {
        let mut dev = MockDevice::new();
        let mut pool = MvBufferPool::new();
        let idx = pool.acquire(3).expect("获取失败");
        let h1 = pool.ensure_buffer(idx, 1024, &mut dev).expect("分配失败");
        let h2 = pool.ensure_buffer(idx, 512, &mut dev).expect("分配失败");
        assert_eq!(h1, h2, "尺寸未增长时复用");
        let h3 = pool.ensure_buffer(idx, 4096, &mut dev).expect("分配失败");
        assert_ne!(h1, h3);
        assert_eq!(dev.live_buffers(), 1);
        pool.release_all(&mut dev);
        assert_eq!(dev.live_buffers(), 0);
    }
}
