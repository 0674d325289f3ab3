//! 资源句柄与命令流标识.

use std::fmt;

use bitflags::bitflags;

/// 设备缓冲区句柄
///
/// 由 [`crate::Device`] 分配, 编排层只持有句柄, 不直接访问内存.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(pub u32);

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "res#{}", self.0)
    }
}

/// 同步对象 (fence / semaphore)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncObject(pub u32);

/// 命令流 (GPU 上下文)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    /// 主视频解码流
    Video,
    /// 独立的码流拷贝流, 与主流之间通过 fence 同步
    Copy,
    /// 多管线解码时第 n 条管线的二级命令流
    Pipe(u8),
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Copy => write!(f, "copy"),
            Self::Pipe(n) => write!(f, "pipe{n}"),
        }
    }
}

bitflags! {
    /// 缓冲区分配标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AllocFlags: u32 {
        /// 分配后清零
        const ZEROED     = 1 << 0;
        /// CPU 可写 (DMEM 等需要上传数据的缓冲区)
        const CPU_WRITE  = 1 << 1;
        /// 解码输出表面 (参考帧候选)
        const SURFACE    = 1 << 2;
    }
}

/// 线性缓冲区分配描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    /// 调试名称
    pub name: &'static str,
    /// 字节大小
    pub size: u32,
    pub flags: AllocFlags,
}

impl BufferDesc {
    pub fn new(name: &'static str, size: u32) -> Self {
        Self {
            name,
            size,
            flags: AllocFlags::empty(),
        }
    }

    pub fn with_flags(mut self, flags: AllocFlags) -> Self {
        self.flags |= flags;
        self
    }
}
