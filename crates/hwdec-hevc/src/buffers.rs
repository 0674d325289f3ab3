//! Scratch 缓冲区生命周期管理.
//!
//! 行缓冲、tile 行/列缓冲等内部缓冲区的大小取决于帧尺寸与 CTB 尺寸.
//! 管理器记录历史最大尺寸 (水位线), 只在需求超过已分配大小时才释放并重新分配,
//! 从不缩小. 水位线在一帧的全部缓冲区按旧水位线完成计算后才更新.

use std::collections::BTreeMap;
use std::fmt;

use log::debug;

use hwdec_core::{BufferDesc, ChromaFormat, Device, HwdecResult, ResourceHandle};

use crate::generation::{HwGeneration, RowStoreCache, SizingParams};

/// 内部缓冲区种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferKind {
    DeblockLine,
    DeblockTileLine,
    DeblockTileColumn,
    MetadataLine,
    MetadataTileLine,
    MetadataTileColumn,
    SaoLine,
    SaoTileLine,
    SaoTileColumn,
    /// 当前帧 MV 时域缓冲 (由 MV 缓冲池持有)
    MvTemporal,
    /// 多管线解码前端输出的 CABAC 数据
    CabacStreamout,
    /// 帧内块拷贝时当前图像的环路滤波前副本
    RefBeforeLoopFilter,
}

impl BufferKind {
    /// 每帧都需要的行/tile 缓冲区
    pub const SCRATCH: [Self; 9] = [
        Self::DeblockLine,
        Self::DeblockTileLine,
        Self::DeblockTileColumn,
        Self::MetadataLine,
        Self::MetadataTileLine,
        Self::MetadataTileColumn,
        Self::SaoLine,
        Self::SaoTileLine,
        Self::SaoTileColumn,
    ];

    /// 分配时使用的调试名称
    pub fn name(self) -> &'static str {
        match self {
            Self::DeblockLine => "DeblockingLineBuffer",
            Self::DeblockTileLine => "DeblockingTileLineBuffer",
            Self::DeblockTileColumn => "DeblockingTileColumnBuffer",
            Self::MetadataLine => "MetadataLineBuffer",
            Self::MetadataTileLine => "MetadataTileLineBuffer",
            Self::MetadataTileColumn => "MetadataTileColumnBuffer",
            Self::SaoLine => "SaoLineBuffer",
            Self::SaoTileLine => "SaoTileLineBuffer",
            Self::SaoTileColumn => "SaoTileColumnBuffer",
            Self::MvTemporal => "MvTemporalBuffer",
            Self::CabacStreamout => "CabacStreamoutBuffer",
            Self::RefBeforeLoopFilter => "RefBeforeLoopFilterSurface",
        }
    }
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 参与尺寸计算的帧维度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDims {
    pub width: u32,
    pub height: u32,
    pub ctb_log2: u32,
    pub bit_depth: u8,
    pub chroma: ChromaFormat,
    /// 码流字节数
    pub frame_size: u32,
}

impl FrameDims {
    /// 逐项取最大值
    pub fn max(self, other: Self) -> Self {
        let chroma = if other.chroma.idc() > self.chroma.idc() {
            other.chroma
        } else {
            self.chroma
        };
        Self {
            width: self.width.max(other.width),
            height: self.height.max(other.height),
            ctb_log2: self.ctb_log2.max(other.ctb_log2),
            bit_depth: self.bit_depth.max(other.bit_depth),
            chroma,
            frame_size: self.frame_size.max(other.frame_size),
        }
    }

    pub fn sizing_params(&self) -> SizingParams {
        SizingParams {
            width: self.width,
            height: self.height,
            ctb_log2: self.ctb_log2,
            bit_depth: self.bit_depth,
            chroma: self.chroma,
            max_frame_size: self.frame_size,
        }
    }
}

/// 已分配的 scratch 缓冲区
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchBuffer {
    pub kind: BufferKind,
    pub size: u32,
    pub handle: ResourceHandle,
}

/// 单帧缓冲区准备请求
#[derive(Debug, Clone, Copy)]
pub struct FrameBufferRequest {
    pub dims: FrameDims,
    pub row_store: RowStoreCache,
    /// 多管线解码, 需要 CABAC stream-out
    pub scalable: bool,
    /// 帧内块拷贝需要环路滤波前副本
    pub pre_loop_filter_copy: bool,
}

/// 单帧可用的缓冲区句柄
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameBuffers {
    pub handles: BTreeMap<BufferKind, ResourceHandle>,
    /// 本帧 MV 时域缓冲所需字节数
    pub mv_size: u32,
}

impl FrameBuffers {
    pub fn get(&self, kind: BufferKind) -> Option<ResourceHandle> {
        self.handles.get(&kind).copied()
    }
}

/// 缓冲区生命周期管理器
#[derive(Debug, Default)]
pub struct BufferLifecycleManager {
    buffers: BTreeMap<BufferKind, ScratchBuffer>,
    watermark: Option<FrameDims>,
    allocations: usize,
}

impl BufferLifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前水位线
    pub fn watermark(&self) -> Option<FrameDims> {
        self.watermark
    }

    /// 累计分配次数 (含首次分配)
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    /// 查询已分配的缓冲区
    pub fn get(&self, kind: BufferKind) -> Option<&ScratchBuffer> {
        self.buffers.get(&kind)
    }

    /// 计算尺寸时使用的维度: 当前帧与水位线逐项取大
    pub fn sizing_dims(&self, dims: FrameDims) -> FrameDims {
        self.watermark.map_or(dims, |w| w.max(dims))
    }

    /// 按当前帧与水位线计算需求, 必要时重新分配
    pub fn ensure_capacity(
        &mut self,
        kind: BufferKind,
        dims: FrameDims,
        generation: &dyn HwGeneration,
        device: &mut dyn Device,
    ) -> HwdecResult<ResourceHandle> {
        let required = generation.buffer_size(kind, &self.sizing_dims(dims).sizing_params())?;
        self.ensure_size(kind, required, device)
    }

    /// 缓冲区不存在或小于 `required` 时重新分配, 否则复用
    pub fn ensure_size(
        &mut self,
        kind: BufferKind,
        required: u32,
        device: &mut dyn Device,
    ) -> HwdecResult<ResourceHandle> {
        if let Some(existing) = self.buffers.get(&kind) {
            if existing.size >= required {
                return Ok(existing.handle);
            }
        }

        if let Some(old) = self.buffers.remove(&kind) {
            debug!("{kind}: {} -> {required} 字节, 重新分配", old.size);
            device.free(old.handle);
        }
        let handle = device.allocate(&BufferDesc::new(kind.name(), required))?;
        self.allocations += 1;
        self.buffers.insert(
            kind,
            ScratchBuffer {
                kind,
                size: required,
                handle,
            },
        );
        Ok(handle)
    }

    /// 准备一帧所需的全部缓冲区, 完成后更新水位线
    ///
    /// 行存储缓存承担的行缓冲本帧跳过, 保留原有分配与大小.
    pub fn prepare_frame(
        &mut self,
        request: &FrameBufferRequest,
        generation: &dyn HwGeneration,
        device: &mut dyn Device,
    ) -> HwdecResult<FrameBuffers> {
        let mut frame = FrameBuffers::default();
        let dims = request.dims;

        for kind in BufferKind::SCRATCH {
            if request.row_store.covers(kind) {
                continue;
            }
            let handle = self.ensure_capacity(kind, dims, generation, device)?;
            frame.handles.insert(kind, handle);
        }
        if request.scalable {
            let handle =
                self.ensure_capacity(BufferKind::CabacStreamout, dims, generation, device)?;
            frame.handles.insert(BufferKind::CabacStreamout, handle);
        }
        if request.pre_loop_filter_copy {
            let handle =
                self.ensure_capacity(BufferKind::RefBeforeLoopFilter, dims, generation, device)?;
            frame.handles.insert(BufferKind::RefBeforeLoopFilter, handle);
        }
        frame.mv_size = generation.buffer_size(
            BufferKind::MvTemporal,
            &self.sizing_dims(dims).sizing_params(),
        )?;

        self.commit_watermark(dims);
        Ok(frame)
    }

    /// 将水位线提升到包含 `dims`
    pub fn commit_watermark(&mut self, dims: FrameDims) {
        let next = self.sizing_dims(dims);
        if self.watermark != Some(next) {
            debug!(
                "缓冲区水位线: {}x{} ctb_log2={} bit_depth={} frame_size={}",
                next.width, next.height, next.ctb_log2, next.bit_depth, next.frame_size
            );
        }
        self.watermark = Some(next);
    }

    /// 释放全部缓冲区
    pub fn release_all(&mut self, device: &mut dyn Device) {
        for (_, buffer) in std::mem::take(&mut self.buffers) {
            device.free(buffer.handle);
        }
        self.watermark = None;
    }
}
