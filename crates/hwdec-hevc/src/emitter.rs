//! 硬件命令发射接口.
//!
//! 编排层只负责决定发射哪些命令以及各命令的参数, 命令的二进制编码由实现
//! [`CommandEmitter`] 的外部协作方完成.

use std::collections::BTreeMap;

use hwdec_core::{ChromaFormat, Engine, HwdecResult, ResourceHandle};

use crate::bitstream::DataSource;
use crate::buffers::BufferKind;
use crate::params::{IqMatrix, PredWeightTable, SliceType};
use crate::reference::RefIdxEntry;
use crate::tile::TileGrid;

/// DMEM 在预处理固件地址空间中的偏移
pub const HUC_DMEM_OFFSET: u32 = 0x2000;

/// 解码管线工作模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeWorkMode {
    Legacy,
    CabacFrontEnd,
    CabacBackEnd,
    RealTile,
}

/// 多引擎位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiEngineMode {
    Single,
    Left,
    Middle,
    Right,
}

impl MultiEngineMode {
    /// 管线 `pipe` 在 `pipes` 条管线中的位置
    pub fn for_pipe(pipe: u8, pipes: u8) -> Self {
        match (pipe, pipes) {
            (_, 0 | 1) => Self::Single,
            (0, _) => Self::Left,
            (p, n) if p + 1 == n => Self::Right,
            _ => Self::Middle,
        }
    }
}

/// 表面状态参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceParams {
    pub dest: ResourceHandle,
    pub references: Vec<ResourceHandle>,
}

/// 管线缓冲区地址参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeBufferParams {
    pub dest: ResourceHandle,
    pub scratch: BTreeMap<BufferKind, ResourceHandle>,
    pub references: Vec<ResourceHandle>,
    pub mv_buffers: Vec<ResourceHandle>,
    pub current_mv: ResourceHandle,
    /// 帧内块拷贝需要的环路滤波前副本
    pub pre_loop_filter: Option<ResourceHandle>,
}

/// 图像状态参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureStateParams {
    pub width: u32,
    pub height: u32,
    pub ctb_log2: u32,
    pub chroma: ChromaFormat,
    pub bit_depth: u8,
    pub cur_pic_intra: bool,
    pub ibc_ref_idx: Option<u8>,
}

/// slice 状态参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceStateParams {
    pub index: usize,
    pub slice_type: SliceType,
    pub segment_address: u32,
    pub dependent: bool,
    pub temporal_mvp: bool,
    pub collocated_ref_idx: u8,
    /// 真实 tile 模式下该命令所属的 tile 列
    pub tile_column: Option<usize>,
    pub last: bool,
}

/// 命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // 预处理固件
    HucImemState { kernel_descriptor: u32 },
    HucPipeModeSelect { stream_out: bool },
    HucIndirectObject { source: DataSource, size: u32 },
    HucVirtualAddress { region: ResourceHandle, writable: bool },
    HucDmemState { buffer: ResourceHandle, offset: u32, length: u32 },
    HucStreamObject { offset: u32, size: u32 },
    HucStart { last: bool },

    // 解码管线图像级
    PipeModeSelect {
        work_mode: PipeWorkMode,
        multi_engine: MultiEngineMode,
        pipe: u8,
    },
    Surfaces(SurfaceParams),
    PipeBufferAddresses(Box<PipeBufferParams>),
    IndirectObjectBase { source: DataSource, size: u32 },
    QuantMatrix(Box<IqMatrix>),
    PictureState(PictureStateParams),
    TileState(TileGrid),

    // 解码管线 slice 级
    SliceState(SliceStateParams),
    RefIdxState { list: u8, entries: Vec<RefIdxEntry> },
    WeightOffsetState { list: u8, table: Box<PredWeightTable> },
    BsdObject { offset: u32, size: u32 },

    // 通用
    BatchBufferStart { buffer: ResourceHandle, offset: u32 },
    VdPipelineFlush,
    MiFlush,
    StatusReportStart { feedback_number: u32 },
    StatusReportEnd { feedback_number: u32 },
    BatchBufferEnd,
}

impl Command {
    /// 命令名, 用于日志与统计
    pub fn name(&self) -> &'static str {
        match self {
            Self::HucImemState { .. } => "HUC_IMEM_STATE",
            Self::HucPipeModeSelect { .. } => "HUC_PIPE_MODE_SELECT",
            Self::HucIndirectObject { .. } => "HUC_IND_OBJ_BASE_ADDR_STATE",
            Self::HucVirtualAddress { .. } => "HUC_VIRTUAL_ADDR_STATE",
            Self::HucDmemState { .. } => "HUC_DMEM_STATE",
            Self::HucStreamObject { .. } => "HUC_STREAM_OBJECT",
            Self::HucStart { .. } => "HUC_START",
            Self::PipeModeSelect { .. } => "HCP_PIPE_MODE_SELECT",
            Self::Surfaces(_) => "HCP_SURFACE_STATE",
            Self::PipeBufferAddresses(_) => "HCP_PIPE_BUF_ADDR_STATE",
            Self::IndirectObjectBase { .. } => "HCP_IND_OBJ_BASE_ADDR_STATE",
            Self::QuantMatrix(_) => "HCP_QM_STATE",
            Self::PictureState(_) => "HCP_PIC_STATE",
            Self::TileState(_) => "HCP_TILE_STATE",
            Self::SliceState(_) => "HCP_SLICE_STATE",
            Self::RefIdxState { .. } => "HCP_REF_IDX_STATE",
            Self::WeightOffsetState { .. } => "HCP_WEIGHTOFFSET_STATE",
            Self::BsdObject { .. } => "HCP_BSD_OBJECT",
            Self::BatchBufferStart { .. } => "MI_BATCH_BUFFER_START",
            Self::VdPipelineFlush => "VD_PIPELINE_FLUSH",
            Self::MiFlush => "MI_FLUSH_DW",
            Self::StatusReportStart { .. } => "STATUS_REPORT_START",
            Self::StatusReportEnd { .. } => "STATUS_REPORT_END",
            Self::BatchBufferEnd => "MI_BATCH_BUFFER_END",
        }
    }
}

/// 命令发射器
pub trait CommandEmitter: Send {
    /// 在指定命令流上追加一条命令
    fn emit(&mut self, engine: Engine, command: Command) -> HwdecResult<()>;
}

/// 记录全部命令的发射器
#[derive(Debug, Default)]
pub struct RecordingEmitter {
    commands: Vec<(Engine, Command)>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[(Engine, Command)] {
        &self.commands
    }

    /// 取出并清空已记录的命令
    pub fn take(&mut self) -> Vec<(Engine, Command)> {
        std::mem::take(&mut self.commands)
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// 指定命令流上的命令名序列
    pub fn names_on(&self, engine: Engine) -> Vec<&'static str> {
        self.commands
            .iter()
            .filter(|(e, _)| *e == engine)
            .map(|(_, c)| c.name())
            .collect()
    }

    /// 指定命令名出现的次数
    pub fn count(&self, name: &str) -> usize {
        self.commands.iter().filter(|(_, c)| c.name() == name).count()
    }
}

impl CommandEmitter for RecordingEmitter {
    fn emit(&mut self, engine: Engine, command: Command) -> HwdecResult<()> {
        self.commands.push((engine, command));
        Ok(())
    }
}
