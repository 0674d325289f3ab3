//! HEVC 解码上下文.
//!
//! 每帧调用顺序:
//! 1. [`HwDecoder::set_frame_state`]: 接收参数与码流, 码流不完整时返回 [`FrameProgress::Incomplete`];
//! 2. 每个通道调用一次 [`HwDecoder::decode_state_level`] 与 [`HwDecoder::decode_primitive_level`],
//!    通道数由 [`HwDecoder::pass_count`] 给出.
//!
//! 上下文独占参考帧数组、MV 缓冲池、scratch 缓冲区与拼接缓冲区, 所有逐帧调用都需要 `&mut self`.

mod frame_state;
mod passes;

use log::debug;

use hwdec_core::{Device, Engine, HwdecError, HwdecResult, ResourceHandle, SyncObject};

use crate::bitstream::{BitstreamReassembler, DataSource};
use crate::buffers::{BufferLifecycleManager, FrameBuffers};
use crate::config::DecoderConfig;
use crate::derived::{DerivedSlot, DerivedStreamPool};
use crate::emitter::CommandEmitter;
use crate::generation::HwGeneration;
use crate::mv_pool::MvBufferPool;
use crate::params::{IqMatrix, PictureParameters, SliceParameters};
use crate::phase::{DecodePhase, PhaseMachine};
use crate::reference::{FrameReferences, ReferenceBookkeeper, ResolvedReferences};
use crate::scalability::{DecodeMode, RealTileCursor};
use crate::status::{CodecStatus, StatusReport};
use crate::tile::TileGrid;

// ============================================================
// 逐帧输入
// ============================================================

/// 一次 `set_frame_state` 调用的输入
///
/// 帧的首次提交携带全部参数; 码流不完整时的后续提交只携带码流缓冲区与长度.
#[derive(Debug, Clone)]
pub struct FrameSubmission {
    pub picture: Option<PictureParameters>,
    pub slices: Vec<SliceParameters>,
    pub iq_matrix: Option<IqMatrix>,
    pub dest_surface: ResourceHandle,
    pub bitstream: ResourceHandle,
    pub data_size: u32,
    pub data_offset: u32,
}

impl FrameSubmission {
    /// 帧的首次提交
    pub fn first(
        picture: PictureParameters,
        slices: Vec<SliceParameters>,
        iq_matrix: IqMatrix,
        dest_surface: ResourceHandle,
        bitstream: ResourceHandle,
        data_size: u32,
    ) -> Self {
        Self {
            picture: Some(picture),
            slices,
            iq_matrix: Some(iq_matrix),
            dest_surface,
            bitstream,
            data_size,
            data_offset: 0,
        }
    }

    /// 不完整帧的后续码流
    pub fn continuation(bitstream: ResourceHandle, data_size: u32) -> Self {
        Self {
            picture: None,
            slices: Vec::new(),
            iq_matrix: None,
            dest_surface: ResourceHandle(0),
            bitstream,
            data_size,
            data_offset: 0,
        }
    }

    pub fn with_offset(mut self, data_offset: u32) -> Self {
        self.data_offset = data_offset;
        self
    }
}

/// `set_frame_state` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameProgress {
    /// 码流尚未交付完整, 等待后续提交
    Incomplete,
    /// 帧已就绪, 可以执行各通道
    Ready,
}

// ============================================================
// 解码器接口
// ============================================================

/// 硬件解码编排接口
pub trait HwDecoder: Send {
    /// 设置帧状态
    fn set_frame_state(&mut self, submission: FrameSubmission) -> HwdecResult<FrameProgress>;

    /// 通道的图像级命令 (含阶段推进与预处理命令)
    fn decode_state_level(&mut self) -> HwdecResult<()>;

    /// 通道的 slice/tile 级命令与收尾
    fn decode_primitive_level(&mut self) -> HwdecResult<()>;

    /// 当前帧的通道数, 无就绪帧时为 0
    fn pass_count(&self) -> usize;

    /// 取出累计的状态报告
    fn take_status_reports(&mut self) -> Vec<StatusReport>;

    /// 提交并执行一帧的全部通道
    fn execute(&mut self, submission: FrameSubmission) -> HwdecResult<FrameProgress> {
        let progress = self.set_frame_state(submission)?;
        if progress == FrameProgress::Ready {
            for _ in 0..self.pass_count() {
                self.decode_state_level()?;
                self.decode_primitive_level()?;
            }
        }
        Ok(progress)
    }
}

// ============================================================
// 内部状态
// ============================================================

/// 首次提交后等待码流补齐的帧
#[derive(Debug)]
struct PendingFrame {
    picture: PictureParameters,
    slices: Vec<SliceParameters>,
    iq_matrix: Option<IqMatrix>,
    dest: ResourceHandle,
    bitstream: ResourceHandle,
    data_offset: u32,
    data_size: u32,
}

/// 就绪帧的编排上下文
#[derive(Debug)]
struct FrameContext {
    frame_index: u64,
    picture: PictureParameters,
    slices: Vec<SliceParameters>,
    iq_matrix: IqMatrix,
    dest: ResourceHandle,
    source: DataSource,
    data_size: u32,
    refs: FrameReferences,
    resolved: ResolvedReferences,
    buffers: FrameBuffers,
    current_mv: ResourceHandle,
    tiles: TileGrid,
    mode: DecodeMode,
    derived: Option<DerivedSlot>,
    cursor: Option<RealTileCursor>,
    engine: Engine,
    status_started: bool,
}

/// 跨命令流同步对象, 首次使用时创建
#[derive(Debug, Default)]
struct SyncSet {
    pre_process: Option<SyncObject>,
    front_end: Option<SyncObject>,
    pipes: Vec<Option<SyncObject>>,
}

impl SyncSet {
    fn get(slot: &mut Option<SyncObject>, device: &mut dyn Device) -> HwdecResult<SyncObject> {
        match slot {
            Some(sync) => Ok(*sync),
            None => {
                let sync = device.create_sync_object()?;
                *slot = Some(sync);
                Ok(sync)
            }
        }
    }

    fn pre_process(&mut self, device: &mut dyn Device) -> HwdecResult<SyncObject> {
        Self::get(&mut self.pre_process, device)
    }

    fn front_end(&mut self, device: &mut dyn Device) -> HwdecResult<SyncObject> {
        Self::get(&mut self.front_end, device)
    }

    fn pipe(&mut self, pipe: u8, device: &mut dyn Device) -> HwdecResult<SyncObject> {
        let idx = pipe as usize;
        if self.pipes.len() <= idx {
            self.pipes.resize(idx + 1, None);
        }
        Self::get(&mut self.pipes[idx], device)
    }
}

// ============================================================
// 解码上下文
// ============================================================

/// HEVC 解码上下文
pub struct HevcDecoder<D: Device, E: CommandEmitter> {
    config: DecoderConfig,
    generation: Box<dyn HwGeneration>,
    device: D,
    emitter: E,
    buffers: BufferLifecycleManager,
    mv_pool: MvBufferPool,
    references: ReferenceBookkeeper,
    reassembler: BitstreamReassembler,
    derived: DerivedStreamPool,
    phases: PhaseMachine,
    syncs: SyncSet,
    pending: Option<PendingFrame>,
    frame: Option<FrameContext>,
    last_references: Option<FrameReferences>,
    frame_counter: u64,
    status_reports: Vec<StatusReport>,
}

impl<D: Device, E: CommandEmitter> HevcDecoder<D, E> {
    /// 创建解码上下文, 代际策略在此选定
    pub fn new(config: DecoderConfig, device: D, emitter: E) -> Self {
        let config = config.normalized();
        let generation = config.generation.strategy();
        debug!(
            "HEVC 解码上下文: {}, {} 个视频引擎, 短格式={}",
            config.generation, config.num_vdbox, config.short_format
        );
        Self {
            derived: DerivedStreamPool::new(config.derived_pool_size),
            phases: PhaseMachine::new(DecodeMode::SinglePipe, config.short_format),
            config,
            generation,
            device,
            emitter,
            buffers: BufferLifecycleManager::new(),
            mv_pool: MvBufferPool::new(),
            references: ReferenceBookkeeper::new(),
            reassembler: BitstreamReassembler::new(),
            syncs: SyncSet::default(),
            pending: None,
            frame: None,
            last_references: None,
            frame_counter: 0,
            status_reports: Vec::new(),
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn emitter(&self) -> &E {
        &self.emitter
    }

    pub fn emitter_mut(&mut self) -> &mut E {
        &mut self.emitter
    }

    /// 已接收的帧数量
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn current_phase(&self) -> DecodePhase {
        self.phases.current()
    }

    /// 当前帧已进入的阶段
    pub fn phase_history(&self) -> &[DecodePhase] {
        self.phases.history()
    }

    /// 当前就绪帧的解码模式
    pub fn mode(&self) -> Option<DecodeMode> {
        self.frame.as_ref().map(|f| f.mode)
    }

    /// 最近一帧的参考关系
    pub fn last_references(&self) -> Option<&FrameReferences> {
        self.last_references.as_ref()
    }

    pub fn buffers(&self) -> &BufferLifecycleManager {
        &self.buffers
    }

    pub fn mv_pool(&self) -> &MvBufferPool {
        &self.mv_pool
    }

    pub fn references(&self) -> &ReferenceBookkeeper {
        &self.references
    }

    pub fn reassembler(&self) -> &BitstreamReassembler {
        &self.reassembler
    }

    /// 派生资源轮转池当前索引
    pub fn derived_index(&self) -> usize {
        self.derived.current_index()
    }

    /// 释放上下文持有的全部设备资源
    pub fn release(&mut self) {
        self.buffers.release_all(&mut self.device);
        self.mv_pool.release_all(&mut self.device);
        self.derived.release_all(&mut self.device);
        self.reassembler.release(&mut self.device);
        self.pending = None;
        self.frame = None;
    }

    fn push_report(&mut self, frame_index: u64, feedback_number: u32, curr_pic: u8, status: CodecStatus) {
        self.status_reports.push(StatusReport {
            feedback_number,
            frame_index,
            curr_pic,
            status,
        });
    }

    /// 通道失败: 放弃当前帧并记录错误报告
    fn abandon_frame(&mut self, err: HwdecError) -> HwdecError {
        if let Some(frame) = self.frame.take() {
            self.push_report(
                frame.frame_index,
                frame.picture.status_report_feedback_number,
                frame.picture.curr_pic.frame_idx,
                CodecStatus::Error,
            );
        }
        err
    }
}

impl<D: Device, E: CommandEmitter> HwDecoder for HevcDecoder<D, E> {
    fn set_frame_state(&mut self, submission: FrameSubmission) -> HwdecResult<FrameProgress> {
        self.accept_submission(submission)
    }

    fn decode_state_level(&mut self) -> HwdecResult<()> {
        self.run_state_level().map_err(|e| self.abandon_frame(e))
    }

    fn decode_primitive_level(&mut self) -> HwdecResult<()> {
        self.run_primitive_level().map_err(|e| self.abandon_frame(e))
    }

    fn pass_count(&self) -> usize {
        if self.frame.is_some() {
            self.phases.pass_count()
        } else {
            0
        }
    }

    fn take_status_reports(&mut self) -> Vec<StatusReport> {
        std::mem::take(&mut self.status_reports)
    }
}
