use log::{debug, trace};

use super::*;
use crate::buffers::BufferKind;
use crate::dmem::DmemPayload;
use crate::emitter::{
    Command, HUC_DMEM_OFFSET, MultiEngineMode, PictureStateParams, PipeBufferParams,
    PipeWorkMode, SliceStateParams, SurfaceParams,
};
use crate::params::SliceType;

fn no_frame() -> HwdecError {
    HwdecError::InternalConsistency("没有就绪的帧".into())
}

/// 通道结束后的后续动作
enum PassEnd {
    /// 本帧还有后续通道
    Continue,
    /// 各管线汇合后执行共享收尾
    Barrier { pipes: u8 },
    /// 单管线收尾已提交
    Finished,
}

// ============================================================
// 通道执行
// ============================================================

impl<D: Device, E: CommandEmitter> HevcDecoder<D, E> {
    /// 码流尚未补齐时两级调用直接返回
    fn awaiting_bitstream(&self) -> bool {
        self.frame.is_none() && self.pending.is_some()
    }

    pub(super) fn run_state_level(&mut self) -> HwdecResult<()> {
        if self.awaiting_bitstream() {
            trace!("帧 {} 码流不完整, 跳过图像级命令", self.frame_counter);
            return Ok(());
        }
        if self.frame.is_none() {
            return Err(no_frame());
        }
        let phase = self.phases.advance()?;
        let engine = {
            let frame = self.frame.as_ref().ok_or_else(no_frame)?;
            pass_engine(phase, frame.cursor.as_ref())
        };
        trace!("通道 {phase} @ {engine:?}");

        self.device.acquire_command_buffer(engine)?;
        if let DecodePhase::BackEnd(_) = phase {
            let sync = self.syncs.front_end(&mut self.device)?;
            self.device.wait(engine, sync)?;
        }
        // 预处理在视频引擎上执行, 其他引擎上的主解码需要等待
        if engine != Engine::Video && self.config.short_format {
            let sync = self.syncs.pre_process(&mut self.device)?;
            self.device.wait(engine, sync)?;
        }

        let frame = self.frame.as_mut().ok_or_else(no_frame)?;
        frame.engine = engine;
        match phase {
            DecodePhase::PreProcess => emit_pre_process_picture(
                &mut self.emitter,
                &mut self.device,
                frame,
                self.config.s2l_kernel_descriptor,
            )?,
            DecodePhase::MainDecode => emit_main_picture(
                &mut self.emitter,
                frame,
                PipeWorkMode::Legacy,
                MultiEngineMode::Single,
                0,
            )?,
            DecodePhase::FrontEnd => emit_main_picture(
                &mut self.emitter,
                frame,
                PipeWorkMode::CabacFrontEnd,
                MultiEngineMode::Single,
                0,
            )?,
            DecodePhase::BackEnd(pipe) => {
                let position = MultiEngineMode::for_pipe(pipe, frame.mode.pipes());
                emit_main_picture(
                    &mut self.emitter,
                    frame,
                    PipeWorkMode::CabacBackEnd,
                    position,
                    pipe,
                )?
            }
            DecodePhase::RealTile => {
                let cursor = frame.cursor.ok_or_else(|| {
                    HwdecError::InternalConsistency("真实 tile 通道缺少游标".into())
                })?;
                let position = MultiEngineMode::for_pipe(cursor.pipe(), cursor.pipes_in_phase());
                emit_main_picture(
                    &mut self.emitter,
                    frame,
                    PipeWorkMode::RealTile,
                    position,
                    cursor.pipe(),
                )?
            }
            DecodePhase::Initialized => {
                return Err(HwdecError::InternalConsistency(
                    "阶段状态机停留在初始阶段".into(),
                ));
            }
        }

        if !frame.status_started {
            frame.status_started = true;
            self.emitter.emit(
                engine,
                Command::StatusReportStart {
                    feedback_number: frame.picture.status_report_feedback_number,
                },
            )?;
        }
        Ok(())
    }

    pub(super) fn run_primitive_level(&mut self) -> HwdecResult<()> {
        if self.awaiting_bitstream() {
            return Ok(());
        }
        let phase = self.phases.current();
        let is_final = self.phases.is_final_pass();
        let frame = self.frame.as_mut().ok_or_else(no_frame)?;
        let engine = frame.engine;

        let end = match phase {
            DecodePhase::PreProcess => {
                emit_stream_objects(&mut self.emitter, frame)?;
                self.emitter.emit(engine, Command::VdPipelineFlush)?;
                self.emitter.emit(engine, Command::MiFlush)?;
                let sync = self.syncs.pre_process(&mut self.device)?;
                self.device.signal(engine, sync)?;
                self.device.submit(engine)?;
                PassEnd::Continue
            }
            DecodePhase::MainDecode => {
                emit_slice_data(&mut self.emitter, frame, None)?;
                let feedback_number = frame.picture.status_report_feedback_number;
                self.emitter.emit(engine, Command::VdPipelineFlush)?;
                self.emitter.emit(engine, Command::MiFlush)?;
                self.emitter
                    .emit(engine, Command::StatusReportEnd { feedback_number })?;
                self.emitter.emit(engine, Command::MiFlush)?;
                self.emitter.emit(engine, Command::BatchBufferEnd)?;
                self.device.submit(engine)?;
                PassEnd::Finished
            }
            DecodePhase::FrontEnd => {
                emit_slice_data(&mut self.emitter, frame, None)?;
                self.emitter.emit(engine, Command::VdPipelineFlush)?;
                self.emitter.emit(engine, Command::MiFlush)?;
                self.emitter.emit(engine, Command::BatchBufferEnd)?;
                let sync = self.syncs.front_end(&mut self.device)?;
                self.device.signal(engine, sync)?;
                self.device.submit(engine)?;
                PassEnd::Continue
            }
            DecodePhase::BackEnd(pipe) => {
                // 后端只消费前端的 CABAC stream-out
                self.emitter.emit(engine, Command::VdPipelineFlush)?;
                self.emitter.emit(engine, Command::MiFlush)?;
                self.emitter.emit(engine, Command::BatchBufferEnd)?;
                let sync = self.syncs.pipe(pipe, &mut self.device)?;
                self.device.signal(engine, sync)?;
                self.device.submit(engine)?;
                if is_final {
                    PassEnd::Barrier {
                        pipes: frame.mode.pipes(),
                    }
                } else {
                    PassEnd::Continue
                }
            }
            DecodePhase::RealTile => {
                let cursor = frame.cursor.as_mut().ok_or_else(|| {
                    HwdecError::InternalConsistency("真实 tile 通道缺少游标".into())
                })?;
                let pipe = cursor.pipe();
                let column = cursor.column();
                if is_final != cursor.is_last() {
                    return Err(HwdecError::InternalConsistency(format!(
                        "真实 tile 列 {column} 与通道计数不一致"
                    )));
                }
                if !is_final {
                    cursor.advance()?;
                }
                emit_slice_data(&mut self.emitter, frame, Some(column))?;
                self.emitter.emit(engine, Command::VdPipelineFlush)?;
                self.emitter.emit(engine, Command::MiFlush)?;
                self.emitter.emit(engine, Command::BatchBufferEnd)?;
                let sync = self.syncs.pipe(pipe, &mut self.device)?;
                self.device.signal(engine, sync)?;
                self.device.submit(engine)?;
                if is_final {
                    PassEnd::Barrier {
                        pipes: real_tile_pipes_used(&frame.mode),
                    }
                } else {
                    PassEnd::Continue
                }
            }
            DecodePhase::Initialized => {
                return Err(HwdecError::InternalConsistency(
                    "阶段状态机停留在初始阶段".into(),
                ));
            }
        };

        match end {
            PassEnd::Continue => Ok(()),
            PassEnd::Barrier { pipes } => {
                self.emit_barrier(pipes)?;
                self.finish_frame();
                Ok(())
            }
            PassEnd::Finished => {
                self.finish_frame();
                Ok(())
            }
        }
    }

    /// 主命令流等待全部管线后执行共享收尾
    fn emit_barrier(&mut self, pipes: u8) -> HwdecResult<()> {
        let feedback_number = self
            .frame
            .as_ref()
            .ok_or_else(no_frame)?
            .picture
            .status_report_feedback_number;
        let engine = Engine::Video;
        self.device.acquire_command_buffer(engine)?;
        for pipe in 0..pipes {
            let sync = self.syncs.pipe(pipe, &mut self.device)?;
            self.device.wait(engine, sync)?;
        }
        self.emitter
            .emit(engine, Command::StatusReportEnd { feedback_number })?;
        self.emitter.emit(engine, Command::MiFlush)?;
        self.emitter.emit(engine, Command::BatchBufferEnd)?;
        self.device.submit(engine)
    }

    /// 帧的全部命令已提交, 记录状态报告
    fn finish_frame(&mut self) {
        let Some(frame) = self.frame.take() else {
            return;
        };
        let status = if frame.resolved.concealed > 0 {
            CodecStatus::Concealed
        } else {
            CodecStatus::Submitted
        };
        debug!("帧 {} 提交完成: {status}", frame.frame_index);
        self.push_report(
            frame.frame_index,
            frame.picture.status_report_feedback_number,
            frame.picture.curr_pic.frame_idx,
            status,
        );
    }
}

// ============================================================
// 命令序列
// ============================================================

fn pass_engine(phase: DecodePhase, cursor: Option<&RealTileCursor>) -> Engine {
    match phase {
        DecodePhase::BackEnd(pipe) => Engine::Pipe(pipe),
        DecodePhase::RealTile => Engine::Pipe(cursor.map_or(0, |c| c.pipe())),
        _ => Engine::Video,
    }
}

fn real_tile_pipes_used(mode: &DecodeMode) -> u8 {
    match *mode {
        DecodeMode::RealTile {
            pipes,
            phases,
            pipes_in_last_phase,
        } => {
            if phases > 1 {
                pipes
            } else {
                pipes_in_last_phase
            }
        }
        other => other.pipes(),
    }
}

/// 预处理图像级命令: 加载固件并描述输入码流、输出区域与 DMEM
fn emit_pre_process_picture<E: CommandEmitter>(
    emitter: &mut E,
    device: &mut dyn Device,
    frame: &FrameContext,
    kernel_descriptor: u32,
) -> HwdecResult<()> {
    let derived = frame.derived.ok_or_else(|| {
        HwdecError::InternalConsistency("预处理通道缺少派生资源".into())
    })?;
    let payload = DmemPayload {
        pic: &frame.picture,
        slices: &frame.slices,
        tiles: &frame.tiles,
        ref_mapping: &frame.refs.mapping,
        stream_capacity: derived
            .stream_size
            .saturating_mul(derived.stream_count as u32),
    };
    device.write(derived.dmem, 0, &payload.serialize()?)?;

    let engine = frame.engine;
    emitter.emit(engine, Command::HucImemState { kernel_descriptor })?;
    emitter.emit(engine, Command::HucPipeModeSelect { stream_out: false })?;
    emitter.emit(
        engine,
        Command::HucIndirectObject {
            source: frame.source,
            size: frame.data_size,
        },
    )?;
    emitter.emit(
        engine,
        Command::HucVirtualAddress {
            region: derived.stream,
            writable: true,
        },
    )?;
    emitter.emit(
        engine,
        Command::HucDmemState {
            buffer: derived.dmem,
            offset: HUC_DMEM_OFFSET,
            length: payload.transfer_size(),
        },
    )
}

/// 预处理逐 slice 命令
fn emit_stream_objects<E: CommandEmitter>(emitter: &mut E, frame: &FrameContext) -> HwdecResult<()> {
    let count = frame.slices.len();
    for (i, slice) in frame.slices.iter().enumerate() {
        emitter.emit(
            frame.engine,
            Command::HucStreamObject {
                offset: slice.slice_data_offset,
                size: slice.slice_data_size,
            },
        )?;
        emitter.emit(
            frame.engine,
            Command::HucStart {
                last: i + 1 == count,
            },
        )?;
    }
    Ok(())
}

/// 主解码图像级命令
fn emit_main_picture<E: CommandEmitter>(
    emitter: &mut E,
    frame: &FrameContext,
    work_mode: PipeWorkMode,
    multi_engine: MultiEngineMode,
    pipe: u8,
) -> HwdecResult<()> {
    let engine = frame.engine;
    let pic = &frame.picture;
    let resolved = &frame.resolved;

    emitter.emit(
        engine,
        Command::PipeModeSelect {
            work_mode,
            multi_engine,
            pipe,
        },
    )?;
    emitter.emit(
        engine,
        Command::Surfaces(SurfaceParams {
            dest: frame.dest,
            references: resolved.surfaces.clone(),
        }),
    )?;
    emitter.emit(
        engine,
        Command::PipeBufferAddresses(Box::new(PipeBufferParams {
            dest: frame.dest,
            scratch: frame.buffers.handles.clone(),
            references: resolved.surfaces.clone(),
            mv_buffers: resolved.mv_buffers.clone(),
            current_mv: frame.current_mv,
            pre_loop_filter: frame.buffers.get(BufferKind::RefBeforeLoopFilter),
        })),
    )?;
    emitter.emit(
        engine,
        Command::IndirectObjectBase {
            source: frame.source,
            size: frame.data_size,
        },
    )?;
    emitter.emit(engine, Command::QuantMatrix(Box::new(frame.iq_matrix.clone())))?;
    emitter.emit(
        engine,
        Command::PictureState(PictureStateParams {
            width: pic.width(),
            height: pic.height(),
            ctb_log2: pic.ctb_log2_size(),
            chroma: pic.chroma_format()?,
            bit_depth: pic.bit_depth(),
            cur_pic_intra: frame.refs.cur_pic_intra,
            ibc_ref_idx: frame.refs.ibc_ref_idx,
        }),
    )?;
    if pic.tiles_enabled {
        emitter.emit(engine, Command::TileState(frame.tiles.clone()))?;
    }
    Ok(())
}

/// 主解码 slice 数据: 预处理后回放派生命令流, 否则逐 slice 发射长格式命令
fn emit_slice_data<E: CommandEmitter>(
    emitter: &mut E,
    frame: &FrameContext,
    tile_column: Option<usize>,
) -> HwdecResult<()> {
    let engine = frame.engine;
    if let Some(derived) = frame.derived {
        let offset = (tile_column.unwrap_or(0) as u32).saturating_mul(derived.stream_size);
        return emitter.emit(
            engine,
            Command::BatchBufferStart {
                buffer: derived.stream,
                offset,
            },
        );
    }

    let pic = &frame.picture;
    let refs = &frame.refs;
    let count = frame.slices.len();
    for (i, slice) in frame.slices.iter().enumerate() {
        // 帧内图像中的非 I slice 不使用时域 MV 预测
        let temporal_mvp = pic.sps_temporal_mvp_enabled
            && slice.slice_temporal_mvp_enabled
            && !(refs.cur_pic_intra && slice.slice_type != SliceType::I);
        emitter.emit(
            engine,
            Command::SliceState(SliceStateParams {
                index: i,
                slice_type: slice.slice_type,
                segment_address: slice.slice_segment_address,
                dependent: slice.dependent_slice_segment,
                temporal_mvp,
                collocated_ref_idx: slice.collocated_ref_idx,
                tile_column,
                last: i + 1 == count,
            }),
        )?;

        let lists: &[u8] = match slice.slice_type {
            SliceType::I => &[],
            SliceType::P => &[0],
            SliceType::B => &[0, 1],
        };
        for &list in lists {
            emitter.emit(
                engine,
                Command::RefIdxState {
                    list,
                    entries: refs.ref_idx_entries(slice, list as usize),
                },
            )?;
        }

        if weighted_prediction(pic, slice.slice_type) {
            let table = slice.pred_weight_table.as_ref().ok_or_else(|| {
                HwdecError::InvalidParameter(format!("HEVC: slice {i} 缺少加权预测表"))
            })?;
            for &list in lists {
                emitter.emit(
                    engine,
                    Command::WeightOffsetState {
                        list,
                        table: Box::new(table.clone()),
                    },
                )?;
            }
        }

        emitter.emit(
            engine,
            Command::BsdObject {
                offset: slice.slice_data_offset,
                size: slice.slice_data_size,
            },
        )?;
    }
    Ok(())
}

/// slice 是否启用加权预测
pub(super) fn weighted_prediction(pic: &PictureParameters, slice_type: SliceType) -> bool {
    match slice_type {
        SliceType::P => pic.weighted_pred,
        SliceType::B => pic.weighted_bipred,
        SliceType::I => false,
    }
}
