use log::{debug, warn};

use super::*;
use crate::buffers::{BufferKind, FrameBufferRequest, FrameDims};
use crate::dmem::dmem_buffer_size;
use crate::generation::RowStoreCache;
use crate::scalability::{ScalabilityInputs, decide_mode, second_level_sizing};

use super::passes::weighted_prediction;

// ============================================================
// 帧状态设置
// ============================================================

impl<D: Device, E: CommandEmitter> HevcDecoder<D, E> {
    pub(super) fn accept_submission(
        &mut self,
        submission: FrameSubmission,
    ) -> HwdecResult<FrameProgress> {
        let continuation = submission.picture.is_none();
        if continuation {
            if self.pending.is_none() || !self.reassembler.is_incomplete() {
                return Err(HwdecError::InvalidParameter(
                    "HEVC: 首次提交缺少图像参数".into(),
                ));
            }
            self.reassembler.check_and_append(
                &mut self.device,
                submission.bitstream,
                0,
                submission.data_size,
            )?;
        } else {
            if self.pending.is_some() {
                warn!("HEVC: 上一帧码流未交付完整, 丢弃该帧");
                self.pending = None;
            }
            self.begin_frame(submission)?;
        }

        if self.reassembler.is_incomplete() {
            debug!(
                "帧 {} 码流不完整: {}/{} 字节",
                self.frame_counter,
                self.reassembler.write_offset(),
                self.reassembler.frame_end()
            );
            return Ok(FrameProgress::Incomplete);
        }
        self.prepare_frame()?;
        Ok(FrameProgress::Ready)
    }

    /// 帧的首次提交: 校验 slice 数量并估算整帧码流
    fn begin_frame(&mut self, submission: FrameSubmission) -> HwdecResult<()> {
        self.frame_counter += 1;
        self.frame = None;

        let FrameSubmission {
            picture,
            slices,
            iq_matrix,
            dest_surface,
            bitstream,
            data_size,
            data_offset,
        } = submission;
        let picture = picture
            .ok_or_else(|| HwdecError::InvalidParameter("HEVC: 缺少图像参数".into()))?;
        if slices.len() > self.config.max_slices {
            return Err(HwdecError::InvalidParameter(format!(
                "HEVC: slice 数量 {} 超出上限 {}",
                slices.len(),
                self.config.max_slices
            )));
        }
        let last = slices
            .last()
            .ok_or_else(|| HwdecError::InvalidParameter("HEVC: 缺少 slice 参数".into()))?;

        self.reassembler.initialize(last)?;
        self.reassembler
            .check_and_append(&mut self.device, bitstream, data_offset, data_size)?;
        self.pending = Some(PendingFrame {
            picture,
            slices,
            iq_matrix,
            dest: dest_surface,
            bitstream,
            data_offset,
            data_size,
        });
        Ok(())
    }

    /// 码流完整后准备本帧的全部资源
    fn prepare_frame(&mut self) -> HwdecResult<()> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| HwdecError::InternalConsistency("没有待准备的帧".into()))?;
        let iq_matrix = pending
            .iq_matrix
            .ok_or_else(|| HwdecError::InvalidParameter("HEVC: 缺少反量化矩阵".into()))?;
        iq_matrix.validate()?;
        let pic = pending.picture;
        pic.validate()?;
        for (i, slice) in pending.slices.iter().enumerate() {
            slice.data_end()?;
            if weighted_prediction(&pic, slice.slice_type) && slice.pred_weight_table.is_none() {
                return Err(HwdecError::InvalidParameter(format!(
                    "HEVC: slice {i} 启用加权预测但缺少加权预测表"
                )));
            }
        }
        let chroma = pic.chroma_format()?;
        let tiles = TileGrid::compute(&pic)?;

        let refs = self
            .references
            .build_frame(&pic, pending.dest, &mut self.mv_pool)?;

        let mode = decide_mode(&ScalabilityInputs {
            supported: self.generation.supports_scalability(),
            num_vdbox: self.config.num_vdbox,
            pipe_override: self.config.pipe_override,
            using_scaler: self.config.using_scaler,
            secure_decode: self.config.secure_decode,
            width: pic.width(),
            height: pic.height(),
            bit_depth: pic.bit_depth(),
            chroma,
            tiles_enabled: pic.tiles_enabled,
            tile_columns: tiles.columns(),
            tile_rows: tiles.rows(),
            scc: pic.curr_pic_ref_enabled,
        })?;

        let source = self
            .reassembler
            .data_source(pending.bitstream, pending.data_offset);
        let data_size = match source {
            DataSource::Concatenated { size, .. } => size,
            DataSource::Caller { .. } => pending.data_size,
        };

        let dims = FrameDims {
            width: pic.width(),
            height: pic.height(),
            ctb_log2: pic.ctb_log2_size(),
            bit_depth: pic.bit_depth(),
            chroma,
            frame_size: self.reassembler.estimate().max(data_size),
        };
        let row_store = if self.config.row_store_cache {
            self.generation
                .row_store_cache(dims.width, dims.bit_depth, chroma)
        } else {
            RowStoreCache::default()
        };
        let request = FrameBufferRequest {
            dims,
            row_store,
            scalable: mode.is_scalable(),
            pre_loop_filter_copy: refs.pre_loop_filter_copy,
        };
        let buffers =
            self.buffers
                .prepare_frame(&request, self.generation.as_ref(), &mut self.device)?;
        let current_mv = self
            .mv_pool
            .ensure_buffer(refs.mv_index, buffers.mv_size, &mut self.device)?;

        // 帧内块拷贝读取环路滤波前的副本
        let self_surface = buffers
            .get(BufferKind::RefBeforeLoopFilter)
            .unwrap_or(pending.dest);
        let resolved = self.references.resolve_surfaces(
            &refs,
            &self.mv_pool,
            pending.dest,
            self_surface,
            current_mv,
        );

        let derived = if self.config.short_format {
            let sizing = second_level_sizing(
                &mode,
                self.config.separate_tile_decoding,
                pending.slices.len(),
                tiles.columns(),
                tiles.rows(),
                self.generation.slice_state_bytes(),
            )?;
            Some(self.derived.rotate_and_prepare(
                &mut self.device,
                dmem_buffer_size(),
                sizing.size,
                sizing.count,
            )?)
        } else {
            None
        };
        let cursor = match mode {
            DecodeMode::RealTile { .. } => Some(RealTileCursor::new(&mode)?),
            _ => None,
        };

        self.phases.reset(mode, self.config.short_format);
        debug!(
            "帧 {} 就绪: {mode}, {} 个 slice, {} 个通道",
            self.frame_counter,
            pending.slices.len(),
            self.phases.pass_count()
        );
        self.last_references = Some(refs.clone());
        self.frame = Some(FrameContext {
            frame_index: self.frame_counter,
            picture: pic,
            slices: pending.slices,
            iq_matrix,
            dest: pending.dest,
            source,
            data_size,
            refs,
            resolved,
            buffers,
            current_mv,
            tiles,
            mode,
            derived,
            cursor,
            engine: Engine::Video,
            status_started: false,
        });
        Ok(())
    }
}
