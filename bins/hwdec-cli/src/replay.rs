//! 轨迹回放.
//!
//! 轨迹文件格式:
//!
//! ```json
//! {
//!   "frames": [
//!     {
//!       "picture": { "pic_width_in_min_cbs_y": 240, "pic_height_in_min_cbs_y": 135, ... },
//!       "slices": [ { "slice_data_offset": 0, "slice_data_size": 1000 } ],
//!       "chunks": [256, 768]
//!     }
//!   ]
//! }
//! ```
//!
//! `chunks` 缺省时整帧码流一次提交; `iq_matrix` 缺省时使用平坦矩阵.

use anyhow::{Context, Result};
use serde::Deserialize;

use hwdec_core::{Device, MockDevice, ResourceHandle};
use hwdec_hevc::{
    CodecStatus, DecoderConfig, FrameProgress, FrameSubmission, HevcDecoder, HwDecoder, IqMatrix,
    PictureParameters, RecordingEmitter, SliceParameters, StatusReport,
};

/// 目标表面句柄基址, 与模拟设备分配的句柄区分开
const DEST_SURFACE_BASE: u32 = 0x0010_0000;

#[derive(Debug, Deserialize)]
pub struct ReplayTrace {
    pub frames: Vec<TraceFrame>,
}

#[derive(Debug, Deserialize)]
pub struct TraceFrame {
    pub picture: PictureParameters,
    pub slices: Vec<SliceParameters>,
    #[serde(default)]
    pub iq_matrix: Option<IqMatrix>,
    /// 码流分片长度
    #[serde(default)]
    pub chunks: Vec<u32>,
}

impl TraceFrame {
    /// 各次提交的码流长度
    fn chunk_sizes(&self) -> Result<Vec<u32>> {
        if !self.chunks.is_empty() {
            return Ok(self.chunks.clone());
        }
        let mut total = 0u32;
        for slice in &self.slices {
            total = total.max(slice.data_end()?);
        }
        Ok(vec![total])
    }
}

/// 单帧回放结果
#[derive(Debug, Clone)]
pub struct FrameSummary {
    pub index: usize,
    pub status: String,
    pub commands: usize,
    pub copy_passes: usize,
    pub mode: String,
    pub phases: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct ReplayOutcome {
    pub frames: Vec<FrameSummary>,
    pub reports: Vec<StatusReport>,
}

type ReplayDecoder = HevcDecoder<MockDevice, RecordingEmitter>;

/// 在模拟设备上回放整个轨迹
///
/// 单帧被拒绝或通道失败不会中止回放, 结果记录在该帧的摘要中.
pub fn run_replay(config: DecoderConfig, trace: &ReplayTrace) -> Result<ReplayOutcome> {
    let mut decoder = HevcDecoder::new(config, MockDevice::new(), RecordingEmitter::new());
    let mut outcome = ReplayOutcome::default();

    for (index, frame) in trace.frames.iter().enumerate() {
        let mut summary = FrameSummary {
            index,
            status: "pending".to_string(),
            commands: 0,
            copy_passes: 0,
            mode: "-".to_string(),
            phases: Vec::new(),
            error: None,
        };
        let uploads = upload_chunks(&mut decoder, frame)
            .with_context(|| format!("帧 {index}: 上传码流失败"))?;

        match replay_frame(&mut decoder, frame, &uploads, &mut summary) {
            Ok(()) => {}
            Err(e) => {
                log::warn!("帧 {index}: {e}");
                summary.status = CodecStatus::Error.to_string();
                summary.error = Some(e.to_string());
            }
        }

        summary.commands = decoder.emitter_mut().take().len();
        summary.copy_passes = decoder.reassembler().copy_passes();
        let reports = decoder.take_status_reports();
        if let Some(report) = reports.last() {
            summary.status = report.status.to_string();
        }
        outcome.reports.extend(reports);

        for (handle, _) in uploads {
            decoder.device_mut().free(handle);
        }
        outcome.frames.push(summary);
    }

    decoder.release();
    Ok(outcome)
}

fn upload_chunks(
    decoder: &mut ReplayDecoder,
    frame: &TraceFrame,
) -> Result<Vec<(ResourceHandle, u32)>> {
    let mut uploads = Vec::new();
    for size in frame.chunk_sizes()? {
        let data = vec![0u8; size as usize];
        let handle = decoder.device_mut().upload("TraceBitstream", &data)?;
        uploads.push((handle, size));
    }
    Ok(uploads)
}

fn replay_frame(
    decoder: &mut ReplayDecoder,
    frame: &TraceFrame,
    uploads: &[(ResourceHandle, u32)],
    summary: &mut FrameSummary,
) -> Result<()> {
    let Some((&(first, first_size), rest)) = uploads.split_first() else {
        anyhow::bail!("帧没有码流分片");
    };
    let dest = ResourceHandle(DEST_SURFACE_BASE + frame.picture.curr_pic.frame_idx as u32);
    let submission = FrameSubmission::first(
        frame.picture.clone(),
        frame.slices.clone(),
        frame.iq_matrix.clone().unwrap_or_default(),
        dest,
        first,
        first_size,
    );

    let mut progress = decoder.set_frame_state(submission)?;
    for &(handle, size) in rest {
        if progress == FrameProgress::Ready {
            break;
        }
        progress = decoder.set_frame_state(FrameSubmission::continuation(handle, size))?;
    }
    if progress == FrameProgress::Incomplete {
        summary.status = "incomplete".to_string();
        return Ok(());
    }

    if let Some(mode) = decoder.mode() {
        summary.mode = mode.to_string();
    }
    let result = run_passes(decoder);
    summary.phases = decoder
        .phase_history()
        .iter()
        .map(|p| p.to_string())
        .collect();
    result
}

fn run_passes(decoder: &mut ReplayDecoder) -> Result<()> {
    for _ in 0..decoder.pass_count() {
        decoder.decode_state_level()?;
        decoder.decode_primitive_level()?;
    }
    Ok(())
}
