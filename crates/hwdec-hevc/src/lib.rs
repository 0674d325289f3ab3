//! # hwdec-hevc
//!
//! HEVC 硬件解码编排层.
//!
//! 本 crate 不解析码流, 也不编码硬件命令; 它根据调用方提供的图像/slice 参数,
//! 决定每帧需要哪些内部缓冲区、参考帧如何映射到硬件槽位、码流如何拼接,
//! 以及按什么阶段顺序向命令发射器输出命令.
//!
//! ## 组成
//!
//! - [`buffers`]: scratch 缓冲区生命周期与水位线
//! - [`mv_pool`]: MV 时域缓冲池
//! - [`reference`]: 参考帧簿记与索引压缩
//! - [`bitstream`]: 分片码流拼接
//! - [`phase`] / [`scalability`]: 阶段状态机与多管线模式
//! - [`tile`]: tile 网格
//! - [`decoder`]: 解码上下文
//!
//! ## 使用示例
//!
//! ```rust
//! use hwdec_core::{MockDevice, ResourceHandle};
//! use hwdec_hevc::{
//!     DecoderConfig, FrameProgress, FrameSubmission, HevcDecoder, HwDecoder, IqMatrix, PicEntry,
//!     PictureParameters, RecordingEmitter, SliceParameters,
//! };
//!
//! let mut device = MockDevice::new();
//! let bitstream = device.upload("bitstream", &[0u8; 1000]).unwrap();
//! let mut decoder = HevcDecoder::new(DecoderConfig::default(), device, RecordingEmitter::new());
//!
//! let picture = PictureParameters {
//!     pic_width_in_min_cbs_y: 240,
//!     pic_height_in_min_cbs_y: 135,
//!     log2_diff_max_min_luma_coding_block_size: 3,
//!     curr_pic: PicEntry::new(0),
//!     ..PictureParameters::default()
//! };
//! let submission = FrameSubmission::first(
//!     picture,
//!     vec![SliceParameters::short(0, 1000)],
//!     IqMatrix::default(),
//!     ResourceHandle(9000),
//!     bitstream,
//!     1000,
//! );
//! assert_eq!(decoder.execute(submission).unwrap(), FrameProgress::Ready);
//! assert_eq!(decoder.take_status_reports().len(), 1);
//! ```

pub mod bitstream;
pub mod buffers;
pub mod config;
pub mod decoder;
pub mod derived;
pub mod dmem;
pub mod emitter;
pub mod generation;
pub mod limits;
pub mod mv_pool;
pub mod params;
pub mod phase;
pub mod reference;
pub mod scalability;
pub mod status;
pub mod tile;

// 重导出常用类型
pub use bitstream::{BitstreamReassembler, DataSource};
pub use buffers::{BufferKind, BufferLifecycleManager, FrameDims};
pub use config::DecoderConfig;
pub use decoder::{FrameProgress, FrameSubmission, HevcDecoder, HwDecoder};
pub use emitter::{Command, CommandEmitter, RecordingEmitter};
pub use generation::{Generation, HwGeneration};
pub use mv_pool::MvBufferPool;
pub use params::{
    IqMatrix, PicEntry, PictureParameters, PredWeightTable, SliceParameters, SliceType,
    WeightEntry,
};
pub use phase::{DecodePhase, PhaseMachine};
pub use reference::{FrameReferences, ReferenceBookkeeper};
pub use scalability::DecodeMode;
pub use status::{CodecStatus, StatusReport};
pub use tile::TileGrid;
