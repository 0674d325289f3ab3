//! # hwdec
//!
//! 硬件加速视频解码编排层.
//!
//! 编排层位于码流解析器与硬件命令编码器之间: 它接收每帧的图像/slice 参数与码流缓冲区,
//! 管理内部缓冲区、MV 缓冲池与参考帧簿记, 决定单管线或多管线解码模式,
//! 并按阶段顺序把命令交给外部的命令发射器.
//!
//! # 快速开始
//!
//! ```rust
//! use hwdec::core::MockDevice;
//! use hwdec::hevc::{DecoderConfig, HevcDecoder, HwDecoder, RecordingEmitter};
//!
//! let decoder = HevcDecoder::new(DecoderConfig::default(), MockDevice::new(), RecordingEmitter::new());
//! assert_eq!(decoder.pass_count(), 0);
//! println!("hwdec {}", hwdec::version());
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `hwdec-core` | 错误类型、资源句柄、设备接口与模拟设备 |
//! | `hwdec-hevc` | HEVC 解码编排 |

/// 错误类型、资源句柄与设备接口
pub use hwdec_core as core;

/// HEVC 解码编排
pub use hwdec_hevc as hevc;

pub mod logging;

/// 获取版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
