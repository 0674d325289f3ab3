//! 色度格式定义.
//!
//! 与码流中的 `chroma_format_idc` 一一对应, 决定行缓冲与 SAO 缓冲的尺寸系数.

use std::fmt;

use crate::{HwdecError, HwdecResult};

/// 色度采样格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChromaFormat {
    /// 仅亮度
    Monochrome,
    /// 4:2:0
    Yuv420,
    /// 4:2:2
    Yuv422,
    /// 4:4:4
    Yuv444,
}

impl ChromaFormat {
    /// 由 `chroma_format_idc` 转换
    pub fn from_idc(idc: u8) -> HwdecResult<Self> {
        match idc {
            0 => Ok(Self::Monochrome),
            1 => Ok(Self::Yuv420),
            2 => Ok(Self::Yuv422),
            3 => Ok(Self::Yuv444),
            _ => Err(HwdecError::InvalidParameter(format!(
                "chroma_format_idc={idc} 超出范围"
            ))),
        }
    }

    /// 对应的 `chroma_format_idc`
    pub fn idc(self) -> u8 {
        match self {
            Self::Monochrome => 0,
            Self::Yuv420 => 1,
            Self::Yuv422 => 2,
            Self::Yuv444 => 3,
        }
    }

    /// 是否为 4:2:0 或 4:2:2
    pub fn is_subsampled(self) -> bool {
        matches!(self, Self::Yuv420 | Self::Yuv422)
    }
}

impl fmt::Display for ChromaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Monochrome => "400",
            Self::Yuv420 => "420",
            Self::Yuv422 => "422",
            Self::Yuv444 => "444",
        };
        write!(f, "{name}")
    }
}
