//! 硬件代际策略.
//!
//! 不同代际的解码硬件在行缓冲尺寸公式、行存储缓存启用规则以及多管线能力上存在差异.
//! 解码上下文在构造时选定一个 [`HwGeneration`] 实现, 之后所有尺寸计算都经由它完成.
//!
//! 公式均为纯函数, 输入为按最小 CTB (16x16) 估算的帧尺寸.

use std::fmt;

use serde::{Deserialize, Serialize};

use hwdec_core::align::{CACHELINE_SIZE, align_up, ceil_div, round_up_even};
use hwdec_core::{ChromaFormat, HwdecError, HwdecResult};

use crate::buffers::BufferKind;
use crate::limits::SLICE_STATE_CACHELINES;

/// 硬件代际
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Generation {
    Gen9,
    Gen11,
    #[default]
    Gen12,
}

impl Generation {
    /// 创建对应的尺寸策略
    pub fn strategy(self) -> Box<dyn HwGeneration> {
        match self {
            Self::Gen9 => Box::new(Gen9),
            Self::Gen11 => Box::new(Gen11),
            Self::Gen12 => Box::new(Gen12),
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gen9 => "gen9",
            Self::Gen11 => "gen11",
            Self::Gen12 => "gen12",
        };
        write!(f, "{name}")
    }
}

/// 尺寸计算输入
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizingParams {
    pub width: u32,
    pub height: u32,
    pub ctb_log2: u32,
    pub bit_depth: u8,
    pub chroma: ChromaFormat,
    /// 码流最大字节数 (CABAC stream-out 使用)
    pub max_frame_size: u32,
}

/// 行存储缓存启用情况
///
/// 启用的行缓冲由片上缓存承担, 本帧不分配对应的 scratch 缓冲区.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowStoreCache {
    pub deblock: bool,
    pub metadata: bool,
    pub sao: bool,
}

impl RowStoreCache {
    /// 指定缓冲区是否由行存储缓存承担
    pub fn covers(&self, kind: BufferKind) -> bool {
        match kind {
            BufferKind::DeblockLine => self.deblock,
            BufferKind::MetadataLine => self.metadata,
            BufferKind::SaoLine => self.sao,
            _ => false,
        }
    }
}

/// 硬件代际策略接口
pub trait HwGeneration: Send + Sync + fmt::Debug {
    fn generation(&self) -> Generation;

    /// 计算内部缓冲区字节大小
    fn buffer_size(&self, kind: BufferKind, params: &SizingParams) -> HwdecResult<u32>;

    /// 行存储缓存启用规则, 默认不启用
    fn row_store_cache(&self, _width: u32, _bit_depth: u8, _chroma: ChromaFormat) -> RowStoreCache {
        RowStoreCache::default()
    }

    /// 是否支持多管线解码
    fn supports_scalability(&self) -> bool {
        false
    }

    /// 单个 slice 在派生命令流中占用的字节数
    fn slice_state_bytes(&self) -> u32 {
        SLICE_STATE_CACHELINES * CACHELINE_SIZE
    }
}

// ============================================================
// Gen9: 基于移位的行缓冲公式
// ============================================================

#[derive(Debug, Clone, Copy)]
pub struct Gen9;

impl HwGeneration for Gen9 {
    fn generation(&self) -> Generation {
        Generation::Gen9
    }

    fn buffer_size(&self, kind: BufferKind, p: &SizingParams) -> HwdecResult<u32> {
        let (w, h) = (p.width, p.height);
        let w_lcu = w >> 4;
        let h_lcu = h >> 4;
        let shift = if p.bit_depth > 8 { 2 } else { 3 };

        let lines = match kind {
            BufferKind::DeblockLine | BufferKind::DeblockTileLine => align_up(w, 32) >> shift,
            BufferKind::DeblockTileColumn => align_up(h + h_lcu * 6, 32) >> shift,
            BufferKind::MetadataLine => {
                round_up_even((((w + 15) >> 4) * 188 + w_lcu * 9 + 1023) >> 9)
            }
            BufferKind::MetadataTileLine => {
                round_up_even((((w + 15) >> 4) * 172 + w_lcu * 9 + 1023) >> 9)
            }
            BufferKind::MetadataTileColumn => {
                round_up_even((((h + 15) >> 4) * 176 + h_lcu * 89 + 1023) >> 9)
            }
            BufferKind::SaoLine => align_up((w >> 1) + w_lcu * 3, 16) >> shift,
            BufferKind::SaoTileLine => align_up((w >> 1) + w_lcu * 6, 16) >> shift,
            BufferKind::SaoTileColumn => align_up((h >> 1) + h_lcu * 6, 16) >> shift,
            BufferKind::MvTemporal => return cachelines_to_bytes(mv_temporal_cachelines(w, h)),
            BufferKind::RefBeforeLoopFilter => return surface_size(p),
            BufferKind::CabacStreamout => {
                return Err(HwdecError::Unsupported(
                    "gen9 不支持 CABAC stream-out 缓冲区".into(),
                ));
            }
        };
        cachelines_to_bytes(u64::from(lines))
    }
}

// ============================================================
// Gen11: 按 LCU 行存储尺寸与查表计算
// ============================================================

#[derive(Debug, Clone, Copy)]
pub struct Gen11;

impl HwGeneration for Gen11 {
    fn generation(&self) -> Generation {
        Generation::Gen11
    }

    fn buffer_size(&self, kind: BufferKind, p: &SizingParams) -> HwdecResult<u32> {
        lcu_buffer_size(kind, p)
    }

    fn row_store_cache(&self, width: u32, bit_depth: u8, chroma: ChromaFormat) -> RowStoreCache {
        lcu_row_store_cache(width, bit_depth, chroma)
    }
}

// ============================================================
// Gen12: 公式同 Gen11, 额外支持多管线
// ============================================================

#[derive(Debug, Clone, Copy)]
pub struct Gen12;

impl HwGeneration for Gen12 {
    fn generation(&self) -> Generation {
        Generation::Gen12
    }

    fn buffer_size(&self, kind: BufferKind, p: &SizingParams) -> HwdecResult<u32> {
        lcu_buffer_size(kind, p)
    }

    fn row_store_cache(&self, width: u32, bit_depth: u8, chroma: ChromaFormat) -> RowStoreCache {
        lcu_row_store_cache(width, bit_depth, chroma)
    }

    fn supports_scalability(&self) -> bool {
        true
    }
}

// ============================================================
// 公共公式
// ============================================================

/// 每 LCU 最坏情况 CU/TU 信息字节数 (4:2:0 8bit)
const WORST_CASE_CU_TU_INFO: u64 = 4 * CACHELINE_SIZE as u64;
/// 每 LCU 最坏情况 CU/TU 信息字节数 (RExt)
const WORST_CASE_CU_TU_INFO_REXT: u64 = 6 * CACHELINE_SIZE as u64;

/// SAO 行缓冲每 LCU cacheline 数, [位深 8/10][LCU 16/32/64]
const SAO_LINE_SUBSAMPLED: [[u32; 3]; 2] = [[2, 3, 5], [2, 3, 5]];
const SAO_LINE_444: [[u32; 3]; 2] = [[2, 4, 7], [3, 4, 8]];
/// SAO tile 列缓冲每 LCU cacheline 数, [420/422/444][LCU 16/32/64]
const SAO_TILE_COLUMN: [[u32; 3]; 3] = [[4, 5, 9], [5, 7, 12], [5, 7, 12]];

fn mv_temporal_cachelines(w: u32, h: u32) -> u64 {
    let (w, h) = (u64::from(w), u64::from(h));
    let mvt = ((w + 63) >> 6) * ((h + 15) >> 4);
    let mvtb = ((w + 31) >> 5) * ((h + 31) >> 5);
    (mvt.max(mvtb) + 1) & !1
}

/// cacheline 数换算为字节, 超出 32 位时报错
fn cachelines_to_bytes(lines: u64) -> HwdecResult<u32> {
    lines
        .checked_mul(u64::from(CACHELINE_SIZE))
        .and_then(|bytes| u32::try_from(bytes).ok())
        .ok_or_else(|| HwdecError::InvalidParameter(format!("缓冲区 {lines} 个 cacheline 超限")))
}

/// 每 LCU cacheline 数乘以 LCU 行/列数
fn lcu_bytes(per_lcu: u32, count: u32) -> HwdecResult<u32> {
    cachelines_to_bytes(u64::from(per_lcu) * u64::from(count))
}

fn lcu_buffer_size(kind: BufferKind, p: &SizingParams) -> HwdecResult<u32> {
    if !(4..=6).contains(&p.ctb_log2) {
        return Err(HwdecError::InvalidParameter(format!(
            "CTB log2 尺寸 {} 超出 4..=6",
            p.ctb_log2
        )));
    }
    // 按最小 LCU 估算, 得到最大行/列数
    let width_in_ctb = ceil_div(p.width, 16);
    let height_in_ctb = ceil_div(p.height, 16);
    let base_units = 1u32 << (p.ctb_log2 - 2);
    let bd_factor = if p.bit_depth > 8 { 2 } else { 1 };
    let depth_idx = usize::from(p.bit_depth != 8);
    let lcu_idx = (p.ctb_log2 - 4) as usize;

    let size = match kind {
        BufferKind::DeblockLine | BufferKind::DeblockTileLine => {
            // 格式系数 x2 以保持整数运算
            let fmt2 = if p.chroma == ChromaFormat::Yuv444 { 3 } else { 2 };
            let per_lcu = (base_units * fmt2 * 128 * bd_factor + 511) / 512;
            lcu_bytes(per_lcu, width_in_ctb)?
        }
        BufferKind::DeblockTileColumn => {
            let fmt2 = if p.chroma == ChromaFormat::Yuv420 { 2 } else { 3 };
            let per_lcu = (base_units * fmt2 * 128 * bd_factor + 3 * 128 * bd_factor + 511) / 512;
            lcu_bytes(per_lcu, height_in_ctb)?
        }
        BufferKind::MetadataLine | BufferKind::MetadataTileLine => {
            let per_lcu = if p.ctb_log2 == 6 { 2 } else { 1 };
            lcu_bytes(per_lcu, width_in_ctb)?
        }
        BufferKind::MetadataTileColumn => {
            let per_lcu = if p.ctb_log2 == 6 { 2 } else { 1 };
            lcu_bytes(per_lcu, height_in_ctb)?
        }
        BufferKind::SaoLine | BufferKind::SaoTileLine => {
            let table = if p.chroma.is_subsampled() {
                &SAO_LINE_SUBSAMPLED
            } else {
                &SAO_LINE_444
            };
            lcu_bytes(table[depth_idx][lcu_idx], width_in_ctb)?
        }
        BufferKind::SaoTileColumn => {
            if p.chroma == ChromaFormat::Monochrome {
                return Err(HwdecError::InvalidParameter(
                    "SAO tile 列缓冲不支持单色格式".into(),
                ));
            }
            let row = p.chroma.idc() as usize - 1;
            lcu_bytes(SAO_TILE_COLUMN[row][lcu_idx], height_in_ctb)?
        }
        BufferKind::MvTemporal => cachelines_to_bytes(mv_temporal_cachelines(p.width, p.height))?,
        BufferKind::CabacStreamout => {
            let ctbs = width_in_ctb as u64 * height_in_ctb as u64;
            let worst = if p.chroma == ChromaFormat::Yuv420 && p.bit_depth == 8 {
                WORST_CASE_CU_TU_INFO
            } else {
                WORST_CASE_CU_TU_INFO_REXT
            };
            let raw = ctbs * worst + ctbs + p.max_frame_size as u64 * 3;
            let aligned = raw.div_ceil(CACHELINE_SIZE as u64) * CACHELINE_SIZE as u64;
            u32::try_from(aligned).map_err(|_| {
                HwdecError::InvalidParameter(format!("CABAC stream-out 缓冲区 {aligned} 字节超限"))
            })?
        }
        BufferKind::RefBeforeLoopFilter => surface_size(p)?,
    };
    Ok(size)
}

fn lcu_row_store_cache(width: u32, bit_depth: u8, chroma: ChromaFormat) -> RowStoreCache {
    let is_444 = chroma == ChromaFormat::Yuv444;
    if width <= 1920 {
        if bit_depth > 8 {
            RowStoreCache {
                metadata: true,
                deblock: !is_444,
                sao: is_444,
            }
        } else {
            RowStoreCache {
                metadata: !is_444,
                deblock: true,
                sao: true,
            }
        }
    } else if width <= 3840 {
        RowStoreCache {
            sao: true,
            ..RowStoreCache::default()
        }
    } else {
        RowStoreCache::default()
    }
}

/// 解码表面字节大小 (与目标表面同布局)
///
/// 亮度行宽按 128 字节对齐、行数按 32 对齐, 色度平面按采样格式换算.
pub fn surface_size(p: &SizingParams) -> HwdecResult<u32> {
    let bytes_per_sample = if p.bit_depth > 8 { 2u64 } else { 1 };
    let pitch = (p.width as u64 * bytes_per_sample).div_ceil(128) * 128;
    let rows = (p.height as u64).div_ceil(32) * 32;
    let luma = pitch * rows;
    let chroma = match p.chroma {
        ChromaFormat::Monochrome => 0,
        ChromaFormat::Yuv420 => luma / 2,
        ChromaFormat::Yuv422 => luma,
        ChromaFormat::Yuv444 => luma * 2,
    };
    u32::try_from(luma + chroma)
        .map_err(|_| HwdecError::InvalidParameter(format!("表面尺寸 {}x{} 超限", p.width, p.height)))
}
