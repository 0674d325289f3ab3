//! 每帧解码参数.
//!
//! 由上游码流解析器填充, 编排器只读取. 字段命名沿用 HEVC 语法元素,
//! 帧尺寸以最小编码块为单位给出.

use serde::{Deserialize, Serialize};

use hwdec_core::align::ceil_div;
use hwdec_core::{ChromaFormat, HwdecError, HwdecResult};

use crate::limits::{
    MAX_ACTIVE_REFS, MAX_PICTURE_HEIGHT, MAX_PICTURE_WIDTH, MAX_REF_FRAMES, NUM_DPB_SLOTS,
    RPS_UNUSED,
};

// ============================================================
// 图像条目
// ============================================================

/// 图像条目: DPB 帧索引与标志
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PicEntry {
    /// DPB 帧索引 (0..127)
    pub frame_idx: u8,
    /// 长期参考
    #[serde(default)]
    pub long_term: bool,
    /// 条目无效 (参考列表空位)
    #[serde(default)]
    pub invalid: bool,
}

impl PicEntry {
    /// 无效条目
    pub const INVALID: Self = Self {
        frame_idx: 0x7f,
        long_term: false,
        invalid: true,
    };

    /// 短期参考条目
    pub fn new(frame_idx: u8) -> Self {
        Self {
            frame_idx,
            long_term: false,
            invalid: false,
        }
    }

    /// 长期参考条目
    pub fn long_term(frame_idx: u8) -> Self {
        Self {
            frame_idx,
            long_term: true,
            invalid: false,
        }
    }

    /// 条目有效且帧索引在 DPB 容量内
    pub fn is_valid(&self) -> bool {
        !self.invalid && (self.frame_idx as usize) < NUM_DPB_SLOTS
    }
}

impl Default for PicEntry {
    fn default() -> Self {
        Self::INVALID
    }
}

// ============================================================
// 图像参数
// ============================================================

/// 图像级参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PictureParameters {
    pub pic_width_in_min_cbs_y: u16,
    pub pic_height_in_min_cbs_y: u16,
    pub log2_min_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_luma_coding_block_size: u8,
    pub chroma_format_idc: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,

    /// 当前图像
    pub curr_pic: PicEntry,
    pub curr_pic_order_cnt: i32,
    /// 参考帧列表 (RefFrameList)
    pub ref_frame_list: [PicEntry; MAX_REF_FRAMES],
    /// 参考帧 POC 列表, 与 `ref_frame_list` 一一对应
    pub ref_frame_poc_list: [i32; MAX_REF_FRAMES],
    /// RPS 子集, 元素为 `ref_frame_list` 下标, `0xff` 表示未使用
    pub ref_pic_set_st_curr_before: [u8; MAX_ACTIVE_REFS],
    pub ref_pic_set_st_curr_after: [u8; MAX_ACTIVE_REFS],
    pub ref_pic_set_lt_curr: [u8; MAX_ACTIVE_REFS],
    pub intra_pic: bool,

    // tile
    pub tiles_enabled: bool,
    pub uniform_spacing: bool,
    pub num_tile_columns_minus1: u8,
    pub num_tile_rows_minus1: u8,
    pub column_width_minus1: Vec<u16>,
    pub row_height_minus1: Vec<u16>,

    /// 波前并行 (WPP)
    pub entropy_coding_sync_enabled: bool,
    pub weighted_pred: bool,
    pub weighted_bipred: bool,
    pub deblocking_filter_override_enabled: bool,
    pub pps_deblocking_filter_disabled: bool,
    pub sample_adaptive_offset_enabled: bool,
    pub sps_temporal_mvp_enabled: bool,
    /// 屏幕内容编码: 当前图像可作为参考 (帧内块拷贝)
    pub curr_pic_ref_enabled: bool,

    pub status_report_feedback_number: u32,
}

impl Default for PictureParameters {
    fn default() -> Self {
        Self {
            pic_width_in_min_cbs_y: 0,
            pic_height_in_min_cbs_y: 0,
            log2_min_luma_coding_block_size_minus3: 0,
            log2_diff_max_min_luma_coding_block_size: 0,
            chroma_format_idc: 1,
            bit_depth_luma_minus8: 0,
            bit_depth_chroma_minus8: 0,
            curr_pic: PicEntry::INVALID,
            curr_pic_order_cnt: 0,
            ref_frame_list: [PicEntry::INVALID; MAX_REF_FRAMES],
            ref_frame_poc_list: [0; MAX_REF_FRAMES],
            ref_pic_set_st_curr_before: [RPS_UNUSED; MAX_ACTIVE_REFS],
            ref_pic_set_st_curr_after: [RPS_UNUSED; MAX_ACTIVE_REFS],
            ref_pic_set_lt_curr: [RPS_UNUSED; MAX_ACTIVE_REFS],
            intra_pic: false,
            tiles_enabled: false,
            uniform_spacing: true,
            num_tile_columns_minus1: 0,
            num_tile_rows_minus1: 0,
            column_width_minus1: Vec::new(),
            row_height_minus1: Vec::new(),
            entropy_coding_sync_enabled: false,
            weighted_pred: false,
            weighted_bipred: false,
            deblocking_filter_override_enabled: false,
            pps_deblocking_filter_disabled: false,
            sample_adaptive_offset_enabled: false,
            sps_temporal_mvp_enabled: true,
            curr_pic_ref_enabled: false,
            status_report_feedback_number: 0,
        }
    }
}

impl PictureParameters {
    /// 最小编码块边长 (像素)
    pub fn min_cb_size(&self) -> u32 {
        1 << (self.log2_min_luma_coding_block_size_minus3 as u32 + 3)
    }

    /// 帧宽 (像素)
    pub fn width(&self) -> u32 {
        self.pic_width_in_min_cbs_y as u32 * self.min_cb_size()
    }

    /// 帧高 (像素)
    pub fn height(&self) -> u32 {
        self.pic_height_in_min_cbs_y as u32 * self.min_cb_size()
    }

    /// CTB 尺寸的 log2
    pub fn ctb_log2_size(&self) -> u32 {
        self.log2_min_luma_coding_block_size_minus3 as u32
            + 3
            + self.log2_diff_max_min_luma_coding_block_size as u32
    }

    /// CTB 边长 (像素)
    pub fn ctb_size(&self) -> u32 {
        1 << self.ctb_log2_size()
    }

    pub fn width_in_ctb(&self) -> u32 {
        ceil_div(self.width(), self.ctb_size())
    }

    pub fn height_in_ctb(&self) -> u32 {
        ceil_div(self.height(), self.ctb_size())
    }

    pub fn chroma_format(&self) -> HwdecResult<ChromaFormat> {
        ChromaFormat::from_idc(self.chroma_format_idc)
    }

    /// 亮度/色度中较大的位深
    pub fn bit_depth(&self) -> u8 {
        8 + self.bit_depth_luma_minus8.max(self.bit_depth_chroma_minus8)
    }

    pub fn num_tile_columns(&self) -> usize {
        self.num_tile_columns_minus1 as usize + 1
    }

    pub fn num_tile_rows(&self) -> usize {
        self.num_tile_rows_minus1 as usize + 1
    }

    /// 三个 RPS 子集的全部条目
    pub fn rps_entries(&self) -> impl Iterator<Item = u8> + '_ {
        self.ref_pic_set_st_curr_before
            .iter()
            .chain(self.ref_pic_set_st_curr_after.iter())
            .chain(self.ref_pic_set_lt_curr.iter())
            .copied()
    }

    /// 帧内图像: 显式标记, 或 RPS 子集未引用任何参考帧
    pub fn is_intra(&self) -> bool {
        self.intra_pic
            || !self
                .rps_entries()
                .any(|idx| (idx as usize) < MAX_REF_FRAMES)
    }

    /// 帧内块拷贝时当前图像需要保留环路滤波前的副本
    pub fn needs_pre_loop_filter_copy(&self) -> bool {
        self.curr_pic_ref_enabled
            && (!self.pps_deblocking_filter_disabled
                || self.sample_adaptive_offset_enabled
                || self.deblocking_filter_override_enabled)
    }

    /// 校验与编排相关的参数范围
    pub fn validate(&self) -> HwdecResult<()> {
        if !self.curr_pic.is_valid() {
            return Err(HwdecError::InvalidParameter(format!(
                "HEVC: 当前图像帧索引 {} 无效",
                self.curr_pic.frame_idx
            )));
        }
        if self.pic_width_in_min_cbs_y == 0 || self.pic_height_in_min_cbs_y == 0 {
            return Err(HwdecError::InvalidParameter(
                "HEVC: 帧尺寸为 0".into(),
            ));
        }
        let ctb_log2 = self.ctb_log2_size();
        if !(4..=6).contains(&ctb_log2) {
            return Err(HwdecError::InvalidParameter(format!(
                "HEVC: CTB log2 尺寸 {ctb_log2} 超出 4..=6"
            )));
        }
        let (width, height) = (self.width(), self.height());
        if width > MAX_PICTURE_WIDTH || height > MAX_PICTURE_HEIGHT {
            return Err(HwdecError::InvalidParameter(format!(
                "HEVC: 帧尺寸 {width}x{height} 超出硬件上限 {MAX_PICTURE_WIDTH}x{MAX_PICTURE_HEIGHT}"
            )));
        }
        self.chroma_format()?;
        if self.bit_depth_luma_minus8 > 4 || self.bit_depth_chroma_minus8 > 4 {
            return Err(HwdecError::InvalidParameter(format!(
                "HEVC: 位深 luma_minus8={} chroma_minus8={} 超出硬件范围",
                self.bit_depth_luma_minus8, self.bit_depth_chroma_minus8
            )));
        }

        for (i, entry) in self.ref_frame_list.iter().enumerate() {
            if !entry.invalid && entry.frame_idx as usize >= NUM_DPB_SLOTS {
                return Err(HwdecError::InvalidParameter(format!(
                    "HEVC: RefFrameList[{i}] 帧索引 {} 超出 DPB 容量",
                    entry.frame_idx
                )));
            }
        }
        for idx in self.rps_entries() {
            if idx != RPS_UNUSED && idx as usize >= MAX_REF_FRAMES {
                return Err(HwdecError::InvalidParameter(format!(
                    "HEVC: RPS 索引 {idx} 超出参考帧列表容量"
                )));
            }
        }
        Ok(())
    }
}

// ============================================================
// Slice 参数
// ============================================================

/// Slice 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SliceType {
    B,
    P,
    #[default]
    I,
}

impl SliceType {
    /// 由 `slice_type` 语法元素转换
    pub fn from_syntax(value: u8) -> HwdecResult<Self> {
        match value {
            0 => Ok(Self::B),
            1 => Ok(Self::P),
            2 => Ok(Self::I),
            _ => Err(HwdecError::InvalidParameter(format!(
                "HEVC: slice_type={value} 非法"
            ))),
        }
    }
}

/// 单个参考帧的加权预测系数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WeightEntry {
    pub luma_weight: i16,
    pub luma_offset: i16,
    pub chroma_weight: [i16; 2],
    pub chroma_offset: [i16; 2],
}

/// 加权预测表
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PredWeightTable {
    pub luma_log2_weight_denom: u8,
    pub chroma_log2_weight_denom: u8,
    pub l0: Vec<WeightEntry>,
    pub l1: Vec<WeightEntry>,
}

/// Slice 级参数
///
/// 短格式只使用 `slice_data_size` 与 `slice_data_offset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SliceParameters {
    pub slice_data_size: u32,
    pub slice_data_offset: u32,
    pub byte_offset_to_slice_data: u32,
    pub slice_segment_address: u32,
    pub slice_type: SliceType,
    /// L0/L1 参考列表, 元素为 `ref_frame_list` 下标, `0xff` 表示空位
    pub ref_pic_list: [[u8; MAX_REF_FRAMES]; 2],
    pub num_ref_idx_l0_active_minus1: u8,
    pub num_ref_idx_l1_active_minus1: u8,
    pub slice_temporal_mvp_enabled: bool,
    pub collocated_from_l0: bool,
    pub collocated_ref_idx: u8,
    pub dependent_slice_segment: bool,
    pub last_slice_of_pic: bool,
    pub pred_weight_table: Option<PredWeightTable>,
}

impl Default for SliceParameters {
    fn default() -> Self {
        Self {
            slice_data_size: 0,
            slice_data_offset: 0,
            byte_offset_to_slice_data: 0,
            slice_segment_address: 0,
            slice_type: SliceType::I,
            ref_pic_list: [[RPS_UNUSED; MAX_REF_FRAMES]; 2],
            num_ref_idx_l0_active_minus1: 0,
            num_ref_idx_l1_active_minus1: 0,
            slice_temporal_mvp_enabled: false,
            collocated_from_l0: true,
            collocated_ref_idx: 0,
            dependent_slice_segment: false,
            last_slice_of_pic: false,
            pred_weight_table: None,
        }
    }
}

impl SliceParameters {
    /// 仅含数据位置的短格式 slice
    pub fn short(offset: u32, size: u32) -> Self {
        Self {
            slice_data_offset: offset,
            slice_data_size: size,
            ..Self::default()
        }
    }

    /// slice 数据末尾在码流中的偏移
    pub fn data_end(&self) -> HwdecResult<u32> {
        self.slice_data_offset
            .checked_add(self.slice_data_size)
            .ok_or_else(|| {
                HwdecError::InvalidParameter(format!(
                    "HEVC: slice 数据区 {}+{} 溢出",
                    self.slice_data_offset, self.slice_data_size
                ))
            })
    }

    /// 指定列表当前激活的参考数量 (I slice 为 0, P slice 无 L1)
    pub fn num_active_refs(&self, list: usize) -> usize {
        match (self.slice_type, list) {
            (SliceType::I, _) => 0,
            (SliceType::P, 1) => 0,
            (_, 0) => self.num_ref_idx_l0_active_minus1 as usize + 1,
            _ => self.num_ref_idx_l1_active_minus1 as usize + 1,
        }
    }
}

// ============================================================
// 量化矩阵
// ============================================================

/// 反量化矩阵 (scaling list)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IqMatrix {
    /// 6 x 16
    pub scaling_lists_4x4: Vec<Vec<u8>>,
    /// 6 x 64
    pub scaling_lists_8x8: Vec<Vec<u8>>,
    /// 6 x 64
    pub scaling_lists_16x16: Vec<Vec<u8>>,
    /// 2 x 64
    pub scaling_lists_32x32: Vec<Vec<u8>>,
    pub dc_16x16: Vec<u8>,
    pub dc_32x32: Vec<u8>,
}

impl Default for IqMatrix {
    /// 平坦矩阵 (全部为 16)
    fn default() -> Self {
        Self {
            scaling_lists_4x4: vec![vec![16; 16]; 6],
            scaling_lists_8x8: vec![vec![16; 64]; 6],
            scaling_lists_16x16: vec![vec![16; 64]; 6],
            scaling_lists_32x32: vec![vec![16; 64]; 2],
            dc_16x16: vec![16; 6],
            dc_32x32: vec![16; 2],
        }
    }
}

impl IqMatrix {
    /// 校验各矩阵维度
    pub fn validate(&self) -> HwdecResult<()> {
        check_lists("4x4", &self.scaling_lists_4x4, 6, 16)?;
        check_lists("8x8", &self.scaling_lists_8x8, 6, 64)?;
        check_lists("16x16", &self.scaling_lists_16x16, 6, 64)?;
        check_lists("32x32", &self.scaling_lists_32x32, 2, 64)?;
        if self.dc_16x16.len() != 6 || self.dc_32x32.len() != 2 {
            return Err(HwdecError::InvalidParameter(
                "HEVC: scaling list DC 系数数量错误".into(),
            ));
        }
        Ok(())
    }
}

fn check_lists(name: &str, lists: &[Vec<u8>], count: usize, coeffs: usize) -> HwdecResult<()> {
    if lists.len() != count || lists.iter().any(|l| l.len() != coeffs) {
        return Err(HwdecError::InvalidParameter(format!(
            "HEVC: scaling list {name} 应为 {count}x{coeffs}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_1080p() -> PictureParameters {
        PictureParameters {
            pic_width_in_min_cbs_y: 240,
            pic_height_in_min_cbs_y: 135,
            log2_min_luma_coding_block_size_minus3: 0,
            log2_diff_max_min_luma_coding_block_size: 3,
            curr_pic: PicEntry::new(0),
            ..PictureParameters::default()
        }
    }

    #[test]
    fn test_dimensions_from_min_cb_units() {
        let pic = build_1080p();
        assert_eq!(pic.width(), 1920);
        assert_eq!(pic.height(), 1080);
        assert_eq!(pic.ctb_log2_size(), 6);
        assert_eq!(pic.width_in_ctb(), 30);
        assert_eq!(pic.height_in_ctb(), 17, "1080/64 应向上取整");
    }

    #[test]
    fn test_intra_detection_from_rps() {
        let mut pic = build_1080p();
        assert!(pic.is_intra(), "RPS 全空时应视为帧内图像");
        pic.ref_pic_set_lt_curr[3] = 2;
        assert!(!pic.is_intra(), "长期 RPS 引用参考帧时不是帧内图像");
        pic.intra_pic = true;
        assert!(pic.is_intra());
    }

    #[test]
    fn test_validate_rejects_out_of_range_indices() {
        let mut pic = build_1080p();
        assert!(pic.validate().is_ok());

        pic.ref_pic_set_st_curr_before[0] = 15;
        assert!(matches!(
            pic.validate(),
            Err(HwdecError::InvalidParameter(_))
        ));

        let mut pic = build_1080p();
        pic.ref_frame_list[2] = PicEntry::new(127);
        assert!(
            pic.validate().is_err(),
            "超出 DPB 容量的帧索引应被拒绝"
        );

        let mut pic = build_1080p();
        pic.log2_diff_max_min_luma_coding_block_size = 4;
        assert!(pic.validate().is_err(), "CTB 128 超出硬件范围");
    }

    #[test]
    fn test_validate_rejects_oversized_picture() {
        let mut pic = build_1080p();
        pic.pic_width_in_min_cbs_y = 2048;
        pic.pic_height_in_min_cbs_y = 2048;
        assert!(pic.validate().is_ok(), "16K 帧应在硬件范围内");

        pic.pic_width_in_min_cbs_y = 65535;
        pic.pic_height_in_min_cbs_y = 65535;
        assert!(matches!(
            pic.validate(),
            Err(HwdecError::InvalidParameter(_))
        ));

        let mut pic = build_1080p();
        pic.pic_height_in_min_cbs_y = 2049;
        assert!(pic.validate().is_err(), "帧高超出上限应被拒绝");
    }

    #[test]
    fn test_pre_loop_filter_copy_rule() {
        let mut pic = build_1080p();
        pic.curr_pic_ref_enabled = true;
        pic.pps_deblocking_filter_disabled = true;
        assert!(!pic.needs_pre_loop_filter_copy());
        pic.sample_adaptive_offset_enabled = true;
        assert!(pic.needs_pre_loop_filter_copy());
        pic.curr_pic_ref_enabled = false;
        assert!(!pic.needs_pre_loop_filter_copy());
    }

    #[test]
    fn test_slice_active_ref_counts() {
        let mut slice = SliceParameters::short(0, 100);
        assert_eq!(slice.num_active_refs(0), 0);
        slice.slice_type = SliceType::P;
        slice.num_ref_idx_l0_active_minus1 = 2;
        assert_eq!(slice.num_active_refs(0), 3);
        assert_eq!(slice.num_active_refs(1), 0);
        slice.slice_type = SliceType::B;
        assert_eq!(slice.num_active_refs(1), 1);
    }

    #[test]
    fn test_slice_params_deserialize_with_defaults() {
        let json = r#"{"slice_data_size": 512, "slice_data_offset": 64, "slice_type": "P"}"#;
        let slice: SliceParameters = serde_json::from_str(json).expect("反序列化失败");
        assert_eq!(slice.slice_type, SliceType::P);
        assert_eq!(slice.ref_pic_list[0][0], RPS_UNUSED);
        assert_eq!(slice.data_end().ok(), Some(576));
    }

    #[test]
    fn test_iq_matrix_shape_check() {
        let mut iq = IqMatrix::default();
        assert!(iq.validate().is_ok());
        iq.scaling_lists_32x32.pop();
        assert!(iq.validate().is_err());
    }
}
