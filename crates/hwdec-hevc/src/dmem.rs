//! 预处理固件的 DMEM 数据.
//!
//! 布局 (小端序):
//!
//! | 字段 | 字节 |
//! |------|------|
//! | 以最小 CB 为单位的宽/高 | 2 + 2 |
//! | CB/CTB 尺寸、色度格式、位深 | 5 |
//! | 特性标志 | 1 |
//! | 当前 POC 与 15 个参考 POC | 4 + 60 |
//! | 三个 RPS 子集 | 24 |
//! | tile 行列数与列宽/行高 | 2 + 40 + 44 |
//! | slice 数量 | 2 |
//! | 参考索引映射 | 15 |
//! | 派生命令流容量 | 4 |
//!
//! 之后每个 slice 一条记录: 数据偏移 u32 + 数据长度 u32.

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use hwdec_core::align::{CACHELINE_SIZE, align_up};
use hwdec_core::{HwdecError, HwdecResult};

use crate::limits::{MAX_ACTIVE_REFS, MAX_REF_FRAMES, MAX_SLICES, MAX_TILE_COLUMNS, MAX_TILE_ROWS};
use crate::params::{PictureParameters, SliceParameters};
use crate::tile::TileGrid;

/// 头部字节数
pub const DMEM_HEADER_SIZE: usize = 2 * 2
    + 5
    + 1
    + 4
    + 4 * MAX_REF_FRAMES
    + 3 * MAX_ACTIVE_REFS
    + 2
    + 2 * MAX_TILE_COLUMNS
    + 2 * MAX_TILE_ROWS
    + 2
    + MAX_REF_FRAMES
    + 4;

/// 每个 slice 记录字节数
pub const DMEM_SLICE_RECORD_SIZE: usize = 8;

/// 参考索引映射中表示未映射
pub const UNMAPPED_REF: u8 = 0xff;

/// DMEM 缓冲区大小, 按最大 slice 数量计算
pub fn dmem_buffer_size() -> u32 {
    align_up((DMEM_HEADER_SIZE + MAX_SLICES * DMEM_SLICE_RECORD_SIZE) as u32, CACHELINE_SIZE)
}

/// 特性标志位
pub mod flags {
    pub const TILES: u8 = 1 << 0;
    pub const WAVEFRONT: u8 = 1 << 1;
    pub const WEIGHTED_PRED: u8 = 1 << 2;
    pub const WEIGHTED_BIPRED: u8 = 1 << 3;
    pub const SAO: u8 = 1 << 4;
    pub const TEMPORAL_MVP: u8 = 1 << 5;
}

/// 一帧的 DMEM 内容
#[derive(Debug, Clone)]
pub struct DmemPayload<'a> {
    pub pic: &'a PictureParameters,
    pub slices: &'a [SliceParameters],
    pub tiles: &'a TileGrid,
    pub ref_mapping: &'a [Option<u8>; MAX_REF_FRAMES],
    pub stream_capacity: u32,
}

impl DmemPayload<'_> {
    fn feature_flags(&self) -> u8 {
        let p = self.pic;
        let mut f = 0;
        if p.tiles_enabled {
            f |= flags::TILES;
        }
        if p.entropy_coding_sync_enabled {
            f |= flags::WAVEFRONT;
        }
        if p.weighted_pred {
            f |= flags::WEIGHTED_PRED;
        }
        if p.weighted_bipred {
            f |= flags::WEIGHTED_BIPRED;
        }
        if p.sample_adaptive_offset_enabled {
            f |= flags::SAO;
        }
        if p.sps_temporal_mvp_enabled {
            f |= flags::TEMPORAL_MVP;
        }
        f
    }

    /// 序列化为字节流
    pub fn serialize(&self) -> HwdecResult<Vec<u8>> {
        if self.slices.len() > MAX_SLICES {
            return Err(HwdecError::InvalidParameter(format!(
                "DMEM: slice 数量 {} 超出上限 {MAX_SLICES}",
                self.slices.len()
            )));
        }
        let mut out =
            Vec::with_capacity(DMEM_HEADER_SIZE + self.slices.len() * DMEM_SLICE_RECORD_SIZE);
        self.write_header(&mut out)?;
        for slice in self.slices {
            out.write_u32::<LittleEndian>(slice.slice_data_offset)?;
            out.write_u32::<LittleEndian>(slice.slice_data_size)?;
        }
        Ok(out)
    }

    fn write_header<W: Write>(&self, w: &mut W) -> HwdecResult<()> {
        let p = self.pic;
        w.write_u16::<LittleEndian>(p.pic_width_in_min_cbs_y)?;
        w.write_u16::<LittleEndian>(p.pic_height_in_min_cbs_y)?;
        w.write_u8(p.log2_min_luma_coding_block_size_minus3)?;
        w.write_u8(p.log2_diff_max_min_luma_coding_block_size)?;
        w.write_u8(p.chroma_format_idc)?;
        w.write_u8(p.bit_depth_luma_minus8)?;
        w.write_u8(p.bit_depth_chroma_minus8)?;
        w.write_u8(self.feature_flags())?;

        w.write_i32::<LittleEndian>(p.curr_pic_order_cnt)?;
        for poc in &p.ref_frame_poc_list {
            w.write_i32::<LittleEndian>(*poc)?;
        }
        w.write_all(&p.ref_pic_set_st_curr_before)?;
        w.write_all(&p.ref_pic_set_st_curr_after)?;
        w.write_all(&p.ref_pic_set_lt_curr)?;

        w.write_u8(self.tiles.columns().saturating_sub(1) as u8)?;
        w.write_u8(self.tiles.rows().saturating_sub(1) as u8)?;
        write_padded_u16(w, &self.tiles.column_widths, MAX_TILE_COLUMNS)?;
        write_padded_u16(w, &self.tiles.row_heights, MAX_TILE_ROWS)?;

        w.write_u16::<LittleEndian>(self.slices.len() as u16)?;
        for mapped in self.ref_mapping {
            w.write_u8(mapped.unwrap_or(UNMAPPED_REF))?;
        }
        w.write_u32::<LittleEndian>(self.stream_capacity)?;
        Ok(())
    }

    /// 实际需要传输给固件的字节数
    ///
    /// slice 数量达到上限时传输整个缓冲区.
    pub fn transfer_size(&self) -> u32 {
        if self.slices.len() >= MAX_SLICES {
            return dmem_buffer_size();
        }
        let used = DMEM_HEADER_SIZE + self.slices.len() * DMEM_SLICE_RECORD_SIZE;
        align_up(used as u32, CACHELINE_SIZE)
    }
}

fn write_padded_u16<W: Write>(w: &mut W, values: &[u32], len: usize) -> HwdecResult<()> {
    for i in 0..len {
        let v = values.get(i).copied().unwrap_or(0);
        w.write_u16::<LittleEndian>(v as u16)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::ReadBytesExt;
    use std::io::Cursor;

    #[test]
    fn test_layout_and_slice_records() {
        let mut pic = PictureParameters {
            pic_width_in_min_cbs_y: 240,
            pic_height_in_min_cbs_y: 135,
            log2_diff_max_min_luma_coding_block_size: 3,
            curr_pic_order_cnt: -3,
            tiles_enabled: true,
            num_tile_columns_minus1: 1,
            ..PictureParameters::default()
        };
        pic.entropy_coding_sync_enabled = false;
        let tiles = TileGrid::compute(&pic).expect("tile 计算失败");
        let slices = vec![SliceParameters::short(0, 100), SliceParameters::short(128, 50)];
        let mut mapping = [None; MAX_REF_FRAMES];
        mapping[2] = Some(0);
        let payload = DmemPayload {
            pic: &pic,
            slices: &slices,
            tiles: &tiles,
            ref_mapping: &mapping,
            stream_capacity: 4096,
        };

        let bytes = payload.serialize().expect("序列化失败");
        assert_eq!(bytes.len(), DMEM_HEADER_SIZE + 2 * DMEM_SLICE_RECORD_SIZE);

        let mut r = Cursor::new(&bytes[..]);
        assert_eq!(r.read_u16::<LittleEndian>().ok(), Some(240));
        assert_eq!(r.read_u16::<LittleEndian>().ok(), Some(135));
        r.set_position(9);
        let f = r.read_u8().expect("读取标志失败");
        assert_eq!(f & flags::TILES, flags::TILES);
        assert_eq!(f & flags::WAVEFRONT, 0);
        assert_eq!(r.read_i32::<LittleEndian>().ok(), Some(-3));

        // 列宽紧跟在行列数之后
        r.set_position((14 + 4 * MAX_REF_FRAMES + 3 * MAX_ACTIVE_REFS) as u64);
        assert_eq!(r.read_u8().ok(), Some(1));
        assert_eq!(r.read_u8().ok(), Some(0));
        assert_eq!(r.read_u16::<LittleEndian>().ok(), Some(15));
        assert_eq!(r.read_u16::<LittleEndian>().ok(), Some(15));

        let mapping_at = DMEM_HEADER_SIZE - 4 - MAX_REF_FRAMES;
        assert_eq!(bytes[mapping_at], UNMAPPED_REF);
        assert_eq!(bytes[mapping_at + 2], 0);

        r.set_position(DMEM_HEADER_SIZE as u64 + DMEM_SLICE_RECORD_SIZE as u64);
        assert_eq!(r.read_u32::<LittleEndian>().ok(), Some(128));
        assert_eq!(r.read_u32::<LittleEndian>().ok(), Some(50));
    }

    #[test]
    fn test_transfer_size_alignment() {
        let pic = PictureParameters::default();
        let tiles = TileGrid::default();
        let mapping = [None; MAX_REF_FRAMES];
        let slices = vec![SliceParameters::short(0, 1); 3];
        let payload = DmemPayload {
            pic: &pic,
            slices: &slices,
            tiles: &tiles,
            ref_mapping: &mapping,
            stream_capacity: 0,
        };
        let size = payload.transfer_size();
        assert_eq!(size % CACHELINE_SIZE, 0);
        assert!(size as usize >= DMEM_HEADER_SIZE + 3 * DMEM_SLICE_RECORD_SIZE);

        let many = vec![SliceParameters::short(0, 1); MAX_SLICES];
        let full = DmemPayload { slices: &many, ..payload };
        assert_eq!(full.transfer_size(), dmem_buffer_size());
    }
}
