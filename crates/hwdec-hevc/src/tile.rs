//! Tile 网格计算 (以 CTB 为单位).

use hwdec_core::{HwdecError, HwdecResult};

use crate::limits::{MAX_TILE_COLUMNS, MAX_TILE_ROWS};
use crate::params::PictureParameters;

/// 一帧的 tile 列宽/行高及起始位置
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileGrid {
    pub column_widths: Vec<u32>,
    pub row_heights: Vec<u32>,
    pub column_starts: Vec<u32>,
    pub row_starts: Vec<u32>,
}

impl TileGrid {
    /// 根据图像参数计算 tile 网格
    ///
    /// 未启用 tile 时整帧为一个 tile.
    pub fn compute(pic: &PictureParameters) -> HwdecResult<Self> {
        let width = pic.width_in_ctb();
        let height = pic.height_in_ctb();
        if !pic.tiles_enabled {
            return Ok(Self::from_sizes(vec![width], vec![height]));
        }

        let cols = pic.num_tile_columns();
        let rows = pic.num_tile_rows();
        if cols > MAX_TILE_COLUMNS || rows > MAX_TILE_ROWS {
            return Err(HwdecError::InvalidParameter(format!(
                "HEVC: tile 布局 {cols}x{rows} 超出硬件上限 {MAX_TILE_COLUMNS}x{MAX_TILE_ROWS}"
            )));
        }

        let (column_widths, row_heights) = if pic.uniform_spacing {
            (uniform_split(width, cols)?, uniform_split(height, rows)?)
        } else {
            (
                explicit_split("列", width, cols, &pic.column_width_minus1)?,
                explicit_split("行", height, rows, &pic.row_height_minus1)?,
            )
        };
        Ok(Self::from_sizes(column_widths, row_heights))
    }

    fn from_sizes(column_widths: Vec<u32>, row_heights: Vec<u32>) -> Self {
        let column_starts = prefix_sums(&column_widths);
        let row_starts = prefix_sums(&row_heights);
        Self {
            column_widths,
            row_heights,
            column_starts,
            row_starts,
        }
    }

    pub fn columns(&self) -> usize {
        self.column_widths.len()
    }

    pub fn rows(&self) -> usize {
        self.row_heights.len()
    }

    /// tile 总数
    pub fn tile_count(&self) -> usize {
        self.columns() * self.rows()
    }
}

fn prefix_sums(sizes: &[u32]) -> Vec<u32> {
    sizes
        .iter()
        .scan(0u32, |acc, &s| {
            let start = *acc;
            *acc += s;
            Some(start)
        })
        .collect()
}

/// 均匀划分: 第 i 段为 floor((i+1)*total/n) - floor(i*total/n)
pub fn uniform_split(total: u32, n: usize) -> HwdecResult<Vec<u32>> {
    if n == 0 || n as u32 > total {
        return Err(HwdecError::InvalidParameter(format!(
            "HEVC: 无法把 {total} 个 CTB 均匀划分为 {n} 段"
        )));
    }
    let total = total as u64;
    let n = n as u64;
    Ok((0..n)
        .map(|i| ((i + 1) * total / n - i * total / n) as u32)
        .collect())
}

/// 显式划分: 前 n-1 段取自码流, 最后一段为剩余部分
fn explicit_split(
    axis: &str,
    total: u32,
    n: usize,
    minus1: &[u16],
) -> HwdecResult<Vec<u32>> {
    if minus1.len() < n - 1 {
        return Err(HwdecError::InvalidParameter(format!(
            "HEVC: tile {axis}尺寸只给出 {} 个, 需要 {}",
            minus1.len(),
            n - 1
        )));
    }
    let mut sizes: Vec<u32> = minus1[..n - 1].iter().map(|&v| v as u32 + 1).collect();
    let used: u32 = sizes.iter().sum();
    if used >= total {
        return Err(HwdecError::InvalidParameter(format!(
            "HEVC: tile {axis}尺寸之和 {used} 未给最后一段留下空间 (总计 {total})"
        )));
    }
    sizes.push(total - used);
    Ok(sizes)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1920x1080, CTB 64
    fn pic_1080p() -> PictureParameters {
        PictureParameters {
            pic_width_in_min_cbs_y: 240,
            pic_height_in_min_cbs_y: 135,
            log2_min_luma_coding_block_size_minus3: 0,
            log2_diff_max_min_luma_coding_block_size: 3,
            ..PictureParameters::default()
        }
    }

    #[test]
    fn test_no_tiles_single_cell() {
        let grid = TileGrid::compute(&pic_1080p()).expect("计算失败");
        assert_eq!(grid.column_widths, vec![30]);
        assert_eq!(grid.row_heights, vec![17]);
        assert_eq!(grid.tile_count(), 1);
    }

    #[test]
    fn test_uniform_split_sums_exactly() {
        for total in 1..=70u32 {
            for n in 1..=total.min(MAX_TILE_COLUMNS as u32) as usize {
                let parts = uniform_split(total, n).expect("划分失败");
                assert_eq!(parts.len(), n);
                assert_eq!(parts.iter().sum::<u32>(), total, "{total} 分 {n} 段");
                let max = parts.iter().max().copied().unwrap_or(0);
                let min = parts.iter().min().copied().unwrap_or(0);
                assert!(max - min <= 1, "均匀划分相差不超过 1");
            }
        }
    }

    #[test]
    fn test_uniform_grid_starts() {
        let mut pic = pic_1080p();
        pic.tiles_enabled = true;
        pic.num_tile_columns_minus1 = 3;
        pic.num_tile_rows_minus1 = 1;
        let grid = TileGrid::compute(&pic).expect("计算失败");
        assert_eq!(grid.column_widths, vec![7, 8, 7, 8]);
        assert_eq!(grid.column_starts, vec![0, 7, 15, 22]);
        assert_eq!(grid.row_heights, vec![8, 9]);
        assert_eq!(grid.row_starts, vec![0, 8]);
    }

    #[test]
    fn test_explicit_grid_remainder() {
        let mut pic = pic_1080p();
        pic.tiles_enabled = true;
        pic.uniform_spacing = false;
        pic.num_tile_columns_minus1 = 2;
        pic.column_width_minus1 = vec![9, 4];
        pic.num_tile_rows_minus1 = 0;
        let grid = TileGrid::compute(&pic).expect("计算失败");
        assert_eq!(grid.column_widths, vec![10, 5, 15]);
        assert_eq!(grid.row_heights, vec![17]);
    }

    #[test]
    fn test_explicit_grid_without_remainder_rejected() {
        let mut pic = pic_1080p();
        pic.tiles_enabled = true;
        pic.uniform_spacing = false;
        pic.num_tile_columns_minus1 = 1;
        pic.column_width_minus1 = vec![29];
        assert!(TileGrid::compute(&pic).is_err());
        pic.column_width_minus1 = vec![];
        assert!(TileGrid::compute(&pic).is_err(), "缺少列宽");
    }

    #[test]
    fn test_tile_limits() {
        let mut pic = pic_1080p();
        pic.pic_width_in_min_cbs_y = 1000;
        pic.tiles_enabled = true;
        pic.num_tile_columns_minus1 = 20;
        assert!(TileGrid::compute(&pic).is_err(), "21 列超限");
        pic.num_tile_columns_minus1 = 19;
        assert!(TileGrid::compute(&pic).is_ok());
        pic.num_tile_rows_minus1 = 22;
        assert!(TileGrid::compute(&pic).is_err(), "23 行超限");
    }
}
