//! 多管线解码模式决策.
//!
//! 每帧根据视频引擎数量、分辨率、格式与 tile 布局计算一次 [`DecodeMode`],
//! 之后阶段状态机、通道数与派生命令流尺寸都只读取这个枚举.

use std::fmt;

use log::debug;

use hwdec_core::{ChromaFormat, HwdecError, HwdecResult};

use crate::limits::{MAX_TILE_COLUMNS, MAX_TILE_ROWS};

// 分辨率阈值
const THRESHOLD1_WIDTH: u32 = 3840;
const THRESHOLD3_WIDTH: u32 = 5120;
const THRESHOLD4_WIDTH: u32 = 7680;
const THRESHOLD1_HEIGHT: u32 = 1440;
const THRESHOLD2_HEIGHT: u32 = 1716;
const THRESHOLD3_HEIGHT: u32 = 2160;
const THRESHOLD4_HEIGHT: u32 = 4320;

/// 单帧解码模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// 单管线
    SinglePipe,
    /// 虚拟 tile: 一次前端 CABAC 通道加每条管线一次后端通道
    VirtualTile { pipes: u8 },
    /// 真实 tile: tile 列轮流分配给各管线
    RealTile {
        pipes: u8,
        phases: u8,
        pipes_in_last_phase: u8,
    },
}

impl DecodeMode {
    pub fn is_scalable(&self) -> bool {
        !matches!(self, Self::SinglePipe)
    }

    pub fn pipes(&self) -> u8 {
        match self {
            Self::SinglePipe => 1,
            Self::VirtualTile { pipes } | Self::RealTile { pipes, .. } => *pipes,
        }
    }

    /// 主解码通道数 (不含预处理通道)
    pub fn main_pass_count(&self) -> usize {
        match *self {
            Self::SinglePipe => 1,
            Self::VirtualTile { pipes } => pipes as usize + 1,
            Self::RealTile {
                pipes,
                phases,
                pipes_in_last_phase,
            } => pipes as usize * (phases as usize - 1) + pipes_in_last_phase as usize,
        }
    }
}

impl fmt::Display for DecodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SinglePipe => write!(f, "single-pipe"),
            Self::VirtualTile { pipes } => write!(f, "virtual-tile x{pipes}"),
            Self::RealTile { pipes, phases, .. } => {
                write!(f, "real-tile x{pipes} ({phases} phases)")
            }
        }
    }
}

/// 模式决策输入
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalabilityInputs {
    /// 硬件代际支持多管线
    pub supported: bool,
    pub num_vdbox: u8,
    pub pipe_override: Option<u8>,
    /// 后处理缩放只能在单管线下工作
    pub using_scaler: bool,
    pub secure_decode: bool,
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub chroma: ChromaFormat,
    pub tiles_enabled: bool,
    pub tile_columns: usize,
    pub tile_rows: usize,
    /// 屏幕内容编码 (不支持虚拟 tile)
    pub scc: bool,
}

impl ScalabilityInputs {
    /// 8/10 bit 4:2:0 以外的格式
    fn is_rext(&self) -> bool {
        !(self.chroma == ChromaFormat::Yuv420 && self.bit_depth <= 10)
    }
}

fn area(w: u32, h: u32) -> u64 {
    u64::from(w) * u64::from(h)
}

fn at_least_4k(w: u32, h: u32) -> bool {
    area(w, h) >= area(THRESHOLD1_WIDTH, THRESHOLD3_HEIGHT)
        || (w >= THRESHOLD1_WIDTH && h >= THRESHOLD2_HEIGHT)
}

fn at_least_5k(w: u32, h: u32) -> bool {
    area(w, h) >= area(THRESHOLD3_WIDTH, THRESHOLD3_HEIGHT)
        || (w >= THRESHOLD3_WIDTH && h >= THRESHOLD1_HEIGHT)
}

fn at_least_8k(w: u32, h: u32) -> bool {
    area(w, h) >= area(THRESHOLD4_WIDTH, THRESHOLD4_HEIGHT)
}

/// tile 布局允许真实 tile 模式
pub fn real_tile_possible(inputs: &ScalabilityInputs) -> bool {
    inputs.tiles_enabled
        && inputs.tile_columns > 1
        && inputs.tile_columns <= MAX_TILE_COLUMNS
        && inputs.tile_rows <= MAX_TILE_ROWS
}

/// 决定管线数量
pub fn decide_pipes(inputs: &ScalabilityInputs) -> u8 {
    if !inputs.supported || inputs.num_vdbox <= 1 || inputs.using_scaler {
        return 1;
    }
    // 覆盖为 1 时强制单管线
    if inputs.pipe_override == Some(1) {
        return 1;
    }
    let (w, h) = (inputs.width, inputs.height);
    let large = if inputs.is_rext() {
        at_least_4k(w, h)
    } else {
        at_least_5k(w, h)
    };
    let wants_split = large || (real_tile_possible(inputs) && !inputs.secure_decode);
    if !wants_split {
        return 1;
    }

    match inputs.pipe_override {
        Some(n) if n >= 2 => n.min(inputs.num_vdbox),
        _ if inputs.num_vdbox > 2 && at_least_8k(w, h) => inputs.num_vdbox.min(3),
        _ => 2,
    }
}

/// 计算本帧解码模式
pub fn decide_mode(inputs: &ScalabilityInputs) -> HwdecResult<DecodeMode> {
    let pipes = decide_pipes(inputs);
    let mode = if pipes <= 1 {
        DecodeMode::SinglePipe
    } else if real_tile_possible(inputs) {
        let columns = u8::try_from(inputs.tile_columns).map_err(|_| {
            HwdecError::InvalidParameter(format!("tile 列数 {} 超限", inputs.tile_columns))
        })?;
        let phases = columns.div_ceil(pipes);
        DecodeMode::RealTile {
            pipes,
            phases,
            pipes_in_last_phase: columns - pipes * (phases - 1),
        }
    } else if inputs.scc {
        // 屏幕内容编码不支持虚拟 tile, 回退单管线
        DecodeMode::SinglePipe
    } else {
        DecodeMode::VirtualTile { pipes }
    };
    debug!("解码模式: {mode} ({}x{})", inputs.width, inputs.height);
    Ok(mode)
}

/// 本帧通道总数, 预处理占用一个额外通道
pub fn pass_count(mode: &DecodeMode, pre_process: bool) -> usize {
    mode.main_pass_count() + usize::from(pre_process)
}

// ============================================================
// 真实 tile 游标
// ============================================================

/// 真实 tile 模式下当前管线与阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealTileCursor {
    pipes: u8,
    phases: u8,
    pipes_in_last_phase: u8,
    pipe: u8,
    phase: u8,
}

impl RealTileCursor {
    pub fn new(mode: &DecodeMode) -> HwdecResult<Self> {
        match *mode {
            DecodeMode::RealTile {
                pipes,
                phases,
                pipes_in_last_phase,
            } => Ok(Self {
                pipes,
                phases,
                pipes_in_last_phase,
                pipe: 0,
                phase: 0,
            }),
            other => Err(HwdecError::InternalConsistency(format!(
                "{other} 模式没有真实 tile 游标"
            ))),
        }
    }

    pub fn pipe(&self) -> u8 {
        self.pipe
    }

    pub fn phase(&self) -> u8 {
        self.phase
    }

    /// 当前解码的 tile 列
    pub fn column(&self) -> usize {
        self.pipe as usize + self.phase as usize * self.pipes as usize
    }

    /// 当前阶段参与的管线数
    pub fn pipes_in_phase(&self) -> u8 {
        if self.phase + 1 == self.phases {
            self.pipes_in_last_phase
        } else {
            self.pipes
        }
    }

    /// 是否为本帧最后一个 tile 列
    pub fn is_last(&self) -> bool {
        self.phase + 1 == self.phases && self.pipe + 1 == self.pipes_in_last_phase
    }

    /// 当前阶段的最后一条管线
    pub fn is_last_in_phase(&self) -> bool {
        self.pipe + 1 == self.pipes_in_phase()
    }

    /// 前进到下一个 tile 列
    pub fn advance(&mut self) -> HwdecResult<()> {
        if self.is_last() {
            return Err(HwdecError::InternalConsistency(format!(
                "真实 tile 游标越过最后阶段 (phase {} / {})",
                self.phase, self.phases
            )));
        }
        self.pipe += 1;
        if self.pipe >= self.pipes_in_phase() {
            self.pipe = 0;
            self.phase += 1;
        }
        Ok(())
    }
}

// ============================================================
// 派生命令流尺寸
// ============================================================

/// 派生 (二级) 命令流的数量与单个字节数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecondLevelSizing {
    pub count: usize,
    pub size: u32,
}

/// 按解码模式计算派生命令流尺寸
pub fn second_level_sizing(
    mode: &DecodeMode,
    separate_tile_decoding: bool,
    num_slices: usize,
    tile_columns: usize,
    tile_rows: usize,
    slice_state_bytes: u32,
) -> HwdecResult<SecondLevelSizing> {
    let (count, units) = match mode {
        DecodeMode::RealTile { .. } => (tile_columns, num_slices + 1 + tile_rows.saturating_sub(1)),
        _ if separate_tile_decoding => (1, num_slices + tile_rows * tile_columns),
        _ => (1, num_slices),
    };
    let size = u32::try_from(units)
        .ok()
        .and_then(|u| u.checked_mul(slice_state_bytes))
        .ok_or_else(|| HwdecError::InvalidParameter(format!("派生命令流 {units} 个单元超限")))?;
    Ok(SecondLevelSizing { count, size })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(width: u32, height: u32) -> ScalabilityInputs {
        ScalabilityInputs {
            supported: true,
            num_vdbox: 2,
            pipe_override: None,
            using_scaler: false,
            secure_decode: false,
            width,
            height,
            bit_depth: 8,
            chroma: ChromaFormat::Yuv420,
            tiles_enabled: false,
            tile_columns: 1,
            tile_rows: 1,
            scc: false,
        }
    }

    #[test]
    fn test_single_pipe_below_thresholds() {
        let i = inputs(3840, 2160);
        assert_eq!(decide_pipes(&i), 1, "4:2:0 8bit 4K 未达到 5K 阈值");
        assert_eq!(decide_mode(&i).ok(), Some(DecodeMode::SinglePipe));

        let mut rext = inputs(3840, 2160);
        rext.chroma = ChromaFormat::Yuv444;
        assert_eq!(decide_pipes(&rext), 2, "RExt 格式 4K 应拆分");
    }

    #[test]
    fn test_virtual_tile_for_large_frames() {
        let i = inputs(5120, 2880);
        let mode = decide_mode(&i).expect("决策失败");
        assert_eq!(mode, DecodeMode::VirtualTile { pipes: 2 });
        assert_eq!(pass_count(&mode, false), 3);
        assert_eq!(pass_count(&mode, true), 4);
    }

    #[test]
    fn test_real_tile_phases() {
        let mut i = inputs(1920, 1080);
        i.tiles_enabled = true;
        i.tile_columns = 5;
        i.tile_rows = 2;
        let mode = decide_mode(&i).expect("决策失败");
        assert_eq!(
            mode,
            DecodeMode::RealTile {
                pipes: 2,
                phases: 3,
                pipes_in_last_phase: 1
            }
        );
        assert_eq!(pass_count(&mode, false), 5);

        i.secure_decode = true;
        assert_eq!(decide_pipes(&i), 1, "安全解码不启用真实 tile");
    }

    #[test]
    fn test_scc_falls_back_to_single_pipe() {
        let mut i = inputs(7680, 4320);
        i.scc = true;
        assert_eq!(decide_mode(&i).ok(), Some(DecodeMode::SinglePipe));
    }

    #[test]
    fn test_scaler_and_engine_count_force_single() {
        let mut i = inputs(7680, 4320);
        i.using_scaler = true;
        assert_eq!(decide_pipes(&i), 1);
        let mut i = inputs(7680, 4320);
        i.num_vdbox = 1;
        assert_eq!(decide_pipes(&i), 1);
        let mut i = inputs(7680, 4320);
        i.supported = false;
        assert_eq!(decide_pipes(&i), 1);
    }

    #[test]
    fn test_pipe_override_bounded_by_engines() {
        let mut i = inputs(7680, 4320);
        i.num_vdbox = 3;
        assert_eq!(decide_pipes(&i), 3);
        i.pipe_override = Some(4);
        assert_eq!(decide_pipes(&i), 3);
        i.pipe_override = Some(2);
        assert_eq!(decide_pipes(&i), 2);
        i.pipe_override = Some(1);
        assert_eq!(decide_pipes(&i), 1, "覆盖为 1 应强制单管线");
        assert_eq!(decide_mode(&i).ok(), Some(DecodeMode::SinglePipe));
    }

    #[test]
    fn test_area_thresholds_do_not_overflow() {
        let i = inputs(65535 * 64, 65535 * 64);
        assert_eq!(decide_pipes(&i), 2);
        let mut rext = inputs(65535 * 64, 65535 * 64);
        rext.chroma = ChromaFormat::Yuv444;
        assert_eq!(decide_pipes(&rext), 2);
    }

    #[test]
    fn test_cursor_visits_each_column_once() {
        for columns in 2..=MAX_TILE_COLUMNS {
            for pipes in 2..=3u8 {
                let phases = (columns as u8).div_ceil(pipes);
                let mode = DecodeMode::RealTile {
                    pipes,
                    phases,
                    pipes_in_last_phase: columns as u8 - pipes * (phases - 1),
                };
                let mut cursor = RealTileCursor::new(&mode).expect("创建游标失败");
                let mut visited = vec![cursor.column()];
                while !cursor.is_last() {
                    cursor.advance().expect("前进失败");
                    visited.push(cursor.column());
                }
                assert_eq!(visited, (0..columns).collect::<Vec<_>>(), "{columns} 列 {pipes} 管线");
                assert!(cursor.advance().is_err(), "越过最后阶段应报错");
            }
        }
    }

    #[test]
    fn test_second_level_sizing_by_mode() {
        let rt = DecodeMode::RealTile {
            pipes: 2,
            phases: 2,
            pipes_in_last_phase: 2,
        };
        let s = second_level_sizing(&rt, false, 10, 4, 3, 512).expect("计算失败");
        assert_eq!(s, SecondLevelSizing { count: 4, size: 512 * 13 });

        let s = second_level_sizing(&DecodeMode::SinglePipe, true, 10, 4, 3, 512).expect("计算失败");
        assert_eq!(s, SecondLevelSizing { count: 1, size: 512 * 22 });

        let s = second_level_sizing(&DecodeMode::SinglePipe, false, 10, 4, 3, 512).expect("计算失败");
        assert_eq!(s, SecondLevelSizing { count: 1, size: 512 * 10 });
    }
}
