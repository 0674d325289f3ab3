//! HEVC 解码硬件限制常量.

/// DPB 槽位数量 (7 位帧索引, 0x7f 保留为无效)
pub const NUM_DPB_SLOTS: usize = 127;

/// 硬件支持的最大帧宽 (像素)
pub const MAX_PICTURE_WIDTH: u32 = 16384;

/// 硬件支持的最大帧高 (像素)
pub const MAX_PICTURE_HEIGHT: u32 = 16384;

/// 参考帧列表 (RefFrameList) 容量
pub const MAX_REF_FRAMES: usize = 15;

/// 单帧可同时激活的参考帧上限 (硬件限制)
pub const MAX_ACTIVE_REFS: usize = 8;

/// MV 缓冲池容量, 保证任意合法配置下都有空闲槽位
pub const NUM_MV_BUFFERS: usize = MAX_REF_FRAMES + 1;

/// Level 6 下单帧最大 slice 数量
pub const MAX_SLICES: usize = 600;

/// tile 列数上限
pub const MAX_TILE_COLUMNS: usize = 20;

/// tile 行数上限
pub const MAX_TILE_ROWS: usize = 22;

/// RPS 子集中表示"未使用"的索引
pub const RPS_UNUSED: u8 = 0xff;

/// 每个 slice 在派生命令流中占用的 cacheline 数
pub const SLICE_STATE_CACHELINES: u32 = 8;
