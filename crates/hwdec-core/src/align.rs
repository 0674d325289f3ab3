//! 对齐与整除工具.
//!
//! 硬件缓冲区大小普遍按 cacheline (64 字节) 对齐, 行/列数按 CTB 向上取整.

/// 硬件 cacheline 大小 (字节)
pub const CACHELINE_SIZE: u32 = 64;

/// 向上对齐到 `align` 的整数倍, `align` 必须为 2 的幂
#[inline]
pub const fn align_up(value: u32, align: u32) -> u32 {
    (value + align - 1) & !(align - 1)
}

/// 向上取整除法
#[inline]
pub const fn ceil_div(value: u32, divisor: u32) -> u32 {
    value.div_ceil(divisor)
}

/// 向上取到偶数
#[inline]
pub const fn round_up_even(value: u32) -> u32 {
    (value + 1) & !1
}
