//! 解码器上下文配置.

use serde::{Deserialize, Serialize};

use crate::derived::MIN_DERIVED_POOL_SIZE;
use crate::generation::Generation;
use crate::limits::MAX_SLICES;

/// 解码器配置
///
/// 可由 JSON 文件加载, 缺省字段取默认值.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderConfig {
    #[serde(default)]
    pub generation: Generation,
    /// 短格式码流: 需要预处理固件生成 slice 命令
    #[serde(default)]
    pub short_format: bool,
    #[serde(default = "default_num_vdbox")]
    pub num_vdbox: u8,
    /// 强制管线数, 仍受引擎数量限制
    #[serde(default)]
    pub pipe_override: Option<u8>,
    #[serde(default = "default_true")]
    pub row_store_cache: bool,
    #[serde(default = "default_derived_pool_size")]
    pub derived_pool_size: usize,
    #[serde(default = "default_max_slices")]
    pub max_slices: usize,
    #[serde(default)]
    pub secure_decode: bool,
    #[serde(default)]
    pub using_scaler: bool,
    #[serde(default)]
    pub separate_tile_decoding: bool,
    /// 预处理固件的内核描述符
    #[serde(default = "default_s2l_kernel")]
    pub s2l_kernel_descriptor: u32,
}

fn default_true() -> bool {
    true
}

fn default_num_vdbox() -> u8 {
    1
}

fn default_derived_pool_size() -> usize {
    MIN_DERIVED_POOL_SIZE
}

fn default_max_slices() -> usize {
    MAX_SLICES
}

fn default_s2l_kernel() -> u32 {
    1
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            generation: Generation::default(),
            short_format: false,
            num_vdbox: default_num_vdbox(),
            pipe_override: None,
            row_store_cache: true,
            derived_pool_size: default_derived_pool_size(),
            max_slices: default_max_slices(),
            secure_decode: false,
            using_scaler: false,
            separate_tile_decoding: false,
            s2l_kernel_descriptor: default_s2l_kernel(),
        }
    }
}

impl DecoderConfig {
    /// 把超出硬件能力的取值收敛到合法范围
    pub fn normalized(mut self) -> Self {
        self.derived_pool_size = self.derived_pool_size.max(MIN_DERIVED_POOL_SIZE);
        self.max_slices = self.max_slices.clamp(1, MAX_SLICES);
        self.num_vdbox = self.num_vdbox.max(1);
        if self.pipe_override == Some(0) {
            self.pipe_override = None;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let cfg: DecoderConfig = serde_json::from_str("{}").expect("解析失败");
        assert_eq!(cfg, DecoderConfig::default());
        assert_eq!(cfg.generation, Generation::Gen12);
        assert_eq!(cfg.derived_pool_size, 2);
        assert_eq!(cfg.max_slices, 600);
    }

    #[test]
    fn test_partial_json_and_normalize() {
        let cfg: DecoderConfig = serde_json::from_str(
            r#"{"generation":"gen11","num_vdbox":0,"derived_pool_size":1,"max_slices":9000}"#,
        )
        .expect("解析失败");
        assert_eq!(cfg.generation, Generation::Gen11);
        let cfg = cfg.normalized();
        assert_eq!(cfg.num_vdbox, 1);
        assert_eq!(cfg.derived_pool_size, 2);
        assert_eq!(cfg.max_slices, MAX_SLICES);
    }
}
