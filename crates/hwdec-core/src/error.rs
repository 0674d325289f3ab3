//! 统一错误类型定义.
//!
//! 编排层所有 crate 共用的错误类型. 每个变体对应一类帧级致命错误,
//! 由检测到问题的调用同步返回, 本层不做自动重试.

use thiserror::Error;

/// 解码编排层统一错误类型
#[derive(Debug, Error)]
pub enum HwdecError {
    /// 参数非法 (索引越界、slice 数量溢出、tile 网格错误等)
    #[error("无效参数: {0}")]
    InvalidParameter(String),

    /// 资源耗尽 (scratch/MV/拼接缓冲区分配失败)
    #[error("资源耗尽: {0}")]
    ResourceExhaustion(String),

    /// 内部一致性错误 (非法阶段迁移、理论上不可达的池耗尽)
    #[error("内部一致性错误: {0}")]
    InternalConsistency(String),

    /// 分片提交的码流超出已分配的拼接缓冲区
    #[error("码流溢出: 偏移 {offset} + 长度 {size} 超出容量 {capacity}")]
    BitstreamOverrun {
        offset: u32,
        size: u32,
        capacity: u32,
    },

    /// 当前硬件代际或配置不支持
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 错误类别, 供调用方按类别决定跳帧或终止会话
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidParameter,
    ResourceExhaustion,
    InternalConsistency,
    BitstreamOverrun,
    Unsupported,
    Io,
}

impl HwdecError {
    /// 获取错误类别
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameter(_) => ErrorKind::InvalidParameter,
            Self::ResourceExhaustion(_) => ErrorKind::ResourceExhaustion,
            Self::InternalConsistency(_) => ErrorKind::InternalConsistency,
            Self::BitstreamOverrun { .. } => ErrorKind::BitstreamOverrun,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

/// 解码编排层统一 Result 类型
pub type HwdecResult<T> = Result<T, HwdecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let err = HwdecError::BitstreamOverrun {
            offset: 128,
            size: 64,
            capacity: 160,
        };
        assert_eq!(err.kind(), ErrorKind::BitstreamOverrun);
        assert!(err.to_string().contains("160"), "错误消息应包含容量");

        let err = HwdecError::InvalidParameter("slice 数量超限".into());
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }
}
