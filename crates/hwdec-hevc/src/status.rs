//! 帧状态报告.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 帧的编排结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecStatus {
    /// 命令已全部提交
    Submitted,
    /// 已提交, 但部分参考帧被替代
    Concealed,
    /// 编排失败, 调用方应跳过该帧
    Error,
}

impl fmt::Display for CodecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted => write!(f, "submitted"),
            Self::Concealed => write!(f, "concealed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// 状态报告记录, 供外部状态查询组件消费
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// 调用方提供的反馈编号
    pub feedback_number: u32,
    /// 解码器内部的帧序号
    pub frame_index: u64,
    /// 当前图像的 DPB 索引
    pub curr_pic: u8,
    pub status: CodecStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_report_json() {
        let report = StatusReport {
            feedback_number: 7,
            frame_index: 3,
            curr_pic: 12,
            status: CodecStatus::Concealed,
        };
        let json = serde_json::to_string(&report).expect("序列化失败");
        assert!(json.contains("\"status\":\"concealed\""), "JSON: {json}");
        let back: StatusReport = serde_json::from_str(&json).expect("反序列化失败");
        assert_eq!(back, report);
    }
}
