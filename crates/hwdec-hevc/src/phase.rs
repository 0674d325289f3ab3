//! 单帧解码阶段状态机.
//!
//! 阶段只按解码模式与预处理开关推进, 每次 `advance` 对应一个硬件通道.

use std::fmt;

use log::trace;

use hwdec_core::{HwdecError, HwdecResult};

use crate::scalability::DecodeMode;

/// 解码阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePhase {
    /// 帧开始, 尚未执行任何通道
    Initialized,
    /// 短格式转长格式预处理
    PreProcess,
    /// 单管线主解码
    MainDecode,
    /// 虚拟 tile 前端 CABAC
    FrontEnd,
    /// 虚拟 tile 后端, 参数为管线序号
    BackEnd(u8),
    /// 真实 tile
    RealTile,
}

impl fmt::Display for DecodePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialized => write!(f, "initialized"),
            Self::PreProcess => write!(f, "pre-process"),
            Self::MainDecode => write!(f, "main-decode"),
            Self::FrontEnd => write!(f, "front-end"),
            Self::BackEnd(n) => write!(f, "back-end[{n}]"),
            Self::RealTile => write!(f, "real-tile"),
        }
    }
}

/// 计算下一个阶段
///
/// 没有后继的阶段返回 `InternalConsistency`.
pub fn next_phase(
    current: DecodePhase,
    mode: &DecodeMode,
    pre_process: bool,
) -> HwdecResult<DecodePhase> {
    let first_main = match mode {
        DecodeMode::SinglePipe => DecodePhase::MainDecode,
        DecodeMode::VirtualTile { .. } => DecodePhase::FrontEnd,
        DecodeMode::RealTile { .. } => DecodePhase::RealTile,
    };
    let next = match (current, mode) {
        (DecodePhase::Initialized, _) if pre_process => Some(DecodePhase::PreProcess),
        (DecodePhase::Initialized, _) | (DecodePhase::PreProcess, _) => Some(first_main),
        (DecodePhase::FrontEnd, DecodeMode::VirtualTile { .. }) => Some(DecodePhase::BackEnd(0)),
        (DecodePhase::BackEnd(n), DecodeMode::VirtualTile { pipes }) if n + 1 < *pipes => {
            Some(DecodePhase::BackEnd(n + 1))
        }
        (DecodePhase::RealTile, DecodeMode::RealTile { .. }) => Some(DecodePhase::RealTile),
        _ => None,
    };
    next.ok_or_else(|| {
        HwdecError::InternalConsistency(format!("{mode} 模式下阶段 {current} 没有后继"))
    })
}

/// 阶段状态机
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    mode: DecodeMode,
    pre_process: bool,
    current: DecodePhase,
    passes_done: usize,
    history: Vec<DecodePhase>,
}

impl PhaseMachine {
    pub fn new(mode: DecodeMode, pre_process: bool) -> Self {
        Self {
            mode,
            pre_process,
            current: DecodePhase::Initialized,
            passes_done: 0,
            history: Vec::new(),
        }
    }

    /// 新帧: 回到初始阶段
    pub fn reset(&mut self, mode: DecodeMode, pre_process: bool) {
        *self = Self::new(mode, pre_process);
    }

    pub fn current(&self) -> DecodePhase {
        self.current
    }

    pub fn mode(&self) -> &DecodeMode {
        &self.mode
    }

    /// 已经进入过的阶段, 按顺序
    pub fn history(&self) -> &[DecodePhase] {
        &self.history
    }

    pub fn pass_count(&self) -> usize {
        crate::scalability::pass_count(&self.mode, self.pre_process)
    }

    /// 进入下一个通道
    pub fn advance(&mut self) -> HwdecResult<DecodePhase> {
        if self.passes_done >= self.pass_count() {
            return Err(HwdecError::InternalConsistency(format!(
                "本帧 {} 个通道已全部执行",
                self.passes_done
            )));
        }
        let next = next_phase(self.current, &self.mode, self.pre_process)?;
        trace!("解码阶段 {} -> {next}", self.current);
        self.current = next;
        self.passes_done += 1;
        self.history.push(next);
        Ok(next)
    }

    /// 当前通道是否为本帧最后一个
    pub fn is_final_pass(&self) -> bool {
        self.passes_done == self.pass_count()
    }
}
