//! 交换错误类型与恢复动作
//!
//! 与 RecoveryController 配合：可恢复故障决定 Restart / GiveUp，客户端取消信号为 Ignore。

use std::time::Duration;

use thiserror::Error;

use crate::service::ServiceError;
use crate::store::StoreError;

/// 一次对话交换最终失败的原因
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// 读取会话失败：不重试，直接交给调用方
    #[error("Session storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Exchange failed after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: ServiceError,
    },
}

impl ExchangeError {
    /// 进程退出码：重试耗尽 3，存储故障 4
    pub fn exit_code(&self) -> u8 {
        match self {
            ExchangeError::RetriesExhausted { .. } => 3,
            ExchangeError::Storage(_) => 4,
        }
    }
}

/// 恢复控制器根据错误给出的动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 客户端取消信号：预期的关闭，不做任何处理
    Ignore,
    /// 已清除会话，等待 `delay` 后以相同输入发起第 `attempt` 次尝试
    Restart { attempt: u32, delay: Duration },
    /// 重试次数耗尽
    GiveUp,
}
