//! 错误恢复控制器
//!
//! 两个状态：Active（正常分发）与 Recovering（正在重启交换）。
//! 客户端取消信号保持 Active 且不做任何处理；其它错误清除该会话键的存储记录，
//! 并按 [`RetryPolicy`] 以相同文本与用户名重新发起整个交换。

use std::time::Duration;

use crate::core::RecoveryAction;
use crate::service::{ServiceError, CLIENT_CANCELLED};
use crate::store::SessionHandle;

/// 重试策略：指数退避，`max_attempts == 0` 表示不设上限
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 总尝试次数上限（含首次）
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// 无上限、无退避的立即重试
    pub fn unbounded() -> Self {
        Self {
            max_attempts: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_attempts == 0
    }

    /// 已尝试 `attempts_made` 次后是否还允许再试
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        self.is_unbounded() || attempts_made < self.max_attempts
    }

    /// 第 `failed_attempt` 次失败后的等待时间：initial * 2^(n-1)，不超过 max_backoff
    pub fn backoff_for(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 客户端主动关闭引起，属于预期结束
    ClientCancelled,
    Recoverable,
}

/// 按消息文本精确匹配取消信号
pub fn classify(err: &ServiceError) -> ErrorClass {
    if err.message == CLIENT_CANCELLED {
        ErrorClass::ClientCancelled
    } else {
        ErrorClass::Recoverable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Active,
    Recovering,
}

#[derive(Debug)]
pub struct RecoveryController {
    policy: RetryPolicy,
    session: SessionHandle,
    state: RecoveryState,
    attempts: u32,
}

impl RecoveryController {
    pub fn new(policy: RetryPolicy, session: SessionHandle) -> Self {
        Self {
            policy,
            session,
            state: RecoveryState::Active,
            attempts: 0,
        }
    }

    /// 开始新一次尝试，返回尝试序号（从 1 开始）
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.state = RecoveryState::Active;
        self.attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    /// 处理一次错误：取消信号忽略；其它错误先清除会话，再决定重启还是放弃
    pub async fn handle(&mut self, err: &ServiceError) -> RecoveryAction {
        match classify(err) {
            ErrorClass::ClientCancelled => {
                tracing::debug!("Channel cancelled on client, no recovery needed");
                RecoveryAction::Ignore
            }
            ErrorClass::Recoverable => {
                tracing::warn!(
                    key = %self.session.key(),
                    attempt = self.attempts,
                    "Dialogue exchange failed: {}",
                    err
                );
                self.state = RecoveryState::Recovering;
                self.session.invalidate().await;

                if self.policy.allows_retry(self.attempts) {
                    RecoveryAction::Restart {
                        attempt: self.attempts + 1,
                        delay: self.policy.backoff_for(self.attempts),
                    }
                } else {
                    tracing::error!(
                        attempts = self.attempts,
                        "Giving up after exhausting retry policy"
                    );
                    RecoveryAction::GiveUp
                }
            }
        }
    }
}
