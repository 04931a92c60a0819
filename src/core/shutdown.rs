//! 关闭信号处理
//!
//! 第一个到达的 Ctrl+C / SIGTERM 记为关闭原因并取消 token；编排器在等待事件或退避时
//! 观察 token，关闭通道后以 Interrupted 结束，入口再按原因选择退出码。

use std::sync::{Arc, OnceLock};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 关闭原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
}

impl ShutdownReason {
    /// 按 shell 约定 128 + 信号编号
    pub fn exit_code(self) -> u8 {
        match self {
            ShutdownReason::UserInitiated => 130,
            ShutdownReason::Signal => 143,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 交给编排器观察
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 记录原因并取消 token；只有第一次调用的原因生效
    pub fn trigger(&self, reason: ShutdownReason) {
        if self.reason.set(reason).is_ok() {
            tracing::info!(?reason, "Shutdown requested, closing dialogue channel");
        }
        self.token.cancel();
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    /// 后台等待第一个系统信号
    pub fn spawn_signal_listener(&self) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Some(reason) = wait_for_signal().await {
                manager.trigger(reason);
            }
        })
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> Option<ShutdownReason> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("Failed to install SIGTERM handler: {}", e);
            return tokio::signal::ctrl_c()
                .await
                .ok()
                .map(|_| ShutdownReason::UserInitiated);
        }
    };

    tokio::select! {
        res = tokio::signal::ctrl_c() => res.ok().map(|_| ShutdownReason::UserInitiated),
        _ = sigterm.recv() => Some(ShutdownReason::Signal),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Option<ShutdownReason> {
    tokio::signal::ctrl_c()
        .await
        .ok()
        .map(|_| ShutdownReason::UserInitiated)
}
