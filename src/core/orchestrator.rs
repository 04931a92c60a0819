//! 交换编排器：主控循环
//!
//! 每次尝试：由会话键绑定会话句柄 → 建立通道（加载旧会话）→ 发送用户文本 →
//! 消费事件直到交互结束、故障或收到关闭信号；故障交给 RecoveryController，
//! 清除会话后以相同输入重新发起，直到成功或重试耗尽。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::dispatcher::{Dispatch, Dispatcher};
use crate::core::pairing::{CompletedPair, PairingBuffer};
use crate::core::recovery::{self, ErrorClass, RecoveryController, RetryPolicy};
use crate::core::{ExchangeError, RecoveryAction};
use crate::service::{
    Capabilities, ChannelSetup, Credentials, DialogueService, EventStream, OpenError,
    OpenedChannel, ServiceError, UserDescriptor,
};
use crate::store::{ConversationKey, SessionHandle, SessionStore};

/// 一次交换的固定参数
#[derive(Debug, Clone)]
pub struct ExchangeSettings {
    pub credentials: Credentials,
    pub scene: String,
    pub channel_id: String,
    pub user_id: String,
    pub retry: RetryPolicy,
    /// 单次交互等待上限；None 表示一直等待服务端结束或报错
    pub interaction_timeout: Option<Duration>,
}

/// 交换结果
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeOutcome {
    /// 交互正常结束，得到按到达顺序配对的输出
    Completed(Vec<CompletedPair>),
    /// 只收到客户端取消信号后通道即结束，无输出
    Cancelled,
    /// 收到进程关闭信号
    Interrupted,
}

enum AttemptOutcome {
    Completed(Vec<CompletedPair>),
    Cancelled,
    Interrupted,
    Fault(ServiceError),
}

pub struct ExchangeOrchestrator {
    service: Arc<dyn DialogueService>,
    store: Arc<dyn SessionStore>,
    settings: ExchangeSettings,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
}

impl ExchangeOrchestrator {
    pub fn new(
        service: Arc<dyn DialogueService>,
        store: Arc<dyn SessionStore>,
        settings: ExchangeSettings,
    ) -> Self {
        Self {
            service,
            store,
            settings,
            dispatcher: Dispatcher::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(&self.settings.channel_id, &self.settings.user_id)
    }

    /// 清除当前会话键的存储记录（下一次交换从全新会话开始）
    pub async fn reset_session(&self) -> Result<(), ExchangeError> {
        let key = self.conversation_key();
        self.store.delete(&key).await?;
        info!(key = %key, "Stored session cleared");
        Ok(())
    }

    /// 发送一句话并等待配对结果；可恢复故障按重试策略以相同输入重新发起
    pub async fn run(&self, text: &str, user_name: &str) -> Result<ExchangeOutcome, ExchangeError> {
        let key = self.conversation_key();
        let session = SessionHandle::new(Arc::clone(&self.store), key.clone());
        let mut recovery = RecoveryController::new(self.settings.retry.clone(), session.clone());

        loop {
            let attempt = recovery.begin_attempt();
            info!(key = %key, attempt, "Starting dialogue exchange");

            let fault = match self.attempt(text, user_name, &session).await? {
                AttemptOutcome::Completed(pairs) => {
                    info!(pairs = pairs.len(), "Interaction ended");
                    return Ok(ExchangeOutcome::Completed(pairs));
                }
                AttemptOutcome::Cancelled => return Ok(ExchangeOutcome::Cancelled),
                AttemptOutcome::Interrupted => return Ok(ExchangeOutcome::Interrupted),
                AttemptOutcome::Fault(err) => err,
            };

            match recovery.handle(&fault).await {
                RecoveryAction::Ignore => return Ok(ExchangeOutcome::Cancelled),
                RecoveryAction::GiveUp => {
                    return Err(ExchangeError::RetriesExhausted {
                        attempts: recovery.attempts(),
                        last_error: fault,
                    })
                }
                RecoveryAction::Restart { attempt, delay } => {
                    debug!(attempt, ?delay, "Restarting exchange with a fresh session");
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = self.shutdown.cancelled() => return Ok(ExchangeOutcome::Interrupted),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }

    async fn attempt(
        &self,
        text: &str,
        user_name: &str,
        session: &SessionHandle,
    ) -> Result<AttemptOutcome, ExchangeError> {
        let setup = ChannelSetup {
            credentials: self.settings.credentials.clone(),
            scene: self.settings.scene.clone(),
            user: UserDescriptor::new(user_name),
            capabilities: Capabilities::AUDIO_ONLY,
            session: session.clone(),
        };

        let OpenedChannel {
            mut channel,
            mut events,
        } = match self.service.open(setup).await {
            Ok(opened) => opened,
            Err(OpenError::Storage(e)) => return Err(ExchangeError::Storage(e)),
            Err(OpenError::Service(e)) => return Ok(AttemptOutcome::Fault(e)),
        };

        if let Err(e) = channel.send_text(text).await {
            channel.close().await;
            return Ok(AttemptOutcome::Fault(e));
        }
        debug!("Utterance sent, awaiting interaction");

        let outcome = self.consume(&mut events).await;
        channel.close().await;
        Ok(outcome)
    }

    /// 消费事件流直到交互结束；PairingBuffer 随本次尝试创建、随之丢弃
    async fn consume(&self, events: &mut EventStream) -> AttemptOutcome {
        let mut buffer = PairingBuffer::new();
        let mut cancelled_by_client = false;
        let deadline = self.settings.interaction_timeout.map(|t| Instant::now() + t);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return AttemptOutcome::Interrupted,
                _ = wait_until(deadline) => {
                    return AttemptOutcome::Fault(ServiceError::new("Interaction timed out"));
                }
                event = events.recv() => event,
            };

            let Some(event) = next else {
                return if cancelled_by_client {
                    AttemptOutcome::Cancelled
                } else {
                    AttemptOutcome::Fault(ServiceError::new(
                        "Channel closed before interaction end",
                    ))
                };
            };

            match self.dispatcher.dispatch(event, &mut buffer) {
                Dispatch::Continue => {}
                Dispatch::InteractionEnded => return AttemptOutcome::Completed(buffer.finish()),
                Dispatch::Error(err) => match recovery::classify(&err) {
                    ErrorClass::ClientCancelled => {
                        debug!("Received client cancellation, staying active");
                        cancelled_by_client = true;
                    }
                    ErrorClass::Recoverable => return AttemptOutcome::Fault(err),
                },
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
