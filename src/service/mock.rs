//! 脚本化对话服务（用于测试，无需网络）
//!
//! 每次 `open` 依次消费一个 [`Script`]：可模拟建连失败、服务端下发新会话、
//! 预置的事件序列；同时记录每次建连看到的参数与发送的文本，便于断言重试行为。

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{
    Capabilities, ChannelEvent, ChannelSetup, DialogueChannel, DialogueService, OpenError,
    OpenedChannel, ServiceError,
};
use crate::store::SessionRecord;

/// 单次建连的脚本
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// 设置后建连直接失败
    pub open_error: Option<String>,
    /// 建连成功后由服务端下发、需保存的新会话
    pub session_update: Option<SessionRecord>,
    /// 建连后依次推送的事件
    pub events: Vec<ChannelEvent>,
    /// 事件推送完后保持事件流不结束（模拟挂起的交互）
    pub keep_open: bool,
}

impl Script {
    pub fn events(events: Vec<ChannelEvent>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    pub fn open_failure(message: impl Into<String>) -> Self {
        Self {
            open_error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_session_update(mut self, record: SessionRecord) -> Self {
        self.session_update = Some(record);
        self
    }

    pub fn hanging(mut self) -> Self {
        self.keep_open = true;
        self
    }
}

/// 一次建连的观测记录
#[derive(Debug, Clone)]
pub struct OpenRecord {
    pub scene: String,
    pub user_name: String,
    pub capabilities: Capabilities,
    /// 建连时从存储加载到的会话
    pub loaded_session: Option<SessionRecord>,
    pub sent: Vec<String>,
    pub closed: bool,
}

#[derive(Debug, Default)]
pub struct ScriptedService {
    scripts: Mutex<VecDeque<Script>>,
    log: Arc<Mutex<Vec<OpenRecord>>>,
}

impl ScriptedService {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 已成功建连的记录（按时间顺序）
    pub async fn attempts(&self) -> Vec<OpenRecord> {
        self.log.lock().await.clone()
    }

    pub async fn remaining_scripts(&self) -> usize {
        self.scripts.lock().await.len()
    }
}

#[async_trait]
impl DialogueService for ScriptedService {
    async fn open(&self, setup: ChannelSetup) -> Result<OpenedChannel, OpenError> {
        let script = self
            .scripts
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| ServiceError::new("No scripted attempt left"))?;

        let loaded_session = setup.session.load().await?;

        if let Some(message) = script.open_error {
            return Err(ServiceError::new(message).into());
        }

        if let Some(record) = script.session_update {
            setup.session.save(record).await;
        }

        let index = {
            let mut log = self.log.lock().await;
            log.push(OpenRecord {
                scene: setup.scene,
                user_name: setup.user.full_name,
                capabilities: setup.capabilities,
                loaded_session,
                sent: Vec::new(),
                closed: false,
            });
            log.len() - 1
        };

        let (tx, rx) = mpsc::unbounded_channel();
        for event in script.events {
            let _ = tx.send(event);
        }

        Ok(OpenedChannel {
            channel: Box::new(ScriptedChannel {
                index,
                log: Arc::clone(&self.log),
                hold_open: script.keep_open.then_some(tx),
            }),
            events: rx,
        })
    }
}

struct ScriptedChannel {
    index: usize,
    log: Arc<Mutex<Vec<OpenRecord>>>,
    hold_open: Option<mpsc::UnboundedSender<ChannelEvent>>,
}

#[async_trait]
impl DialogueChannel for ScriptedChannel {
    async fn send_text(&mut self, text: &str) -> Result<(), ServiceError> {
        let mut log = self.log.lock().await;
        match log.get_mut(self.index) {
            Some(record) if !record.closed => {
                record.sent.push(text.to_string());
                Ok(())
            }
            _ => Err(ServiceError::new("Channel is closed")),
        }
    }

    async fn close(&mut self) {
        self.hold_open.take();
        if let Some(record) = self.log.lock().await.get_mut(self.index) {
            record.closed = true;
        }
    }
}
