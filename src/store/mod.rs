//! 会话存储抽象层
//!
//! 以会话键（`channel_id + "_" + user_id`）映射到服务端下发的不透明会话记录，
//! 使多轮对话可以跨进程续接。提供内存与 SQLite 两种实现。

mod memory;
mod sqlite;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemorySessionStore;
pub use sqlite::SqliteSessionStore;

/// 会话键：由渠道标识与用户标识拼接而成，跨进程稳定
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub fn new(channel_id: &str, user_id: &str) -> Self {
        Self(format!("{channel_id}_{user_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 会话记录：仅由对话服务生产与消费，本地只负责原样保存
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionRecord(serde_json::Value);

impl SessionRecord {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

/// 存储层错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Session record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage task failed: {0}")]
    Task(String),
}

/// 会话存储接口
///
/// - `get`：读取失败必须返回错误（调用方据此使建连失败）
/// - `set`：覆盖写入；失败不得破坏已有记录
/// - `delete`：幂等，删除不存在的键返回 `Ok(())`
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &ConversationKey) -> Result<Option<SessionRecord>, StoreError>;

    async fn set(&self, key: &ConversationKey, record: &SessionRecord) -> Result<(), StoreError>;

    async fn delete(&self, key: &ConversationKey) -> Result<(), StoreError>;
}

/// 绑定到某个会话键的读写句柄，交给对话服务在建连时加载、在会话更新时保存
#[derive(Clone)]
pub struct SessionHandle {
    store: Arc<dyn SessionStore>,
    key: ConversationKey,
}

impl SessionHandle {
    pub fn new(store: Arc<dyn SessionStore>, key: ConversationKey) -> Self {
        Self { store, key }
    }

    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    /// 加载已保存的会话；不存在时返回 None（全新会话）
    pub async fn load(&self) -> Result<Option<SessionRecord>, StoreError> {
        let record = self.store.get(&self.key).await?;
        tracing::debug!(key = %self.key, found = record.is_some(), "Loaded session record");
        Ok(record)
    }

    /// 保存服务下发的新会话；失败只记录日志，不向事件路径传播
    pub async fn save(&self, record: SessionRecord) {
        if let Err(e) = self.store.set(&self.key, &record).await {
            tracing::warn!(key = %self.key, "Failed to save session record: {}", e);
        }
    }

    /// 删除已保存的会话；失败只记录日志
    pub async fn invalidate(&self) {
        match self.store.delete(&self.key).await {
            Ok(()) => tracing::debug!(key = %self.key, "Session record invalidated"),
            Err(e) => tracing::warn!(key = %self.key, "Failed to delete session record: {}", e),
        }
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle").field("key", &self.key).finish()
    }
}
