//! 内存会话存储（测试与 `--ephemeral` 运行使用，进程退出即丢失）

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ConversationKey, SessionRecord, SessionStore, StoreError};

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    records: RwLock<HashMap<ConversationKey, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &ConversationKey) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn set(&self, key: &ConversationKey, record: &SessionRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(key.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, key: &ConversationKey) -> Result<(), StoreError> {
        self.records.write().await.remove(key);
        Ok(())
    }
}
