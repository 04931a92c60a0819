//! SQLite 会话存储
//!
//! 单表 `data (key, value, updated_at)`，value 为会话记录的 JSON 文本。
//! 表名与前两列沿用早期客户端的 `data.db` 布局，旧库打开时补上 `updated_at` 列后即可续接。
//! rusqlite 为同步接口，所有调用经 `spawn_blocking` 执行，避免阻塞异步运行时。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use super::{ConversationKey, SessionRecord, SessionStore, StoreError};

pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionStore {
    /// 打开（必要时创建）数据库文件；父目录不存在时自动创建
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        init_tables(&conn)?;
        tracing::debug!("Opened session store at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Task("session store connection poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn init_tables(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS data (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TEXT
        )",
    )?;

    let has_updated_at: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM pragma_table_info('data') WHERE name = 'updated_at'",
        [],
        |row| row.get(0),
    )?;
    if !has_updated_at {
        tracing::info!("Upgrading legacy session table with updated_at column");
        conn.execute_batch("ALTER TABLE data ADD COLUMN updated_at TEXT")?;
    }
    Ok(())
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get(&self, key: &ConversationKey) -> Result<Option<SessionRecord>, StoreError> {
        let key = key.as_str().to_owned();
        self.with_conn(move |conn| {
            let value: Option<Option<String>> = conn
                .query_row(
                    "SELECT value FROM data WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            let record = value
                .flatten()
                .map(|v| serde_json::from_str::<SessionRecord>(&v))
                .transpose()?;
            Ok(record)
        })
        .await
    }

    async fn set(&self, key: &ConversationKey, record: &SessionRecord) -> Result<(), StoreError> {
        let key = key.as_str().to_owned();
        let value = serde_json::to_string(record)?;
        let now = chrono::Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO data (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &ConversationKey) -> Result<(), StoreError> {
        let key = key.as_str().to_owned();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM data WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sqlite_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = SqliteSessionStore::open(dir.path().join("data.db")).unwrap();
        let key = ConversationKey::new("lobby", "7");
        let record = SessionRecord::new(json!({
            "sessionId": "abc",
            "expirationTime": "2026-10-18T00:00:00Z",
            "nested": {"list": [1, 2.5, null, true], "text": "héllo"}
        }));

        store.set(&key, &record).await.unwrap();
        let loaded = store.get(&key).await.unwrap();
        assert_eq!(loaded, Some(record));
    }

    #[tokio::test]
    async fn test_sqlite_get_absent() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        let key = ConversationKey::new("lobby", "never-set");
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_delete_is_idempotent() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        let key = ConversationKey::new("lobby", "8");

        store.delete(&key).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());

        store.set(&key, &SessionRecord::new(json!("token"))).await.unwrap();
        store.delete(&key).await.unwrap();
        store.delete(&key).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_upsert_overwrites() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        let key = ConversationKey::new("lobby", "9");

        store.set(&key, &SessionRecord::new(json!({"v": 1}))).await.unwrap();
        store.set(&key, &SessionRecord::new(json!({"v": 2}))).await.unwrap();

        let loaded = store.get(&key).await.unwrap().unwrap();
        assert_eq!(loaded.as_value()["v"], 2);
    }

    #[tokio::test]
    async fn test_sqlite_creates_parent_dir_and_persists() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("nested").join("deeper").join("data.db");
        let key = ConversationKey::new("dm", "alice");

        {
            let store = SqliteSessionStore::open(&db_path).unwrap();
            store.set(&key, &SessionRecord::new(json!({"resume": true}))).await.unwrap();
        }
        assert!(db_path.exists());

        // 重新打开后仍可读取
        let reopened = SqliteSessionStore::open(&db_path).unwrap();
        let loaded = reopened.get(&key).await.unwrap().unwrap();
        assert_eq!(loaded.as_value()["resume"], true);
    }

    #[tokio::test]
    async fn test_sqlite_keys_are_isolated() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        let a = ConversationKey::new("c", "a");
        let b = ConversationKey::new("c", "b");

        store.set(&a, &SessionRecord::new(json!("A"))).await.unwrap();
        store.delete(&b).await.unwrap();

        assert_eq!(store.get(&a).await.unwrap(), Some(SessionRecord::new(json!("A"))));
        assert!(store.get(&b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_resumes_legacy_data_table() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("data.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute_batch(
                "CREATE TABLE data (key TEXT PRIMARY KEY, value TEXT);
                 INSERT INTO data (key, value) VALUES ('general_42', '{\"sessionId\":\"old\"}');
                 INSERT INTO data (key, value) VALUES ('general_43', NULL);",
            )
            .unwrap();
        }

        let store = SqliteSessionStore::open(&db_path).unwrap();
        let key = ConversationKey::new("general", "42");
        let loaded = store.get(&key).await.unwrap().unwrap();
        assert_eq!(loaded.as_value()["sessionId"], "old");
        assert!(store.get(&ConversationKey::new("general", "43")).await.unwrap().is_none());

        store.set(&key, &SessionRecord::new(json!({"sessionId": "new"}))).await.unwrap();
        drop(store);

        // 二次打开不会重复加列
        let reopened = SqliteSessionStore::open(&db_path).unwrap();
        let loaded = reopened.get(&key).await.unwrap().unwrap();
        assert_eq!(loaded.as_value()["sessionId"], "new");
    }
}
