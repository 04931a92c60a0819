//! 对话交换集成测试：脚本化服务 + 真实存储

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    use duet::core::{ExchangeSettings, RetryPolicy};
    use duet::service::{ChannelEvent, Credentials, Script, ScriptedService, CLIENT_CANCELLED};
    use duet::store::{
        ConversationKey, MemorySessionStore, SessionRecord, SessionStore, SqliteSessionStore,
        StoreError,
    };
    use duet::{CompletedPair, ExchangeError, ExchangeOrchestrator, ExchangeOutcome};

    fn settings(retry: RetryPolicy) -> ExchangeSettings {
        ExchangeSettings {
            credentials: Credentials::new("key", "secret"),
            scene: "workspaces/demo/scenes/cafe".to_string(),
            channel_id: "general".to_string(),
            user_id: "42".to_string(),
            retry,
            interaction_timeout: None,
        }
    }

    fn pair_texts(pairs: &[CompletedPair]) -> Vec<(&str, &str)> {
        pairs.iter().map(|p| (p.text.as_str(), p.audio.as_str())).collect()
    }

    fn completed(outcome: ExchangeOutcome) -> Vec<CompletedPair> {
        match outcome {
            ExchangeOutcome::Completed(pairs) => pairs,
            other => panic!("Expected completion, got {:?}", other),
        }
    }

    /// 读操作总是失败的存储
    struct BrokenStore;

    #[async_trait]
    impl SessionStore for BrokenStore {
        async fn get(&self, _key: &ConversationKey) -> Result<Option<SessionRecord>, StoreError> {
            Err(StoreError::Task("disk unavailable".to_string()))
        }

        async fn set(&self, _key: &ConversationKey, _record: &SessionRecord) -> Result<(), StoreError> {
            Ok(())
        }

        async fn delete(&self, _key: &ConversationKey) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_greeting_pairs_text_with_audio_in_arrival_order() {
        let service = Arc::new(ScriptedService::new([Script::events(vec![
            ChannelEvent::text("Hi there!"),
            ChannelEvent::audio("QUFB"),
            ChannelEvent::audio("QkJC"),
            ChannelEvent::text("What can I get you?"),
            ChannelEvent::text("Coffee maybe?"),
            ChannelEvent::interaction_end(),
        ])]));
        let store = Arc::new(MemorySessionStore::new());
        let orchestrator =
            ExchangeOrchestrator::new(service.clone(), store, settings(RetryPolicy::unbounded()));

        let pairs = completed(orchestrator.run("Hello", "Mika").await.unwrap());
        assert_eq!(
            pair_texts(&pairs),
            vec![("Hi there!", "QUFB"), ("What can I get you?", "QkJC")]
        );

        let json = serde_json::to_string(&pairs).unwrap();
        assert_eq!(
            json,
            r#"[{"text":"Hi there!","audio":"QUFB"},{"text":"What can I get you?","audio":"QkJC"}]"#
        );

        let attempts = service.attempts().await;
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].sent, vec!["Hello".to_string()]);
        assert_eq!(attempts[0].user_name, "Mika");
        assert_eq!(attempts[0].scene, "workspaces/demo/scenes/cafe");
        assert!(attempts[0].closed);
    }

    #[tokio::test]
    async fn test_two_turn_reply_yields_two_pairs() {
        let service = Arc::new(ScriptedService::new([Script::events(vec![
            ChannelEvent::text("Hi"),
            ChannelEvent::audio("A"),
            ChannelEvent::text("there"),
            ChannelEvent::audio("B"),
            ChannelEvent::interaction_end(),
        ])]));
        let orchestrator = ExchangeOrchestrator::new(
            service.clone(),
            Arc::new(MemorySessionStore::new()),
            settings(RetryPolicy::unbounded()),
        );

        let pairs = completed(orchestrator.run("Hello", "Mika").await.unwrap());
        assert_eq!(pair_texts(&pairs), vec![("Hi", "A"), ("there", "B")]);
        assert_eq!(
            serde_json::to_string(&pairs).unwrap(),
            r#"[{"text":"Hi","audio":"A"},{"text":"there","audio":"B"}]"#
        );
        assert_eq!(service.attempts().await[0].sent, vec!["Hello".to_string()]);
    }

    #[tokio::test]
    async fn test_fault_clears_session_and_restarts_with_same_input() {
        let stale = SessionRecord::new(json!({"sessionId": "stale"}));
        let store = Arc::new(MemorySessionStore::new());
        let key = ConversationKey::new("general", "42");
        store.set(&key, &stale).await.unwrap();

        let service = Arc::new(ScriptedService::new([
            Script::events(vec![
                ChannelEvent::text("partial"),
                ChannelEvent::error("14 UNAVAILABLE: upstream reset"),
            ]),
            Script::events(vec![
                ChannelEvent::text("Hi"),
                ChannelEvent::audio("QUFB"),
                ChannelEvent::interaction_end(),
            ]),
        ]));
        let orchestrator = ExchangeOrchestrator::new(
            service.clone(),
            store.clone(),
            settings(RetryPolicy::unbounded()),
        );

        let pairs = completed(orchestrator.run("Hello", "Mika").await.unwrap());
        // 第一次尝试的 "partial" 不会出现在结果里
        assert_eq!(pair_texts(&pairs), vec![("Hi", "QUFB")]);

        let attempts = service.attempts().await;
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].loaded_session, Some(stale));
        assert_eq!(attempts[1].loaded_session, None);
        for attempt in &attempts {
            assert_eq!(attempt.sent, vec!["Hello".to_string()]);
            assert_eq!(attempt.user_name, "Mika");
            assert!(attempt.closed);
        }
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_client_cancellation_without_end_yields_no_output() {
        let stored = SessionRecord::new(json!({"sessionId": "keep"}));
        let store = Arc::new(MemorySessionStore::new());
        let key = ConversationKey::new("general", "42");
        store.set(&key, &stored).await.unwrap();

        let service = Arc::new(ScriptedService::new([Script::events(vec![
            ChannelEvent::text("Hi"),
            ChannelEvent::audio("QUFB"),
            ChannelEvent::error(CLIENT_CANCELLED),
        ])]));
        let orchestrator = ExchangeOrchestrator::new(
            service.clone(),
            store.clone(),
            settings(RetryPolicy::unbounded()),
        );

        let outcome = orchestrator.run("Hello", "Mika").await.unwrap();
        assert_eq!(outcome, ExchangeOutcome::Cancelled);
        assert_eq!(service.attempts().await.len(), 1);
        // 取消不触发恢复，会话保留
        assert_eq!(store.get(&key).await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn test_events_after_cancellation_are_still_dispatched() {
        let service = Arc::new(ScriptedService::new([Script::events(vec![
            ChannelEvent::error(CLIENT_CANCELLED),
            ChannelEvent::text("Still here"),
            ChannelEvent::audio("QUFB"),
            ChannelEvent::interaction_end(),
        ])]));
        let orchestrator = ExchangeOrchestrator::new(
            service.clone(),
            Arc::new(MemorySessionStore::new()),
            settings(RetryPolicy::unbounded()),
        );

        let pairs = completed(orchestrator.run("Hello", "Mika").await.unwrap());
        assert_eq!(pair_texts(&pairs), vec![("Still here", "QUFB")]);
        assert_eq!(service.attempts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted_reports_last_error() {
        let service = Arc::new(ScriptedService::new([
            Script::events(vec![ChannelEvent::error("14 UNAVAILABLE")]),
            Script::open_failure("socket hang up"),
            Script::events(vec![ChannelEvent::interaction_end()]),
        ]));
        let retry = RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::unbounded()
        };
        let orchestrator =
            ExchangeOrchestrator::new(service.clone(), Arc::new(MemorySessionStore::new()), settings(retry));

        let err = orchestrator.run("Hello", "Mika").await.unwrap_err();
        match &err {
            ExchangeError::RetriesExhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(*attempts, 2);
                assert_eq!(last_error.message, "socket hang up");
            }
            other => panic!("Expected RetriesExhausted, got {:?}", other),
        }
        assert_eq!(err.exit_code(), 3);
        // 第三个脚本从未被使用
        assert_eq!(service.remaining_scripts().await, 1);
    }

    #[tokio::test]
    async fn test_stream_ending_without_interaction_end_is_a_fault() {
        let service = Arc::new(ScriptedService::new([
            Script::events(vec![ChannelEvent::text("Hi")]),
            Script::events(vec![ChannelEvent::interaction_end()]),
        ]));
        let orchestrator = ExchangeOrchestrator::new(
            service.clone(),
            Arc::new(MemorySessionStore::new()),
            settings(RetryPolicy::unbounded()),
        );

        let pairs = completed(orchestrator.run("Hello", "Mika").await.unwrap());
        assert!(pairs.is_empty());
        assert_eq!(service.attempts().await.len(), 2);
    }

    #[tokio::test]
    async fn test_storage_read_failure_is_not_retried() {
        let service = Arc::new(ScriptedService::new([
            Script::events(vec![ChannelEvent::interaction_end()]),
            Script::events(vec![ChannelEvent::interaction_end()]),
        ]));
        let orchestrator = ExchangeOrchestrator::new(
            service.clone(),
            Arc::new(BrokenStore),
            settings(RetryPolicy::unbounded()),
        );

        let err = orchestrator.run("Hello", "Mika").await.unwrap_err();
        assert!(matches!(err, ExchangeError::Storage(_)));
        assert_eq!(err.exit_code(), 4);
        assert!(service.attempts().await.is_empty());
        assert_eq!(service.remaining_scripts().await, 1);
    }

    #[tokio::test]
    async fn test_session_update_survives_process_restart() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("state").join("sessions.db");
        let issued = SessionRecord::new(json!({"sessionId": "s-1", "turn": 1}));

        {
            let store = Arc::new(SqliteSessionStore::open(&db_path).unwrap());
            let service = Arc::new(ScriptedService::new([Script::events(vec![
                ChannelEvent::text("Welcome back"),
                ChannelEvent::audio("QUFB"),
                ChannelEvent::interaction_end(),
            ])
            .with_session_update(issued.clone())]));
            let orchestrator =
                ExchangeOrchestrator::new(service, store, settings(RetryPolicy::default()));
            completed(orchestrator.run("Hello", "Mika").await.unwrap());
        }

        // 新的存储实例模拟下一次进程启动
        let store = Arc::new(SqliteSessionStore::open(&db_path).unwrap());
        let service = Arc::new(ScriptedService::new([Script::events(vec![
            ChannelEvent::interaction_end(),
        ])]));
        let orchestrator = ExchangeOrchestrator::new(
            service.clone(),
            store.clone(),
            settings(RetryPolicy::default()),
        );
        completed(orchestrator.run("Again", "Mika").await.unwrap());

        assert_eq!(service.attempts().await[0].loaded_session, Some(issued.clone()));

        // 其它用户的键互不影响
        let other = ConversationKey::new("general", "43");
        assert!(store.get(&other).await.unwrap().is_none());

        orchestrator.reset_session().await.unwrap();
        assert!(store
            .get(&orchestrator.conversation_key())
            .await
            .unwrap()
            .is_none());
    }
}
