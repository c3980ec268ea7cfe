//! 轮次集成测试：经公开 API 驱动编排器 + 文件线程存储

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use hive::config::{AppConfig, StoreBackend};
    use hive::core::{RecordingSleeper, APOLOGY};
    use hive::llm::{MockCompletionService, MockStep};
    use hive::memory::{FileThreadStore, ThreadData, ThreadStore, UserInfo};
    use hive::tools::FnCapability;
    use hive::{HiveBuilder, TurnOrchestrator};
    use serde_json::json;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".to_string();
        cfg.store.backend = StoreBackend::File;
        cfg.store.path = dir.path().join("threads");
        cfg
    }

    fn build(dir: &TempDir, service: MockCompletionService) -> TurnOrchestrator {
        HiveBuilder::new(config(dir))
            .with_service(Arc::new(service))
            .with_sleeper(Arc::new(RecordingSleeper::new()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_hello_creates_listed_thread() {
        let dir = TempDir::new().unwrap();
        let orchestrator = build(&dir, MockCompletionService::new());

        let outcome = orchestrator.run_turn(None, "Hello", None).await;
        assert!(!outcome.assistant_text.is_empty());
        assert_ne!(outcome.assistant_text, APOLOGY);
        assert_eq!(outcome.capability_log, "");

        let listing = orchestrator.list_threads().await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].id, outcome.thread_id);
        assert_eq!(listing[0].interaction_count, 1);

        assert!(dir
            .path()
            .join("threads")
            .join(format!("{}.json", outcome.thread_id))
            .exists());
    }

    #[tokio::test]
    async fn test_two_sequential_turns() {
        let dir = TempDir::new().unwrap();
        let orchestrator = build(&dir, MockCompletionService::new());

        let first = orchestrator
            .run_turn(None, "one", Some(UserInfo::new("ada")))
            .await;
        let after_first = orchestrator.get_thread(&first.thread_id).await.unwrap();
        let second = orchestrator
            .run_turn(Some(&first.thread_id), "two", None)
            .await;
        assert_eq!(second.thread_id, first.thread_id);

        let thread = orchestrator.get_thread(&first.thread_id).await.unwrap();
        assert_eq!(thread.interactions.len(), 2);
        assert!(thread.updated_at > after_first.updated_at);
        assert_eq!(thread.user_info.username, "ada");
        assert_eq!(thread.messages().len(), 4);
    }

    #[tokio::test]
    async fn test_tool_turn_persists_capability_usage() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let lookup = FnCapability::new(
            "lookup_order",
            "Look up an order by id",
            json!({"type": "object", "properties": {"order_id": {"type": "string"}}, "required": ["order_id"]}),
            move |args| {
                seen.fetch_add(1, Ordering::SeqCst);
                let id = args["order_id"].as_str().ok_or("order_id missing")?;
                Ok(format!("order {id}: shipped"))
            },
        );
        let service = MockCompletionService::with_script(vec![
            MockStep::call("lookup_order", json!({"order_id": "A17"})),
            MockStep::Reply("Your order A17 has shipped.".into()),
        ]);
        let orchestrator = HiveBuilder::new(config(&dir))
            .capability(lookup)
            .unwrap()
            .with_service(Arc::new(service))
            .with_sleeper(Arc::new(RecordingSleeper::new()))
            .build()
            .unwrap();

        let outcome = orchestrator.run_turn(None, "where is A17?", None).await;
        assert_eq!(outcome.assistant_text, "Your order A17 has shipped.");
        assert_eq!(outcome.capability_log, "lookup_order -> order A17: shipped");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let reopened = FileThreadStore::new(dir.path().join("threads"));
        let thread = reopened.retrieve(&outcome.thread_id).await.unwrap();
        assert_eq!(
            thread.interactions[0].capabilities_used,
            vec!["lookup_order".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unknown_capability_turn_completes() {
        let dir = TempDir::new().unwrap();
        let service = MockCompletionService::with_script(vec![
            MockStep::call("does_not_exist", json!({})),
            MockStep::Reply("Sorry, I can't do that.".into()),
        ]);
        let orchestrator = build(&dir, service);
        let outcome = orchestrator.run_turn(None, "do the thing", None).await;
        assert_eq!(outcome.assistant_text, "Sorry, I can't do that.");
        assert!(outcome.capability_log.starts_with("does_not_exist -> "));
    }

    #[tokio::test]
    async fn test_delete_missing_thread_is_not_found() {
        let dir = TempDir::new().unwrap();
        let orchestrator = build(&dir, MockCompletionService::new());
        let err = orchestrator.delete_thread("thread_nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_branch_is_independent_on_disk() {
        let dir = TempDir::new().unwrap();
        let orchestrator = build(&dir, MockCompletionService::new());
        let first = orchestrator.run_turn(None, "a", None).await;
        orchestrator.run_turn(Some(&first.thread_id), "b", None).await;

        let source = orchestrator.get_thread(&first.thread_id).await.unwrap();
        let cut = source.messages()[2].id.clone();
        let branch_id = orchestrator.branch(&first.thread_id, &cut).await.unwrap();

        let branch = orchestrator.get_thread(&branch_id).await.unwrap();
        assert_eq!(branch.messages(), &source.messages()[..2]);

        orchestrator.run_turn(Some(&branch_id), "c", None).await;
        let source_after = orchestrator.get_thread(&first.thread_id).await.unwrap();
        assert_eq!(source_after.messages(), source.messages());

        let store = FileThreadStore::new(dir.path().join("threads"));
        store
            .update(&first.thread_id, ThreadData::default(), "cleared")
            .await
            .unwrap();
        let branch_after = orchestrator.get_thread(&branch_id).await.unwrap();
        assert_eq!(branch_after.messages().len(), 4);
    }

    #[tokio::test]
    async fn test_service_outage_returns_apology_and_keeps_thread() {
        let dir = TempDir::new().unwrap();
        let orchestrator = build(&dir, MockCompletionService::new().with_submit_failures(3));
        let outcome = orchestrator.run_turn(None, "anyone there?", None).await;
        assert_eq!(outcome.assistant_text, APOLOGY);
        assert!(orchestrator.list_threads().await.unwrap().is_empty());
    }
}
