//! SQLite 存储集成测试：落盘、重启后恢复挂起请求、版本冲突

mod common;

use std::sync::Arc;

use rust_decimal::Decimal;

use common::{fast_retry, heuristic, pay, CLAY_POTS};
use ritveer::config::AppConfig;
use ritveer::core::{DriveOutcome, InboundMessage, OrchestratorBuilder, ResumeOutcome, Stage, TerminalOutcome};
use ritveer::store::{open_store, SqliteStateStore, StateStore, StoreError};
use ritveer::tools::SimulatedWorld;
use ritveer::RequestState;

fn sqlite_config(dir: &tempfile::TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.store.sqlite_path = Some(dir.path().join("state").join("requests.db"));
    config
}

#[tokio::test]
async fn test_suspended_request_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let world = SimulatedWorld::demo();
    let message = InboundMessage::new(Some("wamid.s1"), "+919800000002", CLAY_POTS);

    let id = {
        let orch = OrchestratorBuilder::new(sqlite_config(&dir))
            .with_registry(world.registry(heuristic()))
            .with_retry_policies(fast_retry())
            .build()
            .unwrap();
        let (submitted, driven) = orch.process(message).await.unwrap();
        assert_eq!(driven, Some(DriveOutcome::Suspended));
        submitted.request_id().unwrap().to_string()
    };

    // 新进程：同一个数据库文件
    let orch = OrchestratorBuilder::new(sqlite_config(&dir))
        .with_registry(world.registry(heuristic()))
        .with_retry_policies(fast_retry())
        .build()
        .unwrap();
    let restored = orch.load(&id).await.unwrap();
    assert_eq!(restored.stage, Stage::Commit);
    assert!(restored.is_suspended());

    assert_eq!(pay(&orch, &id).await, ResumeOutcome::Resumed(id.clone()));
    assert_eq!(orch.drive(&id).await.unwrap(), DriveOutcome::Terminal(TerminalOutcome::Fulfilled));

    let store = SqliteStateStore::open(dir.path().join("state").join("requests.db")).unwrap();
    let done = store.load(&id).await.unwrap();
    assert_eq!(done.stage, Stage::Fulfilled);
    assert_eq!(done.final_order.unwrap().amount, Decimal::from(4500));
    assert!(store.list_suspended().await.unwrap().is_empty());
    // 同一支付只创建一次
    assert_eq!(world.payments.created().len(), 1);
}

#[tokio::test]
async fn test_sqlite_versions_strictly_increase() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&sqlite_config(&dir).store).unwrap();

    let mut state = store.create(RequestState::new("r-1", "+91", "pots")).await.unwrap();
    let mut seen = vec![state.version];
    for _ in 0..5 {
        let expected = state.version;
        state.recluster_count += 1;
        state = store.save(state, expected).await.unwrap();
        seen.push(state.version);
    }
    assert_eq!(seen, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(store.load("r-1").await.unwrap().recluster_count, 5);
}

#[tokio::test]
async fn test_sqlite_concurrent_saves_one_wins() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn StateStore> = Arc::new(SqliteStateStore::open(dir.path().join("c.db")).unwrap());
    let base = store.create(RequestState::new("r-2", "+91", "pots")).await.unwrap();

    let mut tasks = Vec::new();
    for n in 0..8u32 {
        let store = store.clone();
        let mut candidate = base.clone();
        candidate.strike_count = n;
        tasks.push(tokio::spawn(async move { store.save(candidate, 1).await }));
    }
    let mut wins = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(saved) => {
                assert_eq!(saved.version, 2);
                wins += 1;
            }
            Err(StoreError::VersionConflict { expected, actual, .. }) => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
                conflicts += 1;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(conflicts, 7);
    assert_eq!(store.load("r-2").await.unwrap().version, 2);
}

#[tokio::test]
async fn test_sqlite_duplicate_create_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStateStore::open(dir.path().join("d.db")).unwrap();
    store.create(RequestState::new("r-3", "+91", "pots")).await.unwrap();
    let err = store
        .create(RequestState::new("r-3", "+91", "other"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(id) if id == "r-3"));
    assert_eq!(store.load("r-3").await.unwrap().raw_input, "pots");
}
