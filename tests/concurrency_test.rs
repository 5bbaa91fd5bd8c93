//! 并发相关测试：租约互斥、调度器并发驱动、回调作业、过期扫描与关闭

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{build, confirmation, heuristic, orchestrator, CLAY_POTS};
use ritveer::config::{AppConfig, DispatcherSection};
use ritveer::core::{Dispatcher, DriveOutcome, InboundMessage, Job, Stage, SubmitOutcome};
use ritveer::observability::AuditKind;
use ritveer::tools::SimulatedWorld;

async fn wait_for_stage(orch: &ritveer::Orchestrator, id: &str, stage: Stage) -> bool {
    for _ in 0..200 {
        if orch.load(id).await.map(|s| s.stage == stage).unwrap_or(false) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

fn dispatcher_section(workers: usize) -> DispatcherSection {
    DispatcherSection {
        workers,
        queue_depth: 16,
        expiry_sweep_secs: 3600,
    }
}

#[tokio::test]
async fn test_held_lease_makes_drive_busy() {
    let world = SimulatedWorld::demo();
    let orch = orchestrator(&world);
    let submitted = orch
        .submit(InboundMessage::new(Some("wamid.l1"), "+919800000010", CLAY_POTS))
        .await
        .unwrap();
    let id = submitted.request_id().unwrap().to_string();

    let guard = orch.leases().acquire(&id).unwrap();
    assert_eq!(orch.drive(&id).await.unwrap(), DriveOutcome::Busy);
    assert_eq!(orch.load(&id).await.unwrap().stage, Stage::Intake);
    let history = orch.audit().history(&id).await;
    assert!(history.iter().any(|r| r.kind == AuditKind::LeaseContended));

    drop(guard);
    assert_eq!(orch.drive(&id).await.unwrap(), DriveOutcome::Suspended);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_drives_of_one_request_advance_once() {
    let world = SimulatedWorld::demo();
    let orch = Arc::new(orchestrator(&world));
    let submitted = orch
        .submit(InboundMessage::new(Some("wamid.l2"), "+919800000011", CLAY_POTS))
        .await
        .unwrap();
    let id = submitted.request_id().unwrap().to_string();

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let orch = orch.clone();
        let id = id.clone();
        tasks.push(tokio::spawn(async move { orch.drive(&id).await }));
    }
    for task in tasks {
        let outcome = task.await.unwrap().unwrap();
        assert!(matches!(outcome, DriveOutcome::Suspended | DriveOutcome::Busy));
    }
    if orch.load(&id).await.unwrap().stage != Stage::Commit {
        assert_eq!(orch.drive(&id).await.unwrap(), DriveOutcome::Suspended);
    }
    // 无论多少并发驱动者，支付只创建一次
    assert_eq!(world.payments.created().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dispatcher_drives_many_requests() {
    let world = SimulatedWorld::demo();
    let mut config = AppConfig::default();
    config.guard.per_sender_burst = 100;
    let orch = Arc::new(build(config, world.registry(heuristic())));
    let handle = Dispatcher::spawn(orch.clone(), &dispatcher_section(3));

    let mut ids = Vec::new();
    for n in 0..8 {
        let message = InboundMessage::new(Some(&format!("wamid.d{n}")), format!("+91980000{n:04}"), CLAY_POTS);
        match orch.submit(message).await.unwrap() {
            SubmitOutcome::Accepted(id) => ids.push(id),
            other => panic!("unexpected submit outcome: {other:?}"),
        }
    }
    for id in &ids {
        handle.submit(Job::Drive(id.clone())).await.unwrap();
    }
    handle.join().await;

    for id in &ids {
        let state = orch.load(id).await.unwrap();
        assert_eq!(state.stage, Stage::Commit, "request {id}");
        assert!(state.is_suspended());
    }
    assert_eq!(world.payments.created().len(), ids.len());
}

#[tokio::test]
async fn test_dispatcher_resume_job_completes_request() {
    let world = SimulatedWorld::demo();
    let orch = Arc::new(orchestrator(&world));
    let handle = Dispatcher::spawn(orch.clone(), &dispatcher_section(2));

    let submitted = orch
        .submit(InboundMessage::new(Some("wamid.r1"), "+919800000020", CLAY_POTS))
        .await
        .unwrap();
    let id = submitted.request_id().unwrap().to_string();
    handle.submit(Job::Drive(id.clone())).await.unwrap();
    assert!(wait_for_stage(&orch, &id, Stage::Commit).await);

    let pending = orch.load(&id).await.unwrap().pending_commitment.unwrap();
    handle
        .submit(Job::Resume(confirmation(&pending.payment_reference, pending.amount)))
        .await
        .unwrap();
    assert!(wait_for_stage(&orch, &id, Stage::Fulfilled).await);
    handle.join().await;

    let history = orch.audit().history(&id).await;
    assert!(history.iter().any(|r| r.kind == AuditKind::Resumed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_payment_during_lease_contention_is_not_lost() {
    let world = SimulatedWorld::demo();
    let orch = Arc::new(orchestrator(&world));
    let handle = Dispatcher::spawn(orch.clone(), &dispatcher_section(2));

    let (submitted, driven) = orch
        .process(InboundMessage::new(Some("wamid.r2"), "+919800000021", CLAY_POTS))
        .await
        .unwrap();
    assert_eq!(driven, Some(DriveOutcome::Suspended));
    let id = submitted.request_id().unwrap().to_string();
    let pending = orch.load(&id).await.unwrap().pending_commitment.unwrap();

    let guard = orch.leases().acquire(&id).unwrap();
    handle
        .submit(Job::Resume(confirmation(&pending.payment_reference, pending.amount)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(orch.load(&id).await.unwrap().is_suspended());
    drop(guard);

    assert!(wait_for_stage(&orch, &id, Stage::Fulfilled).await);
    handle.join().await;
    assert!(orch
        .expire_suspended(chrono::Utc::now() + chrono::Duration::days(2))
        .await
        .unwrap()
        .is_empty());
    assert_eq!(orch.load(&id).await.unwrap().stage, Stage::Fulfilled);
}

#[tokio::test]
async fn test_dispatcher_sweep_expires_unpaid_requests() {
    let world = SimulatedWorld::demo();
    let mut config = AppConfig::default();
    config.pipeline.payment_window_secs = 0;
    let orch = Arc::new(build(config, world.registry(heuristic())));
    let handle = Dispatcher::spawn(
        orch.clone(),
        &DispatcherSection {
            workers: 1,
            queue_depth: 4,
            expiry_sweep_secs: 1,
        },
    );

    let (submitted, driven) = orch
        .process(InboundMessage::new(Some("wamid.x1"), "+919800000030", CLAY_POTS))
        .await
        .unwrap();
    assert_eq!(driven, Some(DriveOutcome::Suspended));
    let id = submitted.request_id().unwrap().to_string();

    assert!(wait_for_stage(&orch, &id, Stage::Aborted).await);
    let state = orch.load(&id).await.unwrap();
    assert_eq!(state.abort_reason.as_deref(), Some("payment_expired"));
    assert!(orch
        .audit()
        .history(&id)
        .await
        .iter()
        .any(|r| r.kind == AuditKind::Expired));
    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn test_dispatcher_rejects_jobs_after_shutdown() {
    let world = SimulatedWorld::demo();
    let orch = Arc::new(orchestrator(&world));
    let handle = Dispatcher::spawn(orch.clone(), &dispatcher_section(1));
    handle.shutdown();
    assert!(handle.token().is_cancelled());

    // 调度循环退出后队列关闭
    let mut closed = false;
    for _ in 0..50 {
        if handle.submit(Job::Drive("nobody".to_string())).await.is_err() {
            closed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(closed);
    handle.join().await;
}
