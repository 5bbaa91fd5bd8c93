//! 调度器：多请求并发驱动
//!
//! 作业经有界队列进入，由 Semaphore 限制同时执行的数量（每个请求内部仍串行，由租约保证）；
//! 后台定时扫描过期的挂起请求。CancellationToken 触发后停止接收新作业，等待在途作业结束。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::DispatcherSection;
use crate::core::orchestrator::{Orchestrator, ResumeOutcome};
use crate::core::state::RequestId;
use crate::core::PipelineError;
use crate::stages::PaymentConfirmation;

#[derive(Debug, Clone)]
pub enum Job {
    Drive(RequestId),
    /// 支付回调；恢复成功后继续驱动
    Resume(PaymentConfirmation),
}

pub struct Dispatcher;

impl Dispatcher {
    pub fn spawn(orchestrator: Arc<Orchestrator>, section: &DispatcherSection) -> DispatcherHandle {
        let (tx, rx) = mpsc::channel(section.queue_depth.max(1));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            orchestrator,
            rx,
            section.workers.max(1),
            Duration::from_secs(section.expiry_sweep_secs.max(1)),
            cancel.clone(),
        ));
        tracing::info!(workers = section.workers, queue_depth = section.queue_depth, "dispatcher started");
        DispatcherHandle { tx, cancel, task }
    }
}

pub struct DispatcherHandle {
    tx: mpsc::Sender<Job>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// 队列满时等待
    pub async fn submit(&self, job: Job) -> Result<(), PipelineError> {
        self.tx.send(job).await.map_err(|_| PipelineError::DispatcherClosed)
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 停止接收新作业；已排队但未开始的作业被丢弃
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// 关闭队列，处理完已排队作业后返回
    pub async fn join(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "dispatcher task panicked");
        }
    }
}

async fn run(
    orchestrator: Arc<Orchestrator>,
    mut rx: mpsc::Receiver<Job>,
    workers: usize,
    sweep_every: Duration,
    cancel: CancellationToken,
) {
    let permits = Arc::new(Semaphore::new(workers));
    let mut inflight = JoinSet::new();
    let mut ticker = tokio::time::interval(sweep_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // 第一次 tick 立即返回，跳过
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            job = rx.recv() => {
                let Some(job) = job else { break };
                let permit = tokio::select! {
                    permit = permits.clone().acquire_owned() => permit,
                    _ = cancel.cancelled() => break,
                };
                let Ok(permit) = permit else { break };
                let orchestrator = orchestrator.clone();
                inflight.spawn(async move {
                    let _permit = permit;
                    handle_job(&orchestrator, job).await;
                });
            }
            _ = ticker.tick() => {
                match orchestrator.expire_suspended(Utc::now()).await {
                    Ok(expired) if !expired.is_empty() => {
                        tracing::info!(count = expired.len(), "expired suspended requests");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "expiry sweep failed"),
                }
            }
            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "dispatcher job panicked");
                }
            }
        }
    }

    while let Some(joined) = inflight.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "dispatcher job panicked");
        }
    }
    tracing::info!("dispatcher stopped");
}

async fn handle_job(orchestrator: &Orchestrator, job: Job) {
    match job {
        Job::Drive(id) => drive(orchestrator, &id).await,
        Job::Resume(confirmation) => match orchestrator.resume(confirmation).await {
            Ok(ResumeOutcome::Resumed(id)) => drive(orchestrator, &id).await,
            Ok(outcome) => tracing::info!(?outcome, "payment confirmation handled"),
            Err(e) => tracing::warn!(error = %e, "payment confirmation failed"),
        },
    }
}

async fn drive(orchestrator: &Orchestrator, id: &str) {
    match orchestrator.drive(id).await {
        Ok(outcome) => tracing::debug!(request_id = %id, ?outcome, "drive finished"),
        Err(e) => tracing::error!(request_id = %id, error = %e, "drive failed"),
    }
}
