//! 编排器：请求状态机的驱动者
//!
//! 驱动循环：获取租约 → 加载状态 → 执行当前阶段 → 以期望版本持久化 → 释放租约 → 重复，
//! 直到终态或挂起。支付回调走单独的 `resume` 入口，只做一次定向恢复；
//! 超过支付窗口仍未付款的挂起请求由 `expire_suspended` 终止。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::{AppConfig, PipelineSettings};
use crate::core::lease::LeaseManager;
use crate::core::state::{RequestId, RequestState, Stage, TerminalOutcome};
use crate::core::{PipelineError, RecoveryAction, RecoveryEngine};
use crate::observability::{AuditKind, AuditRecord, AuditSink};
use crate::rules::PolicyConfig;
use crate::stages::{
    evaluate_confirmation, GuardPolicy, PaymentConfirmation, ResumeDecision, SenderThrottle, StageContext,
    StageOutcome, StageSet,
};
use crate::store::{StateStore, StoreError};
use crate::tools::contracts::{NotifyRequest, NOTIFY};
use crate::tools::ToolGateway;

const LEASE_WAIT_MARGIN: std::time::Duration = std::time::Duration::from_millis(500);

/// 来自消息渠道的一条入站消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// 渠道侧的消息 ID；同一 ID + 内容重复投递视为重放
    pub message_id: Option<String>,
    pub sender: String,
    pub body: String,
}

impl InboundMessage {
    pub fn new(message_id: Option<&str>, sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            message_id: message_id.map(str::to_string),
            sender: sender.into(),
            body: body.into(),
        }
    }

    /// `{message_id}-{sha256(body) 前 16 位}`；没有消息 ID 时用随机 uuid
    pub fn request_id(&self) -> RequestId {
        match self.message_id.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            Some(message_id) => {
                let digest = Sha256::digest(self.body.as_bytes());
                let hex = format!("{digest:x}");
                format!("{message_id}-{}", &hex[..16])
            }
            None => Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted(RequestId),
    /// 已存在同 ID 的请求，未新建
    Duplicate(RequestId),
    Throttled,
}

impl SubmitOutcome {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            SubmitOutcome::Accepted(id) | SubmitOutcome::Duplicate(id) => Some(id),
            SubmitOutcome::Throttled => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    /// 等待支付回调
    Suspended,
    Terminal(TerminalOutcome),
    /// 其他驱动者持有租约
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// 已前进到 Ops，需继续 drive
    Resumed(RequestId),
    Aborted(RequestId),
    Discarded(String),
}

pub struct Orchestrator {
    store: Arc<dyn StateStore>,
    gateway: Arc<ToolGateway>,
    audit: Arc<dyn AuditSink>,
    stages: StageSet,
    leases: LeaseManager,
    recovery: RecoveryEngine,
    throttle: SenderThrottle,
    policy: Arc<PolicyConfig>,
    settings: Arc<PipelineSettings>,
    guard: Arc<GuardPolicy>,
}

impl Orchestrator {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn StateStore>,
        gateway: Arc<ToolGateway>,
        audit: Arc<dyn AuditSink>,
        stages: StageSet,
    ) -> Self {
        Self {
            store,
            gateway,
            audit,
            stages,
            leases: LeaseManager::new(std::time::Duration::from_secs(config.store.lease_ttl_secs)),
            recovery: RecoveryEngine::new(),
            throttle: SenderThrottle::from_policy(&config.guard),
            policy: Arc::new(config.policy.clone()),
            settings: Arc::new(config.pipeline.clone()),
            guard: Arc::new(config.guard.clone()),
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    pub async fn load(&self, id: &str) -> Result<RequestState, PipelineError> {
        Ok(self.store.load(id).await?)
    }

    /// 接收入站消息：去重、限流后创建 Intake 状态；不执行任何阶段
    ///
    /// 重投的消息总是得到 Duplicate，不占用发送方的限流额度。
    pub async fn submit(&self, message: InboundMessage) -> Result<SubmitOutcome, PipelineError> {
        let id = message.request_id();
        match self.store.load(&id).await {
            Ok(_) => return Ok(self.duplicate(id).await),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        if !self.throttle.allow(&message.sender) {
            tracing::warn!(sender = %message.sender, "sender throttled");
            self.audit
                .record(AuditRecord::new(
                    id,
                    AuditKind::Throttled,
                    None,
                    serde_json::json!({ "sender": message.sender }),
                ))
                .await;
            return Ok(SubmitOutcome::Throttled);
        }

        let state = RequestState::new(id.clone(), message.sender.clone(), message.body);
        match self.store.create(state).await {
            Ok(created) => {
                tracing::info!(request_id = %id, sender = %message.sender, "request accepted");
                self.audit
                    .record(AuditRecord::new(
                        id.clone(),
                        AuditKind::Created,
                        Some(created.stage),
                        serde_json::json!({ "sender": message.sender, "version": created.version }),
                    ))
                    .await;
                Ok(SubmitOutcome::Accepted(id))
            }
            Err(StoreError::AlreadyExists(_)) => Ok(self.duplicate(id).await),
            Err(e) => Err(e.into()),
        }
    }

    async fn duplicate(&self, id: RequestId) -> SubmitOutcome {
        tracing::info!(request_id = %id, "duplicate inbound message");
        self.audit
            .record(AuditRecord::new(id.clone(), AuditKind::Duplicate, None, Value::Null))
            .await;
        SubmitOutcome::Duplicate(id)
    }

    /// 提交并立即驱动（演示与测试用）
    pub async fn process(&self, message: InboundMessage) -> Result<(SubmitOutcome, Option<DriveOutcome>), PipelineError> {
        let submitted = self.submit(message).await?;
        let driven = match &submitted {
            SubmitOutcome::Accepted(id) => Some(self.drive(id).await?),
            _ => None,
        };
        Ok((submitted, driven))
    }

    /// 驱动请求直到终态或挂起；每个阶段单独获取一次租约
    pub async fn drive(&self, id: &str) -> Result<DriveOutcome, PipelineError> {
        let mut conflicts = 0u32;
        loop {
            let lease = match self.leases.acquire(id) {
                Ok(lease) => lease,
                Err(PipelineError::LeaseHeld(_)) => {
                    tracing::debug!(request_id = %id, "lease held elsewhere");
                    self.audit
                        .record(AuditRecord::new(id, AuditKind::LeaseContended, None, Value::Null))
                        .await;
                    return Ok(DriveOutcome::Busy);
                }
                Err(e) => return Err(e),
            };

            let state = self.store.load(id).await?;
            if let Some(outcome) = state.terminal_outcome {
                return Ok(DriveOutcome::Terminal(outcome));
            }
            if state.is_suspended() {
                return Ok(DriveOutcome::Suspended);
            }

            match self.step(state).await {
                Ok(_) => {}
                Err(PipelineError::VersionConflict { expected, actual, .. })
                    if conflicts < self.settings.max_conflict_retries =>
                {
                    conflicts += 1;
                    tracing::info!(request_id = %id, expected, actual, attempt = conflicts, "version conflict, reloading");
                    self.audit
                        .record(AuditRecord::new(
                            id,
                            AuditKind::VersionConflict,
                            None,
                            serde_json::json!({ "expected": expected, "actual": actual }),
                        ))
                        .await;
                }
                Err(e) => return Err(e),
            }
            if !lease.is_valid() {
                tracing::warn!(request_id = %id, "lease expired during stage execution");
            }
        }
    }

    /// 执行当前阶段一次并持久化结果
    async fn step(&self, state: RequestState) -> Result<RequestState, PipelineError> {
        let stage = state.stage;
        let executor = self
            .stages
            .get(stage)
            .ok_or_else(|| PipelineError::Config(format!("no executor for stage {stage}")))?;
        let ctx = StageContext::new(
            self.gateway.clone(),
            self.policy.clone(),
            self.settings.clone(),
            self.guard.clone(),
        );
        tracing::debug!(request_id = %state.id, stage = %stage, version = state.version, "running stage");
        let result = executor.run(&state, &ctx).await;

        for evaluation in ctx.take_evaluations() {
            self.audit
                .record(AuditRecord::new(
                    state.id.clone(),
                    AuditKind::RuleEvaluation,
                    Some(stage),
                    serde_json::to_value(&evaluation).unwrap_or(Value::Null),
                ))
                .await;
        }

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => match self.recovery.handle(stage, &err) {
                RecoveryAction::Abort(reason) => {
                    tracing::warn!(request_id = %state.id, stage = %stage, error = %err, "stage aborted");
                    StageOutcome::abort(state.clone(), reason)
                }
                RecoveryAction::Fail(reason) => {
                    tracing::error!(request_id = %state.id, stage = %stage, error = %err, "stage failed after commitment");
                    StageOutcome::fail(state.clone(), reason)
                }
                RecoveryAction::ReloadAndRetry | RecoveryAction::Discard(_) => return Err(err),
            },
        };
        self.persist(&state, outcome).await
    }

    /// 把阶段结果落到状态上并以 previous.version 为期望版本保存
    async fn persist(&self, previous: &RequestState, outcome: StageOutcome) -> Result<RequestState, PipelineError> {
        let from = previous.stage;
        let kind = outcome.kind();
        let mut next = match outcome {
            StageOutcome::Advance { mut state, next } => {
                let over_limit = next == Stage::Cluster && state.recluster_count > self.settings.max_reclusters;
                let moved = if over_limit {
                    state.terminate(TerminalOutcome::Aborted, "insufficient_quotes")
                } else {
                    state.advance_to(next)
                };
                if let Err(err) = moved {
                    let (terminal, reason) = self.terminal_for(from, &err);
                    tracing::error!(request_id = %state.id, error = %err, "rejected stage transition");
                    state.terminate(terminal, reason)?;
                }
                state
            }
            StageOutcome::Suspend { mut state, token } => {
                state.suspend_token = Some(token);
                state
            }
            StageOutcome::Abort { mut state, reason } => {
                state.terminate(TerminalOutcome::Aborted, reason)?;
                state
            }
            StageOutcome::Fail { mut state, reason } => {
                state.terminate(TerminalOutcome::Failed, reason)?;
                state
            }
        };
        next.updated_at = Utc::now();

        let saved = self.store.save(next, previous.version).await?;
        tracing::info!(
            request_id = %saved.id,
            from = %from,
            to = %saved.stage,
            version = saved.version,
            outcome = kind,
            "stage transition"
        );
        self.audit
            .record(AuditRecord::new(
                saved.id.clone(),
                AuditKind::Transition,
                Some(saved.stage),
                serde_json::json!({
                    "from": from,
                    "to": saved.stage,
                    "outcome": kind,
                    "version": saved.version,
                    "reason": saved.abort_reason,
                    "snapshot": serde_json::to_value(&saved).unwrap_or(Value::Null),
                }),
            ))
            .await;
        if matches!(
            saved.terminal_outcome,
            Some(TerminalOutcome::Aborted | TerminalOutcome::Failed)
        ) {
            self.notify_terminal(&saved).await;
        }
        Ok(saved)
    }

    fn terminal_for(&self, stage: Stage, err: &PipelineError) -> (TerminalOutcome, String) {
        match self.recovery.handle(stage, err) {
            RecoveryAction::Fail(reason) => (TerminalOutcome::Failed, reason),
            RecoveryAction::Abort(reason) | RecoveryAction::Discard(reason) => (TerminalOutcome::Aborted, reason),
            RecoveryAction::ReloadAndRetry => (TerminalOutcome::Aborted, "internal_error".to_string()),
        }
    }

    async fn notify_terminal(&self, state: &RequestState) {
        let reason = state.abort_reason.as_deref().unwrap_or_default();
        let message = match (state.terminal_outcome, reason) {
            (Some(TerminalOutcome::Failed), _) => {
                "There was a problem with your order after payment. Our team will contact you.".to_string()
            }
            (_, "incomplete_request") => {
                "Sorry, we could not understand your request. Please tell us the item and your location.".to_string()
            }
            (_, "guard_rejected") => "Sorry, your message could not be processed.".to_string(),
            (_, "policy_rejected") => "We could not find an offer within your budget and deadline.".to_string(),
            (_, "no_suppliers_in_range" | "insufficient_quotes") => {
                "We could not find suppliers for your request right now.".to_string()
            }
            (_, "payment_expired") => "Your payment link has expired and the order was cancelled.".to_string(),
            (_, "payment_failed") => "Your payment did not go through and the order was cancelled.".to_string(),
            (_, other) => format!("Your request could not be completed ({other})."),
        };
        let request = NotifyRequest {
            to: state.sender.clone(),
            message,
        };
        if let Err(e) = self
            .gateway
            .call::<_, Value>(NOTIFY, &request, &state.idempotency_key("notify:terminal"))
            .await
        {
            tracing::warn!(request_id = %state.id, error = %e, "terminal notification failed");
        }
    }

    /// 支付回调：定向恢复一次；不匹配的回调只记审计，不改状态
    pub async fn resume(&self, confirmation: PaymentConfirmation) -> Result<ResumeOutcome, PipelineError> {
        let found = match self.store.find_suspended(&confirmation.reference).await {
            Ok(state) => state,
            Err(StoreError::NotFound(_)) => {
                tracing::warn!(reference = %confirmation.reference, "confirmation for unknown token discarded");
                self.audit
                    .record(AuditRecord::new(
                        format!("token:{}", confirmation.reference),
                        AuditKind::StaleCallback,
                        None,
                        serde_json::json!({ "reason": "unknown_token", "amount": confirmation.amount }),
                    ))
                    .await;
                return Ok(ResumeOutcome::Discarded("unknown_token".to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let id = found.id;
        // 已扣款的回调不能因短暂的租约竞争丢失：最多等到占用者的租约过期
        let _lease = self
            .leases
            .acquire_within(&id, self.leases.ttl() + LEASE_WAIT_MARGIN)
            .await?;

        let mut conflicts = 0u32;
        loop {
            let state = self.store.load(&id).await?;
            let decision = evaluate_confirmation(&state, &confirmation);
            let result = match decision {
                ResumeDecision::Discard(reason) => {
                    tracing::warn!(request_id = %id, reason = %reason, "payment confirmation discarded");
                    self.audit
                        .record(AuditRecord::new(
                            id.clone(),
                            AuditKind::StaleCallback,
                            Some(state.stage),
                            serde_json::json!({
                                "reason": reason,
                                "reference": confirmation.reference,
                                "amount": confirmation.amount,
                            }),
                        ))
                        .await;
                    return Ok(ResumeOutcome::Discarded(reason));
                }
                ResumeDecision::Abort(next, reason) => self
                    .persist(&state, StageOutcome::abort(next, reason))
                    .await
                    .map(|_| ResumeOutcome::Aborted(id.clone())),
                ResumeDecision::Advance(next) => self
                    .persist(&state, StageOutcome::advance(next, Stage::Ops))
                    .await
                    .map(|_| ResumeOutcome::Resumed(id.clone())),
            };
            match result {
                Ok(outcome) => {
                    self.audit
                        .record(AuditRecord::new(
                            id.clone(),
                            AuditKind::Resumed,
                            None,
                            serde_json::json!({ "status": confirmation.status, "amount": confirmation.amount }),
                        ))
                        .await;
                    return Ok(outcome);
                }
                Err(PipelineError::VersionConflict { .. }) if conflicts < self.settings.max_conflict_retries => {
                    conflicts += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 终止支付窗口已过的挂起请求；正被他人处理的请求跳过，留待下一轮
    pub async fn expire_suspended(&self, now: DateTime<Utc>) -> Result<Vec<RequestId>, PipelineError> {
        let mut expired = Vec::new();
        for candidate in self.store.list_suspended().await? {
            if !is_expired(&candidate, now) {
                continue;
            }
            let Ok(_lease) = self.leases.acquire(&candidate.id) else {
                continue;
            };
            let current = self.store.load(&candidate.id).await?;
            if !current.is_suspended() || !is_expired(&current, now) {
                continue;
            }
            match self
                .persist(&current, StageOutcome::abort(current.clone(), "payment_expired"))
                .await
            {
                Ok(saved) => {
                    tracing::info!(request_id = %saved.id, "suspended request expired");
                    self.audit
                        .record(AuditRecord::new(saved.id.clone(), AuditKind::Expired, Some(saved.stage), Value::Null))
                        .await;
                    expired.push(saved.id);
                }
                Err(PipelineError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(expired)
    }
}

fn is_expired(state: &RequestState, now: DateTime<Utc>) -> bool {
    state
        .pending_commitment
        .as_ref()
        .map(|p| p.expires_at <= now)
        .unwrap_or(false)
}
