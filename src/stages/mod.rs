//! 阶段执行器
//!
//! 每个阶段实现 StageExecutor：读入当前 RequestState，经 ToolGateway 完成外部交互，
//! 返回 StageOutcome（前进 / 挂起 / 终止 / 失败）。执行器不持久化、不推进版本号，
//! 这些都由 Orchestrator 完成；规则评估记录写入 StageContext，由 Orchestrator 统一审计。

pub mod cash;
pub mod cluster;
pub mod commit;
pub mod guard;
pub mod intake;
pub mod learn;
pub mod ops;
pub mod resume;
pub mod supplier;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::PipelineSettings;
use crate::core::state::{RequestState, Stage};
use crate::core::PipelineError;
use crate::rules::{PolicyConfig, RuleEngine, RuleEvaluation};
use crate::tools::contracts::{NotifyRequest, NOTIFY};
use crate::tools::ToolGateway;

pub use cash::CashStage;
pub use cluster::ClusterStage;
pub use commit::CommitStage;
pub use guard::{GuardPolicy, GuardVerdict, SenderThrottle};
pub use intake::IntakeStage;
pub use learn::LearnStage;
pub use ops::OpsStage;
pub use resume::{evaluate_confirmation, PaymentConfirmation, PaymentStatus, ResumeDecision};
pub use supplier::SupplierStage;

/// 阶段执行结果；每个变体都携带执行器修改后的状态副本
#[derive(Debug, Clone)]
pub enum StageOutcome {
    Advance { state: RequestState, next: Stage },
    /// 等待外部回调（支付确认）
    Suspend { state: RequestState, token: String },
    Abort { state: RequestState, reason: String },
    Fail { state: RequestState, reason: String },
}

impl StageOutcome {
    pub fn advance(state: RequestState, next: Stage) -> Self {
        StageOutcome::Advance { state, next }
    }

    pub fn abort(state: RequestState, reason: impl Into<String>) -> Self {
        StageOutcome::Abort {
            state,
            reason: reason.into(),
        }
    }

    pub fn fail(state: RequestState, reason: impl Into<String>) -> Self {
        StageOutcome::Fail {
            state,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StageOutcome::Advance { .. } => "advance",
            StageOutcome::Suspend { .. } => "suspend",
            StageOutcome::Abort { .. } => "abort",
            StageOutcome::Fail { .. } => "fail",
        }
    }
}

/// 单次阶段执行的上下文：共享的网关与策略，外加本次执行的规则评估记录
pub struct StageContext {
    pub gateway: Arc<ToolGateway>,
    pub policy: Arc<PolicyConfig>,
    pub settings: Arc<PipelineSettings>,
    pub guard: Arc<GuardPolicy>,
    pub rules: RuleEngine,
    evaluations: Mutex<Vec<RuleEvaluation>>,
}

impl StageContext {
    pub fn new(
        gateway: Arc<ToolGateway>,
        policy: Arc<PolicyConfig>,
        settings: Arc<PipelineSettings>,
        guard: Arc<GuardPolicy>,
    ) -> Self {
        Self {
            gateway,
            policy,
            settings,
            guard,
            rules: RuleEngine::new(),
            evaluations: Mutex::new(Vec::new()),
        }
    }

    pub fn record(&self, evaluations: impl IntoIterator<Item = RuleEvaluation>) {
        if let Ok(mut recorded) = self.evaluations.lock() {
            recorded.extend(evaluations);
        }
    }

    pub fn take_evaluations(&self) -> Vec<RuleEvaluation> {
        self.evaluations
            .lock()
            .map(|mut e| std::mem::take(&mut *e))
            .unwrap_or_default()
    }

    /// 尽力而为的客户通知：失败只记日志，不影响阶段结果
    pub async fn notify(&self, state: &RequestState, suffix: &str, message: impl Into<String>) {
        let request = NotifyRequest {
            to: state.sender.clone(),
            message: message.into(),
        };
        let key = state.idempotency_key(suffix);
        if let Err(e) = self
            .gateway
            .call::<_, serde_json::Value>(NOTIFY, &request, &key)
            .await
        {
            tracing::warn!(request_id = %state.id, error = %e, "customer notification failed");
        }
    }
}

/// 阶段执行器 trait
#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn stage(&self) -> Stage;

    async fn run(&self, state: &RequestState, ctx: &StageContext) -> Result<StageOutcome, PipelineError>;
}

/// 阶段到执行器的映射
#[derive(Clone)]
pub struct StageSet {
    executors: HashMap<Stage, Arc<dyn StageExecutor>>,
}

impl Default for StageSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl StageSet {
    pub fn empty() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Intake → Cluster → Supplier → Commit → Ops → Cash → Learn
    pub fn standard() -> Self {
        let mut set = Self::empty();
        set.register(IntakeStage);
        set.register(ClusterStage);
        set.register(SupplierStage);
        set.register(CommitStage);
        set.register(OpsStage);
        set.register(CashStage);
        set.register(LearnStage);
        set
    }

    /// 注册或替换某阶段的执行器
    pub fn register(&mut self, executor: impl StageExecutor + 'static) {
        self.executors.insert(executor.stage(), Arc::new(executor));
    }

    pub fn get(&self, stage: Stage) -> Option<Arc<dyn StageExecutor>> {
        self.executors.get(&stage).cloned()
    }
}

/// 当前请求的规范化需求；缺失说明状态已损坏，按校验失败处理
pub(crate) fn require_request(state: &RequestState) -> Result<&crate::core::state::NormalizedRequest, PipelineError> {
    state
        .normalized_request
        .as_ref()
        .ok_or_else(|| PipelineError::Validation("incomplete_request".to_string()))
}
