//! 集成测试共用的组装代码

#![allow(dead_code)]

use std::sync::Arc;

use ritveer::config::AppConfig;
use ritveer::core::{Orchestrator, OrchestratorBuilder, ResumeOutcome};
use ritveer::llm::{HeuristicLlmClient, LlmClient};
use ritveer::stages::{PaymentConfirmation, PaymentStatus};
use ritveer::tools::{RetryPolicies, RetryPolicy, SimulatedWorld, ToolRegistry};

pub const CLAY_POTS: &str = "need 50 clay pots in Jaipur, budget 5000, within 10 days";

/// 压缩超时与退避，测试不必真的等待
pub fn fast_retry() -> RetryPolicies {
    RetryPolicies::uniform(RetryPolicy {
        max_attempts: 3,
        timeout_ms: 2_000,
        base_delay_ms: 1,
        max_delay_ms: 5,
    })
}

pub fn build(config: AppConfig, registry: ToolRegistry) -> Orchestrator {
    OrchestratorBuilder::new(config)
        .with_registry(registry)
        .with_retry_policies(fast_retry())
        .build()
        .unwrap()
}

pub fn heuristic() -> Arc<dyn LlmClient> {
    Arc::new(HeuristicLlmClient::new())
}

/// 默认配置 + 给定模拟世界 + 规则抽取客户端
pub fn orchestrator(world: &SimulatedWorld) -> Orchestrator {
    build(AppConfig::default(), world.registry(heuristic()))
}

pub fn confirmation(reference: &str, amount: rust_decimal::Decimal) -> PaymentConfirmation {
    PaymentConfirmation {
        reference: reference.to_string(),
        amount,
        status: PaymentStatus::Captured,
        receipt_id: None,
    }
}

/// 按挂起中的承诺金额付款
pub async fn pay(orchestrator: &Orchestrator, id: &str) -> ResumeOutcome {
    let state = orchestrator.load(id).await.unwrap();
    let pending = state.pending_commitment.expect("request should await payment");
    orchestrator
        .resume(confirmation(&pending.payment_reference, pending.amount))
        .await
        .unwrap()
}
