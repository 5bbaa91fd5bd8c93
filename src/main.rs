//! Ritveer 演示程序
//!
//! 用模拟协作方与规则抽取客户端跑完一个请求：提交、驱动到挂起、模拟买家付款、继续驱动到终态，
//! 最后把审计记录逐行输出为 JSON。
//!
//! 用法：`ritveer "need 50 clay pots in Jaipur, budget 5000, within 10 days"`

use std::sync::Arc;

use anyhow::Context;
use ritveer::core::{create_orchestrator_builder, DriveOutcome, InboundMessage, SubmitOutcome};
use ritveer::llm::HeuristicLlmClient;
use ritveer::stages::{PaymentConfirmation, PaymentStatus};
use ritveer::tools::SimulatedWorld;

const DEFAULT_MESSAGE: &str = "need 50 clay pots in Jaipur, budget 5000, within 10 days";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ritveer::observability::init();

    let body = std::env::args()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    let body = if body.trim().is_empty() {
        DEFAULT_MESSAGE.to_string()
    } else {
        body
    };

    let world = SimulatedWorld::demo();
    let orchestrator = create_orchestrator_builder(None)
        .with_registry(world.registry(Arc::new(HeuristicLlmClient::new())))
        .build()
        .context("Failed to build orchestrator")?;

    let message = InboundMessage::new(Some("demo-1"), "+919800000000", body);
    let id = match orchestrator.submit(message).await.context("Submit failed")? {
        SubmitOutcome::Accepted(id) | SubmitOutcome::Duplicate(id) => id,
        SubmitOutcome::Throttled => anyhow::bail!("sender throttled"),
    };

    let mut outcome = orchestrator.drive(&id).await.context("Drive failed")?;
    if outcome == DriveOutcome::Suspended {
        let state = orchestrator.load(&id).await?;
        let pending = state
            .pending_commitment
            .context("suspended request has no pending commitment")?;
        tracing::info!(url = %pending.payment_url, amount = %pending.amount, "simulating buyer payment");
        let resumed = orchestrator
            .resume(PaymentConfirmation {
                reference: pending.payment_reference,
                amount: pending.amount,
                status: PaymentStatus::Captured,
                receipt_id: None,
            })
            .await
            .context("Resume failed")?;
        tracing::info!(?resumed, "payment confirmation handled");
        outcome = orchestrator.drive(&id).await.context("Drive after resume failed")?;
    }

    let state = orchestrator.load(&id).await?;
    println!(
        "request {} finished: {:?} (stage={}, reason={})",
        id,
        outcome,
        state.stage,
        state.abort_reason.as_deref().unwrap_or("-")
    );
    for record in orchestrator.audit().history(&id).await {
        println!("{}", serde_json::to_string(&record)?);
    }
    for sent in world.notifier.sent() {
        println!("notify {}: {}", sent.to, sent.message);
    }
    Ok(())
}
