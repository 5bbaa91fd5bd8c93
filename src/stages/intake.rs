//! Intake：安全过滤后交给 llm_decide 抽取结构化需求，校验必填字段

use async_trait::async_trait;

use crate::core::state::{RequestState, Stage};
use crate::core::PipelineError;
use crate::stages::guard::screen;
use crate::stages::{StageContext, StageExecutor, StageOutcome};
use crate::tools::contracts::{DecisionRequest, DecisionTask, LLM_DECIDE};
use crate::tools::schema::{extraction_schema, ExtractionContract};

#[derive(Debug, Default, Clone, Copy)]
pub struct IntakeStage;

#[async_trait]
impl StageExecutor for IntakeStage {
    fn stage(&self) -> Stage {
        Stage::Intake
    }

    async fn run(&self, state: &RequestState, ctx: &StageContext) -> Result<StageOutcome, PipelineError> {
        let verdict = screen(&state.raw_input, &ctx.guard);
        ctx.record([verdict.evaluation()]);
        if !verdict.passed() {
            tracing::warn!(request_id = %state.id, reasons = ?verdict.reasons, "inbound message rejected by guard");
            return Ok(StageOutcome::abort(state.clone(), "guard_rejected"));
        }

        let request = DecisionRequest {
            task: DecisionTask::ExtractRequest,
            input: verdict.sanitized,
            schema: extraction_schema(),
        };
        let contract: ExtractionContract = ctx
            .gateway
            .call(LLM_DECIDE, &request, &state.idempotency_key("extract"))
            .await?;
        let normalized = contract.normalize()?;
        tracing::info!(
            request_id = %state.id,
            item = %normalized.item,
            quantity = normalized.quantity,
            location = %normalized.location,
            "request normalized"
        );

        let mut next = state.clone();
        next.normalized_request = Some(normalized);
        Ok(StageOutcome::advance(next, Stage::Cluster))
    }
}
