//! Learn：根据交付情况调整供应商信誉分
//!
//! 准时 +0.5，迟到 -0.2，每个质量问题再 -0.5。交付查询或信誉分更新失败只记日志，请求照常完成。

use async_trait::async_trait;

use crate::core::state::{RequestState, Stage};
use crate::core::PipelineError;
use crate::stages::{StageContext, StageExecutor, StageOutcome};
use crate::tools::contracts::{
    DeliveryStatus, DeliveryStatusRequest, ScoreUpdateRequest, ScoreUpdateResponse, DELIVERY_STATUS,
    RELIABILITY_UPDATE,
};

const ON_TIME_BONUS: f64 = 0.5;
const LATE_PENALTY: f64 = 0.2;
const QUALITY_PENALTY: f64 = 0.5;

#[derive(Debug, Default, Clone, Copy)]
pub struct LearnStage;

impl LearnStage {
    pub fn score_delta(status: &DeliveryStatus) -> f64 {
        let timeliness = if status.on_time { ON_TIME_BONUS } else { -LATE_PENALTY };
        timeliness - QUALITY_PENALTY * status.quality_flags.len() as f64
    }
}

#[async_trait]
impl StageExecutor for LearnStage {
    fn stage(&self) -> Stage {
        Stage::Learn
    }

    async fn run(&self, state: &RequestState, ctx: &StageContext) -> Result<StageOutcome, PipelineError> {
        let order = state
            .final_order
            .as_ref()
            .ok_or_else(|| PipelineError::Validation("missing_final_order".to_string()))?;
        let tracking_id = state
            .tracking_id
            .clone()
            .ok_or_else(|| PipelineError::Validation("missing_tracking_id".to_string()))?;

        let status = match ctx
            .gateway
            .call::<_, DeliveryStatus>(
                DELIVERY_STATUS,
                &DeliveryStatusRequest { tracking_id },
                &state.idempotency_key("delivery"),
            )
            .await
        {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(request_id = %state.id, error = %e, "delivery status unavailable, skipping reliability update");
                return Ok(StageOutcome::advance(state.clone(), Stage::Fulfilled));
            }
        };
        let delta = Self::score_delta(&status);

        match ctx
            .gateway
            .call::<_, ScoreUpdateResponse>(
                RELIABILITY_UPDATE,
                &ScoreUpdateRequest {
                    supplier_id: order.supplier_id.clone(),
                    delta,
                },
                &state.idempotency_key("reliability"),
            )
            .await
        {
            Ok(resp) => tracing::info!(supplier = %order.supplier_id, delta, score = resp.score, "reliability updated"),
            Err(e) => tracing::warn!(request_id = %state.id, supplier = %order.supplier_id, error = %e, "reliability update failed"),
        }

        Ok(StageOutcome::advance(state.clone(), Stage::Fulfilled))
    }
}
