//! Ops：为已付款订单创建物流单，并把运单号通知客户

use async_trait::async_trait;

use crate::core::state::{RequestState, Stage};
use crate::core::PipelineError;
use crate::stages::{require_request, StageContext, StageExecutor, StageOutcome};
use crate::tools::contracts::{ShipmentRequest, ShipmentResponse, SHIPMENT_CREATE};

#[derive(Debug, Default, Clone, Copy)]
pub struct OpsStage;

#[async_trait]
impl StageExecutor for OpsStage {
    fn stage(&self) -> Stage {
        Stage::Ops
    }

    async fn run(&self, state: &RequestState, ctx: &StageContext) -> Result<StageOutcome, PipelineError> {
        let request = require_request(state)?;
        let order = state
            .final_order
            .clone()
            .ok_or_else(|| PipelineError::Validation("missing_final_order".to_string()))?;

        let shipment: ShipmentResponse = ctx
            .gateway
            .call(
                SHIPMENT_CREATE,
                &ShipmentRequest {
                    order,
                    destination: request.location.clone(),
                },
                &state.idempotency_key("shipment"),
            )
            .await?;
        tracing::info!(
            request_id = %state.id,
            tracking_id = %shipment.tracking_id,
            cost = %shipment.cost,
            "shipment created"
        );
        ctx.notify(
            state,
            "notify:tracking",
            format!("Your {} are on the way. Tracking id: {}", request.item, shipment.tracking_id),
        )
        .await;

        let mut next = state.clone();
        next.shipping_label_ref = Some(shipment.label_ref);
        next.tracking_id = Some(shipment.tracking_id);
        next.shipping_cost = Some(shipment.cost);
        Ok(StageOutcome::advance(next, Stage::Cash))
    }
}
