//! Cash：把收款、应付供应商与运费写入账本并对账
//!
//! 条目 ID 即幂等键，重跑同一版本不会重复记账。
//! 收款条目先入账：账本为它记下的金额必须等于支付确认的实收金额，否则请求失败。
//! 账本在该支付引用下的合计与实收金额之差超过 `max_unapproved_delta` 时，
//! 应付与运费条目记为待审批，并给供应商登记一次违约。运费不参与该差额。

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use crate::core::state::{FinalOrder, LedgerEntry, LedgerKind, LedgerStatus, RequestState, Stage};
use crate::core::PipelineError;
use crate::rules::CashInputs;
use crate::stages::{StageContext, StageExecutor, StageOutcome};
use crate::tools::contracts::{
    LedgerAppendRequest, LedgerAppendResponse, StrikeRegisterRequest, StrikeStatus, LEDGER_APPEND, STRIKE_REGISTER,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct CashStage;

impl CashStage {
    /// 本请求应记的条目：收款在前，其后是应付与运费（状态先记为已批准）
    pub fn entries(state: &RequestState, order: &FinalOrder) -> (LedgerEntry, Vec<LedgerEntry>) {
        let now = Utc::now();
        let payment_ref = state
            .payment_reference
            .clone()
            .unwrap_or_else(|| order.receipt_id.clone());
        let entry = |kind: LedgerKind, suffix: &str, amount: Decimal, reference: String| LedgerEntry {
            entry_id: state.idempotency_key(suffix),
            kind,
            amount,
            reference,
            status: LedgerStatus::Approved,
            recorded_at: now,
        };
        let received = entry(
            LedgerKind::PaymentReceived,
            "ledger:received",
            order.captured_amount,
            payment_ref,
        );
        let mut outgoing = vec![entry(
            LedgerKind::SupplierPayable,
            "ledger:payable",
            -order.amount,
            order.supplier_id.clone(),
        )];
        if let Some(cost) = state.shipping_cost {
            let reference = state
                .shipping_label_ref
                .clone()
                .unwrap_or_else(|| order.receipt_id.clone());
            outgoing.push(entry(LedgerKind::ShippingCost, "ledger:shipping", -cost, reference));
        }
        (received, outgoing)
    }

    async fn append(ctx: &StageContext, entry: &LedgerEntry) -> Result<LedgerAppendResponse, PipelineError> {
        let resp: LedgerAppendResponse = ctx
            .gateway
            .call(
                LEDGER_APPEND,
                &LedgerAppendRequest { entry: entry.clone() },
                &entry.entry_id,
            )
            .await?;
        if !resp.appended {
            tracing::debug!(entry_id = %entry.entry_id, "ledger entry already recorded");
        }
        Ok(resp)
    }
}

#[async_trait]
impl StageExecutor for CashStage {
    fn stage(&self) -> Stage {
        Stage::Cash
    }

    async fn run(&self, state: &RequestState, ctx: &StageContext) -> Result<StageOutcome, PipelineError> {
        let order = state
            .final_order
            .clone()
            .ok_or_else(|| PipelineError::Validation("missing_final_order".to_string()))?;

        let (received, mut outgoing) = Self::entries(state, &order);
        let mut next = state.clone();

        let receipt = Self::append(ctx, &received).await?;
        next.append_ledger(LedgerEntry {
            amount: receipt.recorded_amount,
            ..received
        });
        if next.receipts_total() != order.captured_amount {
            tracing::error!(
                request_id = %state.id,
                receipts = %next.receipts_total(),
                captured = %order.captured_amount,
                "ledger does not reconcile"
            );
            return Ok(StageOutcome::fail(next, "ledger_unreconciled"));
        }

        let inputs = CashInputs {
            captured: order.captured_amount,
            ledger_balance: receipt.reference_balance,
        };
        let report = ctx.rules.evaluate_cash(&ctx.policy, &inputs);
        ctx.record(report.evaluations);

        if !report.verdict.is_pass() {
            tracing::warn!(request_id = %state.id, delta = %inputs.delta(), "ledger delta needs approval");
            for entry in &mut outgoing {
                entry.status = LedgerStatus::PendingApproval;
            }
            let status: StrikeStatus = ctx
                .gateway
                .call(
                    STRIKE_REGISTER,
                    &StrikeRegisterRequest {
                        supplier_id: order.supplier_id.clone(),
                        request_id: state.id.clone(),
                        reason: "ledger_delta".to_string(),
                    },
                    &state.idempotency_key("strike"),
                )
                .await?;
            next.strike_count += 1;
            tracing::info!(supplier = %status.supplier_id, strikes = status.strikes, "strike registered");
        }

        for entry in outgoing {
            Self::append(ctx, &entry).await?;
            next.append_ledger(entry);
        }
        Ok(StageOutcome::advance(next, Stage::Learn))
    }
}
