//! Commit：选出最优报价，经规则引擎检查后创建支付链接并挂起等待买家付款
//!
//! 挂起令牌即支付引用，由请求 ID 与当前版本派生（同一版本重跑得到同一令牌，配合幂等键不会重复下单）。

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};

use crate::core::state::{PendingCommitment, RequestState, Stage, SupplierQuote};
use crate::core::PipelineError;
use crate::rules::{CommitInputs, Verdict};
use crate::stages::{require_request, StageContext, StageExecutor, StageOutcome};
use crate::tools::contracts::{PaymentLink, PaymentRequest, StrikeLookupRequest, StrikeLookupResponse, PAYMENT_CREATE, STRIKE_LOOKUP};

/// 支付窗口上限（一年）
const MAX_PAYMENT_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Default, Clone, Copy)]
pub struct CommitStage;

impl CommitStage {
    /// 最低价优先，其次交期最短，最后按供应商 ID 保证确定性
    pub fn select_best(quotes: &[SupplierQuote]) -> Option<&SupplierQuote> {
        quotes.iter().filter(|q| q.is_viable()).min_by(|a, b| {
            a.price
                .cmp(&b.price)
                .then(a.eta_days.cmp(&b.eta_days))
                .then(a.supplier_id.cmp(&b.supplier_id))
        })
    }

    pub fn payment_reference(state: &RequestState) -> String {
        let digest = Sha256::digest(format!("{}:{}", state.id, state.version).as_bytes());
        let hex = format!("{digest:x}");
        format!("pay_{}", &hex[..24])
    }
}

#[async_trait]
impl StageExecutor for CommitStage {
    fn stage(&self) -> Stage {
        Stage::Commit
    }

    async fn run(&self, state: &RequestState, ctx: &StageContext) -> Result<StageOutcome, PipelineError> {
        let request = require_request(state)?;
        let Some(best) = Self::select_best(&state.supplier_quotes).cloned() else {
            return Ok(StageOutcome::abort(state.clone(), "insufficient_quotes"));
        };
        let (Some(price), eta_days) = (best.price, best.eta_days) else {
            return Ok(StageOutcome::abort(state.clone(), "insufficient_quotes"));
        };

        let strikes: StrikeLookupResponse = ctx
            .gateway
            .call(
                STRIKE_LOOKUP,
                &StrikeLookupRequest {
                    supplier_ids: vec![best.supplier_id.clone()],
                },
                &state.idempotency_key("strikes"),
            )
            .await?;
        let report = ctx.rules.evaluate_commit(
            &ctx.policy,
            &CommitInputs {
                price,
                budget: request.budget,
                eta_days,
                deadline_days: request.deadline_days,
                supplier_strikes: strikes.strikes.get(&best.supplier_id).copied().unwrap_or(0),
            },
        );
        ctx.record(report.evaluations);
        if let Verdict::Reject { rule, reason } = report.verdict {
            tracing::info!(request_id = %state.id, supplier = %best.supplier_id, rule = %rule, "commit rejected by policy");
            return Err(PipelineError::PolicyRejection {
                rule: rule.to_string(),
                detail: reason,
            });
        }

        let reference = Self::payment_reference(state);
        let link: PaymentLink = ctx
            .gateway
            .call(
                PAYMENT_CREATE,
                &PaymentRequest {
                    amount: price,
                    currency: ctx.settings.currency.clone(),
                    reference: reference.clone(),
                    description: format!("{} x {}", request.quantity, request.item),
                },
                &state.idempotency_key("payment"),
            )
            .await?;
        ctx.notify(
            state,
            "notify:payment",
            format!(
                "{} x {} for {} {}. Pay here: {}",
                request.quantity, request.item, price, ctx.settings.currency, link.payment_url
            ),
        )
        .await;

        let window_secs = ctx.settings.payment_window_secs.min(MAX_PAYMENT_WINDOW_SECS) as i64;
        let expires_at = Utc::now() + ChronoDuration::seconds(window_secs);
        tracing::info!(
            request_id = %state.id,
            supplier = %best.supplier_id,
            amount = %price,
            reference = %reference,
            "awaiting payment"
        );

        let mut next = state.clone();
        next.pending_commitment = Some(PendingCommitment {
            quote: best,
            amount: price,
            currency: ctx.settings.currency.clone(),
            payment_reference: reference.clone(),
            payment_url: link.payment_url,
            expires_at,
        });
        Ok(StageOutcome::Suspend {
            state: next,
            token: reference,
        })
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::core::state::ContactOutcome;

    fn quote(id: &str, price: Option<i64>, eta: Option<u32>) -> SupplierQuote {
        SupplierQuote {
            supplier_id: id.to_string(),
            price: price.map(Decimal::from),
            eta_days: eta,
            contact_outcome: ContactOutcome::WebListed,
            round: 0,
        }
    }

    #[test]
    fn test_select_best_lowest_price_then_eta() {
        let quotes = vec![
            quote("b", Some(4500), Some(9)),
            quote("a", Some(4500), Some(7)),
            quote("c", Some(4000), None),
            quote("d", Some(4800), Some(2)),
        ];
        assert_eq!(CommitStage::select_best(&quotes).unwrap().supplier_id, "a");
        assert!(CommitStage::select_best(&[quote("x", None, None)]).is_none());
    }

    #[test]
    fn test_payment_reference_stable_per_version() {
        let mut state = RequestState::new("r1", "s", "x");
        state.version = 5;
        let a = CommitStage::payment_reference(&state);
        assert_eq!(a, CommitStage::payment_reference(&state));
        assert!(a.starts_with("pay_"));
        state.version = 6;
        assert_ne!(a, CommitStage::payment_reference(&state));
    }
}
