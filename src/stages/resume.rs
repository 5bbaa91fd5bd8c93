//! 支付回调的恢复判定
//!
//! 纯函数：给定挂起中的状态与一条支付确认，决定前进到 Ops、终止或丢弃。
//! 令牌或金额不符的回调一律丢弃，状态保持不变。

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::state::{FinalOrder, RequestState, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Captured,
    Failed,
}

/// 支付服务的回调
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    /// 创建支付链接时传入的引用（即挂起令牌）
    pub reference: String,
    pub amount: Decimal,
    pub status: PaymentStatus,
    /// 支付服务侧的收据号
    pub receipt_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResumeDecision {
    Advance(RequestState),
    Abort(RequestState, String),
    Discard(String),
}

pub fn evaluate_confirmation(state: &RequestState, confirmation: &PaymentConfirmation) -> ResumeDecision {
    if state.suspend_token.as_deref() != Some(confirmation.reference.as_str()) {
        return ResumeDecision::Discard("token_mismatch".to_string());
    }
    if state.stage != Stage::Commit {
        return ResumeDecision::Discard(format!("not_awaiting_payment:{}", state.stage));
    }
    let Some(pending) = state.pending_commitment.as_ref() else {
        return ResumeDecision::Discard("no_pending_commitment".to_string());
    };
    if confirmation.status == PaymentStatus::Failed {
        return ResumeDecision::Abort(state.clone(), "payment_failed".to_string());
    }
    if confirmation.amount != pending.amount {
        return ResumeDecision::Discard(format!(
            "amount_mismatch: expected {}, got {}",
            pending.amount, confirmation.amount
        ));
    }
    let Some(request) = state.normalized_request.as_ref() else {
        return ResumeDecision::Discard("no_normalized_request".to_string());
    };

    let mut next = state.clone();
    next.final_order = Some(FinalOrder {
        supplier_id: pending.quote.supplier_id.clone(),
        item: request.item.clone(),
        quantity: request.quantity,
        amount: pending.amount,
        captured_amount: confirmation.amount,
        currency: pending.currency.clone(),
        eta_days: pending.quote.eta_days,
        receipt_id: confirmation
            .receipt_id
            .clone()
            .unwrap_or_else(|| format!("order_{}", pending.payment_reference)),
    });
    next.payment_reference = Some(pending.payment_reference.clone());
    next.pending_commitment = None;
    next.suspend_token = None;
    ResumeDecision::Advance(next)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::core::state::{ContactOutcome, NormalizedRequest, PendingCommitment, SupplierQuote, Urgency};

    fn suspended() -> RequestState {
        let mut state = RequestState::new("r1", "+91", "pots");
        state.stage = Stage::Commit;
        state.suspend_token = Some("pay_abc".to_string());
        state.normalized_request = Some(NormalizedRequest {
            item: "clay pots".to_string(),
            quantity: 50,
            budget: Some(Decimal::from(5000)),
            location: "Jaipur".to_string(),
            deadline_days: None,
            urgency: Urgency::Normal,
        });
        state.pending_commitment = Some(PendingCommitment {
            quote: SupplierQuote {
                supplier_id: "s1".to_string(),
                price: Some(Decimal::from(4500)),
                eta_days: Some(7),
                contact_outcome: ContactOutcome::WebListed,
                round: 0,
            },
            amount: Decimal::from(4500),
            currency: "INR".to_string(),
            payment_reference: "pay_abc".to_string(),
            payment_url: "https://pay".to_string(),
            expires_at: Utc::now(),
        });
        state
    }

    fn confirmation(reference: &str, amount: i64, status: PaymentStatus) -> PaymentConfirmation {
        PaymentConfirmation {
            reference: reference.to_string(),
            amount: Decimal::from(amount),
            status,
            receipt_id: None,
        }
    }

    #[test]
    fn test_matching_confirmation_advances() {
        let decision = evaluate_confirmation(&suspended(), &confirmation("pay_abc", 4500, PaymentStatus::Captured));
        let ResumeDecision::Advance(next) = decision else {
            panic!("Expected Advance");
        };
        assert!(next.suspend_token.is_none());
        assert_eq!(next.payment_reference.as_deref(), Some("pay_abc"));
        let order = next.final_order.unwrap();
        assert_eq!(order.amount, Decimal::from(4500));
        assert_eq!(order.captured_amount, Decimal::from(4500));
        assert_eq!(order.receipt_id, "order_pay_abc");
    }

    #[test]
    fn test_amount_and_token_mismatch_discarded() {
        let state = suspended();
        assert!(matches!(
            evaluate_confirmation(&state, &confirmation("pay_abc", 4400, PaymentStatus::Captured)),
            ResumeDecision::Discard(r) if r.starts_with("amount_mismatch")
        ));
        assert_eq!(
            evaluate_confirmation(&state, &confirmation("pay_other", 4500, PaymentStatus::Captured)),
            ResumeDecision::Discard("token_mismatch".to_string())
        );
    }

    #[test]
    fn test_failed_payment_aborts() {
        assert!(matches!(
            evaluate_confirmation(&suspended(), &confirmation("pay_abc", 4500, PaymentStatus::Failed)),
            ResumeDecision::Abort(_, r) if r == "payment_failed"
        ));
    }
}
