//! 确定性规则引擎
//!
//! 纯函数：相同策略与输入总是得到相同结论。每条规则都产出一条 RuleEvaluation（供审计），
//! 结论取第一条未通过的规则；所有规则都会被评估，便于事后回放。

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::rules::PolicyConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    /// 入站消息安全过滤
    InboundGuard,
    CostDelta,
    SlaRisk,
    CounterpartyStrikes,
    LedgerDelta,
}

impl RuleId {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleId::InboundGuard => "inbound_guard",
            RuleId::CostDelta => "cost_delta",
            RuleId::SlaRisk => "sla_risk",
            RuleId::CounterpartyStrikes => "counterparty_strikes",
            RuleId::LedgerDelta => "ledger_delta",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单条规则的评估记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEvaluation {
    pub rule: RuleId,
    pub passed: bool,
    pub observed: String,
    pub limit: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Reject { rule: RuleId, reason: String },
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleReport {
    pub verdict: Verdict,
    pub evaluations: Vec<RuleEvaluation>,
}

impl RuleReport {
    fn from_evaluations(evaluations: Vec<RuleEvaluation>) -> Self {
        let verdict = evaluations
            .iter()
            .find(|e| !e.passed)
            .map(|e| Verdict::Reject {
                rule: e.rule,
                reason: format!("{} observed {} exceeds limit {}", e.rule, e.observed, e.limit),
            })
            .unwrap_or(Verdict::Pass);
        Self { verdict, evaluations }
    }
}

/// 承诺前检查的输入
#[derive(Debug, Clone, PartialEq)]
pub struct CommitInputs {
    pub price: Decimal,
    pub budget: Option<Decimal>,
    pub eta_days: Option<u32>,
    pub deadline_days: Option<u32>,
    pub supplier_strikes: u32,
}

/// 账本检查的输入：支付确认的金额与账本在该笔支付引用下记录的合计
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CashInputs {
    pub captured: Decimal,
    pub ledger_balance: Decimal,
}

impl CashInputs {
    pub fn delta(&self) -> Decimal {
        self.ledger_balance - self.captured
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RuleEngine;

impl RuleEngine {
    pub fn new() -> Self {
        Self
    }

    /// 成本、时效、违约三项检查（按此顺序）
    pub fn evaluate_commit(&self, policy: &PolicyConfig, inputs: &CommitInputs) -> RuleReport {
        RuleReport::from_evaluations(vec![
            cost_delta(policy, inputs),
            sla_risk(policy, inputs),
            counterparty(policy, inputs.supplier_strikes),
        ])
    }

    pub fn evaluate_cash(&self, policy: &PolicyConfig, inputs: &CashInputs) -> RuleReport {
        let observed = inputs.delta().abs();
        RuleReport::from_evaluations(vec![RuleEvaluation {
            rule: RuleId::LedgerDelta,
            passed: observed <= policy.max_unapproved_delta,
            observed: observed.to_string(),
            limit: policy.max_unapproved_delta.to_string(),
        }])
    }

    /// 单独的违约检查（供应商筛选用）
    pub fn evaluate_counterparty(&self, policy: &PolicyConfig, strikes: u32) -> RuleEvaluation {
        counterparty(policy, strikes)
    }
}

fn cost_delta(policy: &PolicyConfig, inputs: &CommitInputs) -> RuleEvaluation {
    let limit = Decimal::try_from(policy.max_cost_overrun_pct).unwrap_or(Decimal::ZERO);
    match inputs.budget.filter(|b| *b > Decimal::ZERO) {
        Some(budget) => {
            let overrun_pct = ((inputs.price - budget) / budget * Decimal::ONE_HUNDRED).round_dp(2);
            RuleEvaluation {
                rule: RuleId::CostDelta,
                passed: overrun_pct <= limit,
                observed: format!("{overrun_pct}%"),
                limit: format!("{limit}%"),
            }
        }
        None => RuleEvaluation {
            rule: RuleId::CostDelta,
            passed: true,
            observed: "no budget".to_string(),
            limit: format!("{limit}%"),
        },
    }
}

fn sla_risk(policy: &PolicyConfig, inputs: &CommitInputs) -> RuleEvaluation {
    let limit = format!("{}d", policy.max_sla_slip_days);
    match (inputs.eta_days, inputs.deadline_days) {
        (Some(eta), Some(deadline)) => {
            let slip = i64::from(eta) - i64::from(deadline);
            RuleEvaluation {
                rule: RuleId::SlaRisk,
                passed: slip <= i64::from(policy.max_sla_slip_days),
                observed: format!("{slip}d"),
                limit,
            }
        }
        (None, Some(_)) => RuleEvaluation {
            rule: RuleId::SlaRisk,
            passed: false,
            observed: "unknown eta".to_string(),
            limit,
        },
        _ => RuleEvaluation {
            rule: RuleId::SlaRisk,
            passed: true,
            observed: "no deadline".to_string(),
            limit,
        },
    }
}

fn counterparty(policy: &PolicyConfig, strikes: u32) -> RuleEvaluation {
    RuleEvaluation {
        rule: RuleId::CounterpartyStrikes,
        passed: !policy.is_flagged(strikes),
        observed: strikes.to_string(),
        limit: format!("<{}", policy.strike_threshold),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(price: i64, budget: Option<i64>) -> CommitInputs {
        CommitInputs {
            price: Decimal::from(price),
            budget: budget.map(Decimal::from),
            eta_days: Some(7),
            deadline_days: Some(10),
            supplier_strikes: 0,
        }
    }

    #[test]
    fn test_quote_within_budget_passes() {
        let report = RuleEngine::new().evaluate_commit(&PolicyConfig::default(), &inputs(4500, Some(5000)));
        assert_eq!(report.verdict, Verdict::Pass);
        assert_eq!(report.evaluations.len(), 3);
        assert!(report.evaluations.iter().all(|e| e.passed));
    }

    #[test]
    fn test_overrun_rejected_by_cost_rule() {
        let report = RuleEngine::new().evaluate_commit(&PolicyConfig::default(), &inputs(7000, Some(5000)));
        match &report.verdict {
            Verdict::Reject { rule, reason } => {
                assert_eq!(*rule, RuleId::CostDelta);
                assert!(reason.contains("40"));
            }
            other => panic!("Expected Reject, got {other:?}"),
        }
        assert!(report.evaluations[0].observed.starts_with("40"));
    }

    #[test]
    fn test_tolerance_allows_small_overrun() {
        let policy = PolicyConfig {
            max_cost_overrun_pct: 10.0,
            ..Default::default()
        };
        let report = RuleEngine::new().evaluate_commit(&policy, &inputs(5400, Some(5000)));
        assert!(report.verdict.is_pass());
    }

    #[test]
    fn test_first_failing_rule_wins() {
        let mut i = inputs(7000, Some(5000));
        i.eta_days = Some(20);
        i.supplier_strikes = 5;
        let report = RuleEngine::new().evaluate_commit(&PolicyConfig::default(), &i);
        assert!(matches!(report.verdict, Verdict::Reject { rule: RuleId::CostDelta, .. }));
        assert_eq!(report.evaluations.iter().filter(|e| !e.passed).count(), 3);
    }

    #[test]
    fn test_sla_and_strikes() {
        let engine = RuleEngine::new();
        let policy = PolicyConfig::default();
        let mut late = inputs(100, None);
        late.eta_days = Some(12);
        assert!(matches!(
            engine.evaluate_commit(&policy, &late).verdict,
            Verdict::Reject { rule: RuleId::SlaRisk, .. }
        ));

        let mut flagged = inputs(100, None);
        flagged.supplier_strikes = 3;
        assert!(matches!(
            engine.evaluate_commit(&policy, &flagged).verdict,
            Verdict::Reject { rule: RuleId::CounterpartyStrikes, .. }
        ));
    }

    #[test]
    fn test_cash_delta_threshold() {
        let engine = RuleEngine::new();
        let policy = PolicyConfig::default();
        let cash = |captured: i64, ledger_balance: i64| CashInputs {
            captured: Decimal::from(captured),
            ledger_balance: Decimal::from(ledger_balance),
        };
        let settled = engine.evaluate_cash(&policy, &cash(4500, 4500));
        assert!(settled.verdict.is_pass());
        assert_eq!(settled.evaluations[0].observed, "0");
        assert!(engine.evaluate_cash(&policy, &cash(4500, 4000)).verdict.is_pass());
        assert!(!engine.evaluate_cash(&policy, &cash(4500, 9000)).verdict.is_pass());
    }

    #[test]
    fn test_deterministic() {
        let engine = RuleEngine::new();
        let policy = PolicyConfig::default();
        let i = inputs(5200, Some(5000));
        assert_eq!(engine.evaluate_commit(&policy, &i), engine.evaluate_commit(&policy, &i));
    }
}
