//! [policy] 段：成本、时效、违约与账本容差

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// 报价超出预算的百分比上限（0 表示不得超预算）
    #[serde(default = "default_max_cost_overrun_pct")]
    pub max_cost_overrun_pct: f64,
    /// 交期晚于期望期限的天数上限
    #[serde(default)]
    pub max_sla_slip_days: u32,
    /// 违约次数达到此值的供应商被标记，不再联系
    #[serde(default = "default_strike_threshold")]
    pub strike_threshold: u32,
    /// 单个请求净现金变动超过此值需人工审批
    #[serde(default = "default_max_unapproved_delta")]
    pub max_unapproved_delta: Decimal,
}

fn default_max_cost_overrun_pct() -> f64 {
    0.0
}

fn default_strike_threshold() -> u32 {
    3
}

fn default_max_unapproved_delta() -> Decimal {
    Decimal::from(500)
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_cost_overrun_pct: default_max_cost_overrun_pct(),
            max_sla_slip_days: 0,
            strike_threshold: default_strike_threshold(),
            max_unapproved_delta: default_max_unapproved_delta(),
        }
    }
}

impl PolicyConfig {
    pub fn is_flagged(&self, strikes: u32) -> bool {
        strikes >= self.strike_threshold
    }
}
