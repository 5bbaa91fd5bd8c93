//! 按工具类别配置的重试策略
//!
//! 对应 config/default.toml 的 [tools.retry.<class>]；未配置的类别使用内置默认值。

use std::time::Duration;

use serde::Deserialize;

use crate::tools::{ToolClass, ToolError};

/// 单个类别的重试策略：最大尝试次数、单次超时、指数退避
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub timeout_ms: u64,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 10_000)
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, timeout_ms: u64) -> Self {
        Self {
            max_attempts,
            timeout_ms,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }

    pub fn for_class(class: ToolClass) -> Self {
        match class {
            ToolClass::Decision => Self::new(2, 20_000),
            ToolClass::Lookup => Self::new(3, 10_000),
            ToolClass::Messaging => Self::new(5, 60_000),
            ToolClass::Payment => Self::new(3, 30_000),
            ToolClass::Shipping => Self::new(5, 60_000),
            ToolClass::Ledger => Self::new(5, 10_000),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// 第 attempt 次失败后的等待时间：base * 2^(attempt-1)，封顶 max_delay；限流时至少等待 retry_after
    pub fn delay_for(&self, attempt: u32, err: &ToolError) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let backoff = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        let delay = match err {
            ToolError::RateLimited { retry_after_ms } => backoff.max(*retry_after_ms),
            _ => backoff,
        };
        Duration::from_millis(delay)
    }
}

fn default_decision() -> RetryPolicy {
    RetryPolicy::for_class(ToolClass::Decision)
}

fn default_lookup() -> RetryPolicy {
    RetryPolicy::for_class(ToolClass::Lookup)
}

fn default_messaging() -> RetryPolicy {
    RetryPolicy::for_class(ToolClass::Messaging)
}

fn default_payment() -> RetryPolicy {
    RetryPolicy::for_class(ToolClass::Payment)
}

fn default_shipping() -> RetryPolicy {
    RetryPolicy::for_class(ToolClass::Shipping)
}

fn default_ledger() -> RetryPolicy {
    RetryPolicy::for_class(ToolClass::Ledger)
}

/// [tools.retry] 段：每个类别一份策略
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RetryPolicies {
    #[serde(default = "default_decision")]
    pub decision: RetryPolicy,
    #[serde(default = "default_lookup")]
    pub lookup: RetryPolicy,
    #[serde(default = "default_messaging")]
    pub messaging: RetryPolicy,
    #[serde(default = "default_payment")]
    pub payment: RetryPolicy,
    #[serde(default = "default_shipping")]
    pub shipping: RetryPolicy,
    #[serde(default = "default_ledger")]
    pub ledger: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            decision: default_decision(),
            lookup: default_lookup(),
            messaging: default_messaging(),
            payment: default_payment(),
            shipping: default_shipping(),
            ledger: default_ledger(),
        }
    }
}

impl RetryPolicies {
    pub fn for_class(&self, class: ToolClass) -> &RetryPolicy {
        match class {
            ToolClass::Decision => &self.decision,
            ToolClass::Lookup => &self.lookup,
            ToolClass::Messaging => &self.messaging,
            ToolClass::Payment => &self.payment,
            ToolClass::Shipping => &self.shipping,
            ToolClass::Ledger => &self.ledger,
        }
    }

    /// 所有类别使用同一份策略（测试里用来压缩超时与退避）
    pub fn uniform(policy: RetryPolicy) -> Self {
        Self {
            decision: policy,
            lookup: policy,
            messaging: policy,
            payment: policy,
            shipping: policy,
            ledger: policy,
        }
    }
}
