//! 策略规则：可配置的容差与确定性的评估引擎

pub mod engine;
pub mod policy;

pub use engine::{CashInputs, CommitInputs, RuleEngine, RuleEvaluation, RuleId, RuleReport, Verdict};
pub use policy::PolicyConfig;
