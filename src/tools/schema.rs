//! 需求抽取 JSON Schema（schemars 自动生成）
//!
//! 注入 llm_decide 的 system prompt，约束 LLM 只输出合法的抽取结果。

use rust_decimal::Decimal;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use crate::core::state::{NormalizedRequest, Urgency};
use crate::core::PipelineError;

/// LLM 抽取结果；字段均可缺省，由 normalize 校验必填项
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractionContract {
    /// 需要采购的商品，如 "clay pots"
    pub item: Option<String>,
    /// 数量，缺省为 1
    pub quantity: Option<u32>,
    /// 总预算（INR）
    pub budget: Option<f64>,
    /// 交付城市或地址
    pub location: Option<String>,
    /// 期望在多少天内交付
    pub deadline_days: Option<u32>,
    /// normal / high / urgent
    pub urgency: Option<String>,
}

impl ExtractionContract {
    /// 校验必填项（item、location）并转换为 NormalizedRequest
    pub fn normalize(self) -> Result<NormalizedRequest, PipelineError> {
        let item = non_empty(self.item);
        let location = non_empty(self.location);
        let (Some(item), Some(location)) = (item, location) else {
            return Err(PipelineError::Validation("incomplete_request".to_string()));
        };
        let budget = match self.budget {
            Some(b) if b.is_finite() && b > 0.0 => Some(
                Decimal::try_from(b)
                    .map_err(|e| PipelineError::Validation(format!("invalid budget: {e}")))?
                    .round_dp(2),
            ),
            _ => None,
        };
        Ok(NormalizedRequest {
            item,
            quantity: self.quantity.filter(|q| *q > 0).unwrap_or(1),
            budget,
            location,
            deadline_days: self.deadline_days,
            urgency: self.urgency.as_deref().map(Urgency::parse).unwrap_or_default(),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// 抽取结果的 JSON Schema
pub fn extraction_schema() -> serde_json::Value {
    serde_json::to_value(schema_for!(ExtractionContract)).unwrap_or(serde_json::Value::Null)
}
