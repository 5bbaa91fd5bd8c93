//! 规则抽取客户端：不调用任何模型，用正则从消息中抽取数量、商品、地点、预算、期限与紧急程度
//!
//! 输出与真实模型相同的 JSON，供演示程序与离线环境使用。

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::core::state::Urgency;
use crate::llm::{last_user_message, LlmClient, LlmError, Message};
use crate::tools::schema::ExtractionContract;

static QUANTITY_ITEM_RE: OnceLock<Regex> = OnceLock::new();
static LOCATION_RE: OnceLock<Regex> = OnceLock::new();
static BUDGET_RE: OnceLock<Regex> = OnceLock::new();
static DEADLINE_RE: OnceLock<Regex> = OnceLock::new();

/// 紧接数字出现但不是商品名的词
const NON_ITEM_WORDS: &[&str] = &["rs", "rupees", "inr", "days", "day", "weeks", "km"];

#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicLlmClient;

impl HeuristicLlmClient {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(text: &str) -> ExtractionContract {
        let quantity_item = QUANTITY_ITEM_RE.get_or_init(|| {
            Regex::new(
                r"(?i)\b(\d{1,6})\s+([a-z][a-z ]*?[a-z])(?:\s+(?:in|at|near|for|under|within|by|delivered|to|budget)\b|\s*[,.;!]|\s*$)",
            )
            .unwrap()
        });
        let location = LOCATION_RE.get_or_init(|| {
            Regex::new(r"\b(?:in|at|near|to)\s+([A-Z][A-Za-z]+(?:\s+[A-Z][A-Za-z]+)*)").unwrap()
        });
        let budget = BUDGET_RE.get_or_init(|| {
            Regex::new(
                r"(?i)(?:(?:under|below|budget(?:\s+of)?|up\s*to|max(?:imum)?)\s*(?:rs\.?|inr|₹)?\s*(\d[\d,]*(?:\.\d+)?))|(?:(?:rs\.?|inr|₹)\s*(\d[\d,]*(?:\.\d+)?))|(?:(\d[\d,]*(?:\.\d+)?)\s*(?:rs|rupees|inr)\b)",
            )
            .unwrap()
        });
        let deadline = DEADLINE_RE.get_or_init(|| {
            Regex::new(r"(?i)\b(?:within|in|by)\s+(\d{1,3})\s*days?\b").unwrap()
        });

        let (quantity, item) = quantity_item
            .captures_iter(text)
            .filter_map(|c| {
                let item = c.get(2)?.as_str().trim().to_lowercase();
                let first = item.split_whitespace().next()?;
                if NON_ITEM_WORDS.contains(&first) {
                    return None;
                }
                let qty = c.get(1)?.as_str().parse::<u32>().ok()?;
                Some((Some(qty), Some(item)))
            })
            .next()
            .unwrap_or((None, None));

        let budget = budget.captures(text).and_then(|c| {
            let raw = c.get(1).or_else(|| c.get(2)).or_else(|| c.get(3))?.as_str();
            raw.replace(',', "").parse::<f64>().ok()
        });

        ExtractionContract {
            item,
            quantity,
            budget,
            location: location
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string()),
            deadline_days: deadline
                .captures(text)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok()),
            urgency: Some(
                match detect_urgency(text) {
                    Urgency::Urgent => "urgent",
                    Urgency::High => "high",
                    Urgency::Normal => "normal",
                }
                .to_string(),
            ),
        }
    }
}

fn detect_urgency(text: &str) -> Urgency {
    let lower = text.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    if has(&["urgent", "asap", "immediately", "emergency", "critical"]) {
        Urgency::Urgent
    } else if has(&["soon", "quickly", "fast", "priority"]) {
        Urgency::High
    } else {
        Urgency::Normal
    }
}

#[async_trait]
impl LlmClient for HeuristicLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let text = last_user_message(messages).unwrap_or_default();
        serde_json::to_string(&Self::extract(text)).map_err(|e| LlmError::ApiError(e.to_string()))
    }
}
