//! 外部工具的请求 / 响应契约与工具名常量
//!
//! 阶段代码经 `ToolGateway::call` 使用这些类型；模拟实现与真实适配器共享同一份契约。

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::state::{FinalOrder, GeoPoint, LedgerEntry};

pub const LLM_DECIDE: &str = "llm_decide";
pub const GEOCLUSTER: &str = "geocluster";
pub const PRICE_LOOKUP: &str = "price_lookup";
pub const VOICE_NEGOTIATE: &str = "voice_negotiate";
pub const NOTIFY: &str = "notify";
pub const PAYMENT_CREATE: &str = "payment_create";
pub const SHIPMENT_CREATE: &str = "shipment_create";
pub const DELIVERY_STATUS: &str = "delivery_status";
pub const LEDGER_APPEND: &str = "ledger_append";
pub const RELIABILITY_UPDATE: &str = "reliability_update";
pub const RELIABILITY_LOOKUP: &str = "reliability_lookup";
pub const STRIKE_REGISTER: &str = "strike_register";
pub const STRIKE_LOOKUP: &str = "strike_lookup";

/// 需要 LLM 完成的结构化任务
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionTask {
    ExtractRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub task: DecisionTask,
    pub input: String,
    /// 期望输出的 JSON Schema
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRequest {
    pub location: String,
    pub item: String,
    pub radius_km: f64,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterGroup {
    pub cluster_id: String,
    pub supplier_ids: Vec<String>,
    pub centroid: GeoPoint,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterResponse {
    pub clusters: Vec<ClusterGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceLookupRequest {
    pub supplier_id: String,
    pub item: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceLookupResponse {
    pub price: Option<Decimal>,
    pub eta_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationRequest {
    pub supplier_id: String,
    pub item: String,
    pub quantity: u32,
    pub target_price: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NegotiationResponse {
    /// 对方是否接听
    pub answered: bool,
    pub accepted: bool,
    pub price: Option<Decimal>,
    pub eta_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyRequest {
    pub to: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyResponse {
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: Decimal,
    pub currency: String,
    /// 支付回调会原样带回此引用
    pub reference: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentLink {
    pub payment_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentRequest {
    pub order: FinalOrder,
    pub destination: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentResponse {
    pub label_ref: String,
    pub tracking_id: String,
    pub cost: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryStatusRequest {
    pub tracking_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryStatus {
    pub delivered: bool,
    pub on_time: bool,
    #[serde(default)]
    pub quality_flags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerAppendRequest {
    pub entry: LedgerEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerAppendResponse {
    /// 同一 entry_id 重复提交时为 false
    pub appended: bool,
    /// 账本中该 entry_id 实际记录的金额（重复提交时为先前记录的金额）
    pub recorded_amount: Decimal,
    /// 账本中同一 reference 下所有条目的合计
    pub reference_balance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreUpdateRequest {
    pub supplier_id: String,
    pub delta: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreUpdateResponse {
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreLookupRequest {
    pub supplier_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreLookupResponse {
    pub scores: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrikeRegisterRequest {
    pub supplier_id: String,
    pub request_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrikeStatus {
    pub supplier_id: String,
    pub strikes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrikeLookupRequest {
    pub supplier_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrikeLookupResponse {
    pub strikes: HashMap<String, u32>,
}
