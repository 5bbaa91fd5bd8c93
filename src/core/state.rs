//! 请求状态：阶段、报价、承诺、账本条目与完整的 RequestState
//!
//! RequestState 是每次阶段执行的唯一输入与输出；Orchestrator 负责版本号推进与持久化，
//! 阶段执行器只返回修改后的副本，绝不原地改动已持久化的状态。

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::PipelineError;

/// 请求 ID（入站消息 ID + 内容摘要，或 uuid）
pub type RequestId = String;

/// 流水线阶段；Fulfilled / Aborted / Failed 为终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Intake,
    Cluster,
    Supplier,
    Commit,
    Ops,
    Cash,
    Learn,
    Fulfilled,
    Aborted,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Fulfilled | Stage::Aborted | Stage::Failed)
    }

    /// 资金已承诺（买家付款已确认）后的阶段，失败只能记为 Failed
    pub fn is_committed(self) -> bool {
        matches!(self, Stage::Ops | Stage::Cash | Stage::Learn)
    }

    /// 合法转移：线性前进，Supplier 可回退到 Cluster，任一非终态可进入 Aborted / Failed
    pub fn allows(self, next: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Stage::Aborted | Stage::Failed) {
            return true;
        }
        matches!(
            (self, next),
            (Stage::Intake, Stage::Cluster)
                | (Stage::Cluster, Stage::Supplier)
                | (Stage::Supplier, Stage::Commit)
                | (Stage::Supplier, Stage::Cluster)
                | (Stage::Commit, Stage::Ops)
                | (Stage::Ops, Stage::Cash)
                | (Stage::Cash, Stage::Learn)
                | (Stage::Learn, Stage::Fulfilled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Intake => "intake",
            Stage::Cluster => "cluster",
            Stage::Supplier => "supplier",
            Stage::Commit => "commit",
            Stage::Ops => "ops",
            Stage::Cash => "cash",
            Stage::Learn => "learn",
            Stage::Fulfilled => "fulfilled",
            Stage::Aborted => "aborted",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 终态结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalOutcome {
    Fulfilled,
    Aborted,
    Failed,
}

impl TerminalOutcome {
    pub fn stage(self) -> Stage {
        match self {
            TerminalOutcome::Fulfilled => Stage::Fulfilled,
            TerminalOutcome::Aborted => Stage::Aborted,
            TerminalOutcome::Failed => Stage::Failed,
        }
    }
}

/// 紧急程度（由关键词或 LLM 抽取）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    #[default]
    Normal,
    High,
    Urgent,
}

impl Urgency {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "urgent" | "critical" | "emergency" => Urgency::Urgent,
            "high" | "priority" => Urgency::High,
            _ => Urgency::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// 规范化后的采购需求；item 与 location 必填
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRequest {
    pub item: String,
    pub quantity: u32,
    pub budget: Option<Decimal>,
    pub location: String,
    pub deadline_days: Option<u32>,
    #[serde(default)]
    pub urgency: Urgency,
}

/// 地理聚类得到的一组候选手工艺人
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtisanCluster {
    pub cluster_id: String,
    pub supplier_ids: Vec<String>,
    pub centroid: GeoPoint,
}

/// 一次联系供应商的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactOutcome {
    /// 公开价目直接查到
    WebListed,
    /// 语音议价成交
    Negotiated,
    Declined,
    NoAnswer,
    /// 两个渠道均重试耗尽
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplierQuote {
    pub supplier_id: String,
    pub price: Option<Decimal>,
    pub eta_days: Option<u32>,
    pub contact_outcome: ContactOutcome,
    /// 第几轮聚类得到的报价（从 0 开始）
    pub round: u32,
}

impl SupplierQuote {
    /// 同时具备价格与交期才算可用报价
    pub fn is_viable(&self) -> bool {
        self.price.is_some() && self.eta_days.is_some()
    }
}

/// 已下发支付链接、等待买家付款的承诺
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCommitment {
    pub quote: SupplierQuote,
    pub amount: Decimal,
    pub currency: String,
    pub payment_reference: String,
    pub payment_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalOrder {
    pub supplier_id: String,
    pub item: String,
    pub quantity: u32,
    pub amount: Decimal,
    /// 支付回调确认的实收金额，Cash 以此对账
    #[serde(default)]
    pub captured_amount: Decimal,
    pub currency: String,
    pub eta_days: Option<u32>,
    pub receipt_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    PaymentReceived,
    SupplierPayable,
    ShippingCost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Approved,
    PendingApproval,
}

/// 账本条目；金额带符号（收入为正，支出为负）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: String,
    pub kind: LedgerKind,
    pub amount: Decimal,
    pub reference: String,
    pub status: LedgerStatus,
    pub recorded_at: DateTime<Utc>,
}

/// 单个采购请求的完整状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestState {
    pub id: RequestId,
    pub stage: Stage,
    /// 每次成功写入严格递增
    pub version: u64,
    pub sender: String,
    pub raw_input: String,
    pub normalized_request: Option<NormalizedRequest>,
    #[serde(default)]
    pub artisan_clusters: Vec<ArtisanCluster>,
    #[serde(default)]
    pub supplier_quotes: Vec<SupplierQuote>,
    #[serde(default)]
    pub recluster_count: u32,
    /// 已联系过的供应商，重新聚类时排除
    #[serde(default)]
    pub excluded_suppliers: Vec<String>,
    #[serde(default)]
    pub strike_count: u32,
    #[serde(default)]
    pub ledger_entries: Vec<LedgerEntry>,
    pub pending_commitment: Option<PendingCommitment>,
    pub final_order: Option<FinalOrder>,
    pub payment_reference: Option<String>,
    pub shipping_label_ref: Option<String>,
    pub tracking_id: Option<String>,
    pub shipping_cost: Option<Decimal>,
    /// 挂起等待外部回调时设置；恢复或终止时清空
    pub suspend_token: Option<String>,
    pub terminal_outcome: Option<TerminalOutcome>,
    pub abort_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RequestState {
    pub fn new(id: impl Into<RequestId>, sender: impl Into<String>, raw_input: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            stage: Stage::Intake,
            version: 0,
            sender: sender.into(),
            raw_input: raw_input.into(),
            normalized_request: None,
            artisan_clusters: Vec::new(),
            supplier_quotes: Vec::new(),
            recluster_count: 0,
            excluded_suppliers: Vec::new(),
            strike_count: 0,
            ledger_entries: Vec::new(),
            pending_commitment: None,
            final_order: None,
            payment_reference: None,
            shipping_label_ref: None,
            tracking_id: None,
            shipping_cost: None,
            suspend_token: None,
            terminal_outcome: None,
            abort_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal_outcome.is_some()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspend_token.is_some()
    }

    pub fn viable_quotes(&self) -> impl Iterator<Item = &SupplierQuote> {
        self.supplier_quotes.iter().filter(|q| q.is_viable())
    }

    /// 同一供应商只保留最后一次完成的联系结果
    pub fn upsert_quote(&mut self, quote: SupplierQuote) {
        match self
            .supplier_quotes
            .iter_mut()
            .find(|q| q.supplier_id == quote.supplier_id)
        {
            Some(existing) => *existing = quote,
            None => self.supplier_quotes.push(quote),
        }
    }

    /// 追加账本条目；entry_id 已存在时忽略并返回 false
    pub fn append_ledger(&mut self, entry: LedgerEntry) -> bool {
        if self.ledger_entries.iter().any(|e| e.entry_id == entry.entry_id) {
            return false;
        }
        self.ledger_entries.push(entry);
        true
    }

    pub fn receipts_total(&self) -> Decimal {
        self.ledger_entries
            .iter()
            .filter(|e| e.kind == LedgerKind::PaymentReceived)
            .map(|e| e.amount)
            .sum()
    }

    /// 外部副作用的幂等键：`{request_id}:{stage}:{version}:{suffix}`
    pub fn idempotency_key(&self, suffix: &str) -> String {
        format!("{}:{}:{}:{}", self.id, self.stage, self.version, suffix)
    }

    /// 前进到 next；不合法的转移返回 IllegalTransition
    pub fn advance_to(&mut self, next: Stage) -> Result<(), PipelineError> {
        if !self.stage.allows(next) {
            return Err(PipelineError::IllegalTransition {
                from: self.stage,
                to: next,
            });
        }
        self.stage = next;
        if next == Stage::Fulfilled {
            self.terminal_outcome = Some(TerminalOutcome::Fulfilled);
        }
        Ok(())
    }

    /// 进入 Aborted / Failed 终态，并清除挂起令牌
    pub fn terminate(&mut self, outcome: TerminalOutcome, reason: impl Into<String>) -> Result<(), PipelineError> {
        let target = outcome.stage();
        if !self.stage.allows(target) {
            return Err(PipelineError::IllegalTransition {
                from: self.stage,
                to: target,
            });
        }
        self.stage = target;
        self.terminal_outcome = Some(outcome);
        self.abort_reason = Some(reason.into());
        self.suspend_token = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(id: &str, price: Option<i64>, eta: Option<u32>, round: u32) -> SupplierQuote {
        SupplierQuote {
            supplier_id: id.to_string(),
            price: price.map(Decimal::from),
            eta_days: eta,
            contact_outcome: ContactOutcome::WebListed,
            round,
        }
    }

    #[test]
    fn test_stage_transitions() {
        assert!(Stage::Intake.allows(Stage::Cluster));
        assert!(Stage::Supplier.allows(Stage::Cluster));
        assert!(Stage::Commit.allows(Stage::Aborted));
        assert!(!Stage::Cluster.allows(Stage::Intake));
        assert!(!Stage::Ops.allows(Stage::Commit));
        assert!(!Stage::Fulfilled.allows(Stage::Failed));
        assert!(!Stage::Aborted.allows(Stage::Aborted));
    }

    #[test]
    fn test_advance_rejects_skipping_stage() {
        let mut state = RequestState::new("r1", "s", "pots");
        let err = state.advance_to(Stage::Commit).unwrap_err();
        assert!(matches!(err, PipelineError::IllegalTransition { .. }));
        assert_eq!(state.stage, Stage::Intake);
    }

    #[test]
    fn test_fulfilled_sets_terminal_outcome() {
        let mut state = RequestState::new("r1", "s", "pots");
        state.stage = Stage::Learn;
        state.advance_to(Stage::Fulfilled).unwrap();
        assert_eq!(state.terminal_outcome, Some(TerminalOutcome::Fulfilled));
        assert!(state.is_terminal());
    }

    #[test]
    fn test_terminate_clears_suspend_token() {
        let mut state = RequestState::new("r1", "s", "pots");
        state.stage = Stage::Commit;
        state.suspend_token = Some("tok".to_string());
        state.terminate(TerminalOutcome::Aborted, "payment_expired").unwrap();
        assert_eq!(state.stage, Stage::Aborted);
        assert!(!state.is_suspended());
        assert_eq!(state.abort_reason.as_deref(), Some("payment_expired"));
        assert!(state.terminate(TerminalOutcome::Failed, "again").is_err());
    }

    #[test]
    fn test_upsert_quote_last_writer_wins() {
        let mut state = RequestState::new("r1", "s", "pots");
        state.upsert_quote(quote("a", None, None, 0));
        state.upsert_quote(quote("b", Some(100), Some(3), 0));
        state.upsert_quote(quote("a", Some(90), Some(5), 1));
        assert_eq!(state.supplier_quotes.len(), 2);
        assert_eq!(state.supplier_quotes[0].price, Some(Decimal::from(90)));
        assert_eq!(state.viable_quotes().count(), 2);
    }

    #[test]
    fn test_append_ledger_dedupes_by_entry_id() {
        let mut state = RequestState::new("r1", "s", "pots");
        let entry = LedgerEntry {
            entry_id: "e1".to_string(),
            kind: LedgerKind::PaymentReceived,
            amount: Decimal::from(4500),
            reference: "pay".to_string(),
            status: LedgerStatus::Approved,
            recorded_at: Utc::now(),
        };
        assert!(state.append_ledger(entry.clone()));
        assert!(!state.append_ledger(entry));
        assert_eq!(state.receipts_total(), Decimal::from(4500));
    }

    #[test]
    fn test_idempotency_key_format() {
        let mut state = RequestState::new("m1-abc", "s", "pots");
        state.stage = Stage::Commit;
        state.version = 4;
        assert_eq!(state.idempotency_key("payment"), "m1-abc:commit:4:payment");
    }
}
