//! 模拟外部协作方（无需任何真实 API）
//!
//! 每个模拟实现都遵守与真实适配器相同的契约：支付、物流、账本、信誉与违约登记按幂等键去重，
//! 信誉分通过 compare-and-set 更新。SimulatedWorld 把它们组装成一个可直接注册的 ToolRegistry，
//! 演示程序与集成测试都使用它；FlakyTool 用于注入失败。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::core::state::{GeoPoint, LedgerEntry};
use crate::llm::{DecisionTool, LlmClient};
use crate::tools::contracts::*;
use crate::tools::{ExternalTool, ToolCall, ToolClass, ToolError, ToolRegistry};

fn parse<T: DeserializeOwned>(call: &ToolCall) -> Result<T, ToolError> {
    serde_json::from_value(call.payload.clone()).map_err(|e| ToolError::InvalidPayload(e.to_string()))
}

fn reply<T: Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::InvalidPayload(e.to_string()))
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, ToolError> {
    mutex.lock().map_err(|_| ToolError::Remote {
        code: 500,
        message: "simulated backend poisoned".to_string(),
    })
}

/// 地理聚类：每个簇带一个「出现半径」，搜索半径达到该值才会返回（重新聚类扩大半径可找到更远的簇）
#[derive(Debug, Default)]
pub struct SimulatedGeocluster {
    rings: RwLock<Vec<(f64, ClusterGroup)>>,
}

impl SimulatedGeocluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cluster(&self, min_radius_km: f64, group: ClusterGroup) {
        if let Ok(mut rings) = self.rings.write() {
            rings.push((min_radius_km, group));
        }
    }
}

#[async_trait]
impl ExternalTool for SimulatedGeocluster {
    fn name(&self) -> &str {
        GEOCLUSTER
    }

    fn class(&self) -> ToolClass {
        ToolClass::Lookup
    }

    async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let req: ClusterRequest = parse(call)?;
        let rings = self.rings.read().map_err(|_| ToolError::Remote {
            code: 500,
            message: "geocluster poisoned".to_string(),
        })?;
        let clusters = rings
            .iter()
            .filter(|(radius, _)| *radius <= req.radius_km)
            .filter_map(|(_, group)| {
                let supplier_ids: Vec<String> = group
                    .supplier_ids
                    .iter()
                    .filter(|id| !req.exclude.contains(id))
                    .cloned()
                    .collect();
                (!supplier_ids.is_empty()).then(|| ClusterGroup {
                    supplier_ids,
                    ..group.clone()
                })
            })
            .collect();
        reply(&ClusterResponse { clusters })
    }
}

/// 供应商在语音外呼中的表现
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceBehaviour {
    Accept { price: Decimal, eta_days: u32 },
    Decline,
    NoAnswer,
    /// 外呼通道持续超时
    Unreachable,
}

#[derive(Debug, Clone)]
struct SupplierProfile {
    listing: Option<(Decimal, u32)>,
    voice: VoiceBehaviour,
}

/// 供应商名录：公开价目与语音外呼行为；价格为整单总价
#[derive(Debug, Default)]
pub struct SupplierBook {
    profiles: RwLock<HashMap<String, SupplierProfile>>,
}

impl SupplierBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// 有公开价目的供应商
    pub fn listed(&self, supplier_id: &str, price: Decimal, eta_days: u32) {
        self.upsert(supplier_id, |p| p.listing = Some((price, eta_days)));
    }

    /// 无公开价目，仅能外呼
    pub fn voice(&self, supplier_id: &str, behaviour: VoiceBehaviour) {
        self.upsert(supplier_id, |p| p.voice = behaviour.clone());
    }

    fn upsert(&self, supplier_id: &str, f: impl FnOnce(&mut SupplierProfile)) {
        if let Ok(mut profiles) = self.profiles.write() {
            let profile = profiles
                .entry(supplier_id.to_string())
                .or_insert_with(|| SupplierProfile {
                    listing: None,
                    voice: VoiceBehaviour::NoAnswer,
                });
            f(profile);
        }
    }

    fn profile(&self, supplier_id: &str) -> Option<SupplierProfile> {
        self.profiles.read().ok()?.get(supplier_id).cloned()
    }
}

/// 公开价目查询
pub struct PriceLookupTool {
    book: Arc<SupplierBook>,
}

impl PriceLookupTool {
    pub fn new(book: Arc<SupplierBook>) -> Self {
        Self { book }
    }
}

#[async_trait]
impl ExternalTool for PriceLookupTool {
    fn name(&self) -> &str {
        PRICE_LOOKUP
    }

    fn class(&self) -> ToolClass {
        ToolClass::Lookup
    }

    async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let req: PriceLookupRequest = parse(call)?;
        let listing = self.book.profile(&req.supplier_id).and_then(|p| p.listing);
        reply(&PriceLookupResponse {
            price: listing.map(|(price, _)| price),
            eta_days: listing.map(|(_, eta)| eta),
        })
    }
}

/// 语音外呼议价
pub struct VoiceNegotiationTool {
    book: Arc<SupplierBook>,
}

impl VoiceNegotiationTool {
    pub fn new(book: Arc<SupplierBook>) -> Self {
        Self { book }
    }
}

#[async_trait]
impl ExternalTool for VoiceNegotiationTool {
    fn name(&self) -> &str {
        VOICE_NEGOTIATE
    }

    fn class(&self) -> ToolClass {
        ToolClass::Messaging
    }

    async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let req: NegotiationRequest = parse(call)?;
        let behaviour = self
            .book
            .profile(&req.supplier_id)
            .map(|p| p.voice)
            .unwrap_or(VoiceBehaviour::NoAnswer);
        let response = match behaviour {
            VoiceBehaviour::Accept { price, eta_days } => NegotiationResponse {
                answered: true,
                accepted: true,
                price: Some(price),
                eta_days: Some(eta_days),
            },
            VoiceBehaviour::Decline => NegotiationResponse {
                answered: true,
                ..Default::default()
            },
            VoiceBehaviour::NoAnswer => NegotiationResponse::default(),
            VoiceBehaviour::Unreachable => return Err(ToolError::Timeout),
        };
        reply(&response)
    }
}

/// 记录所有下发的通知
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<NotifyRequest>>,
    counter: AtomicU64,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<NotifyRequest> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ExternalTool for RecordingNotifier {
    fn name(&self) -> &str {
        NOTIFY
    }

    fn class(&self) -> ToolClass {
        ToolClass::Messaging
    }

    async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let req: NotifyRequest = parse(call)?;
        lock(&self.sent)?.push(req);
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        reply(&NotifyResponse {
            message_id: format!("msg-{n:06}"),
        })
    }
}

/// 支付链接：同一幂等键只创建一次
#[derive(Debug, Default)]
pub struct SimulatedPayments {
    links: Mutex<HashMap<String, PaymentLink>>,
    created: Mutex<Vec<PaymentRequest>>,
}

impl SimulatedPayments {
    pub fn new() -> Self {
        Self::default()
    }

    /// 实际创建过的支付单（不含幂等重放）
    pub fn created(&self) -> Vec<PaymentRequest> {
        self.created.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ExternalTool for SimulatedPayments {
    fn name(&self) -> &str {
        PAYMENT_CREATE
    }

    fn class(&self) -> ToolClass {
        ToolClass::Payment
    }

    async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let req: PaymentRequest = parse(call)?;
        if req.amount <= Decimal::ZERO {
            return Err(ToolError::Remote {
                code: 400,
                message: "amount must be positive".to_string(),
            });
        }
        let mut links = lock(&self.links)?;
        if let Some(existing) = links.get(&call.idempotency_key) {
            return reply(existing);
        }
        let link = PaymentLink {
            payment_url: format!("https://pay.example.test/l/{}", req.reference),
        };
        links.insert(call.idempotency_key.clone(), link.clone());
        lock(&self.created)?.push(req);
        reply(&link)
    }
}

/// 物流下单：固定运费，同一幂等键返回同一运单
#[derive(Debug)]
pub struct SimulatedShipping {
    cost: RwLock<Decimal>,
    shipments: Mutex<HashMap<String, ShipmentResponse>>,
    counter: AtomicU64,
}

impl SimulatedShipping {
    pub fn new(cost: Decimal) -> Self {
        Self {
            cost: RwLock::new(cost),
            shipments: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(1),
        }
    }

    pub fn set_cost(&self, cost: Decimal) {
        if let Ok(mut c) = self.cost.write() {
            *c = cost;
        }
    }

    pub fn shipment_count(&self) -> usize {
        self.shipments.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ExternalTool for SimulatedShipping {
    fn name(&self) -> &str {
        SHIPMENT_CREATE
    }

    fn class(&self) -> ToolClass {
        ToolClass::Shipping
    }

    async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let req: ShipmentRequest = parse(call)?;
        let mut shipments = lock(&self.shipments)?;
        if let Some(existing) = shipments.get(&call.idempotency_key) {
            return reply(existing);
        }
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let cost = self.cost.read().map(|c| *c).unwrap_or_default();
        let shipment = ShipmentResponse {
            label_ref: format!("label-{}-{n:05}", req.order.supplier_id),
            tracking_id: format!("TRK{n:08}"),
            cost,
        };
        shipments.insert(call.idempotency_key.clone(), shipment.clone());
        reply(&shipment)
    }
}

/// 交付状态查询
#[derive(Debug)]
pub struct SimulatedDelivery {
    status: RwLock<DeliveryStatus>,
}

impl Default for SimulatedDelivery {
    fn default() -> Self {
        Self::new(DeliveryStatus {
            delivered: true,
            on_time: true,
            quality_flags: Vec::new(),
        })
    }
}

impl SimulatedDelivery {
    pub fn new(status: DeliveryStatus) -> Self {
        Self {
            status: RwLock::new(status),
        }
    }

    pub fn set_status(&self, status: DeliveryStatus) {
        if let Ok(mut s) = self.status.write() {
            *s = status;
        }
    }
}

#[async_trait]
impl ExternalTool for SimulatedDelivery {
    fn name(&self) -> &str {
        DELIVERY_STATUS
    }

    fn class(&self) -> ToolClass {
        ToolClass::Lookup
    }

    async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let _req: DeliveryStatusRequest = parse(call)?;
        let status = self
            .status
            .read()
            .map(|s| s.clone())
            .map_err(|_| ToolError::Remote {
                code: 500,
                message: "delivery poisoned".to_string(),
            })?;
        reply(&status)
    }
}

/// 只追加账本：entry_id 重复时不再写入
#[derive(Debug, Default)]
pub struct SimulatedLedger {
    entries: Mutex<Vec<LedgerEntry>>,
}

impl SimulatedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// 直接写入一条条目（模拟其他系统同步进来的记录）
    pub fn preload(&self, entry: LedgerEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

#[async_trait]
impl ExternalTool for SimulatedLedger {
    fn name(&self) -> &str {
        LEDGER_APPEND
    }

    fn class(&self) -> ToolClass {
        ToolClass::Ledger
    }

    async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let req: LedgerAppendRequest = parse(call)?;
        let mut entries = lock(&self.entries)?;
        let existing = entries
            .iter()
            .find(|e| e.entry_id == req.entry.entry_id)
            .map(|e| e.amount);
        let appended = existing.is_none();
        let recorded_amount = existing.unwrap_or(req.entry.amount);
        let reference = req.entry.reference.clone();
        if appended {
            entries.push(req.entry);
        }
        let reference_balance = entries
            .iter()
            .filter(|e| e.reference == reference)
            .map(|e| e.amount)
            .sum();
        reply(&LedgerAppendResponse {
            appended,
            recorded_amount,
            reference_balance,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Score {
    value: f64,
    version: u64,
}

/// 共享的供应商信誉表：读写通过 compare-and-set
#[derive(Debug, Default)]
pub struct ReliabilityBoard {
    scores: Mutex<HashMap<String, Score>>,
    applied_keys: Mutex<HashSet<String>>,
}

impl ReliabilityBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, supplier_id: &str, value: f64) {
        if let Ok(mut scores) = self.scores.lock() {
            scores.insert(supplier_id.to_string(), Score { value, version: 0 });
        }
    }

    pub fn score(&self, supplier_id: &str) -> f64 {
        self.read(supplier_id).0
    }

    /// (分值, 版本)
    fn read(&self, supplier_id: &str) -> (f64, u64) {
        self.scores
            .lock()
            .ok()
            .and_then(|s| s.get(supplier_id).copied())
            .map(|s| (s.value, s.version))
            .unwrap_or((0.0, 0))
    }

    /// 版本匹配时写入新分值并返回 true
    pub fn compare_and_set(&self, supplier_id: &str, expected_version: u64, value: f64) -> bool {
        let Ok(mut scores) = self.scores.lock() else {
            return false;
        };
        let current = scores.entry(supplier_id.to_string()).or_default();
        if current.version != expected_version {
            return false;
        }
        *current = Score {
            value,
            version: expected_version + 1,
        };
        true
    }

    fn apply_delta(&self, supplier_id: &str, delta: f64) -> f64 {
        loop {
            let (value, version) = self.read(supplier_id);
            let next = value + delta;
            if self.compare_and_set(supplier_id, version, next) {
                return next;
            }
        }
    }
}

pub struct ReliabilityUpdateTool {
    board: Arc<ReliabilityBoard>,
}

impl ReliabilityUpdateTool {
    pub fn new(board: Arc<ReliabilityBoard>) -> Self {
        Self { board }
    }
}

#[async_trait]
impl ExternalTool for ReliabilityUpdateTool {
    fn name(&self) -> &str {
        RELIABILITY_UPDATE
    }

    fn class(&self) -> ToolClass {
        ToolClass::Ledger
    }

    async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let req: ScoreUpdateRequest = parse(call)?;
        let first_time = lock(&self.board.applied_keys)?.insert(call.idempotency_key.clone());
        let score = if first_time {
            self.board.apply_delta(&req.supplier_id, req.delta)
        } else {
            self.board.score(&req.supplier_id)
        };
        reply(&ScoreUpdateResponse { score })
    }
}

pub struct ReliabilityLookupTool {
    board: Arc<ReliabilityBoard>,
}

impl ReliabilityLookupTool {
    pub fn new(board: Arc<ReliabilityBoard>) -> Self {
        Self { board }
    }
}

#[async_trait]
impl ExternalTool for ReliabilityLookupTool {
    fn name(&self) -> &str {
        RELIABILITY_LOOKUP
    }

    fn class(&self) -> ToolClass {
        ToolClass::Lookup
    }

    async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let req: ScoreLookupRequest = parse(call)?;
        let scores = req
            .supplier_ids
            .into_iter()
            .map(|id| {
                let score = self.board.score(&id);
                (id, score)
            })
            .collect();
        reply(&ScoreLookupResponse { scores })
    }
}

/// 违约登记表：同一 (请求, 供应商) 只记一次
#[derive(Debug, Default)]
pub struct StrikeRegistry {
    strikes: Mutex<HashMap<String, u32>>,
    seen: Mutex<HashSet<(String, String)>>,
}

impl StrikeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strikes(&self, supplier_id: &str) -> u32 {
        self.strikes
            .lock()
            .ok()
            .and_then(|s| s.get(supplier_id).copied())
            .unwrap_or(0)
    }

    pub fn seed(&self, supplier_id: &str, strikes: u32) {
        if let Ok(mut s) = self.strikes.lock() {
            s.insert(supplier_id.to_string(), strikes);
        }
    }
}

pub struct StrikeRegisterTool {
    registry: Arc<StrikeRegistry>,
}

impl StrikeRegisterTool {
    pub fn new(registry: Arc<StrikeRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ExternalTool for StrikeRegisterTool {
    fn name(&self) -> &str {
        STRIKE_REGISTER
    }

    fn class(&self) -> ToolClass {
        ToolClass::Ledger
    }

    async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let req: StrikeRegisterRequest = parse(call)?;
        let first_time = lock(&self.registry.seen)?.insert((req.request_id.clone(), req.supplier_id.clone()));
        let mut strikes = lock(&self.registry.strikes)?;
        let count = strikes.entry(req.supplier_id.clone()).or_insert(0);
        if first_time {
            *count += 1;
        }
        reply(&StrikeStatus {
            supplier_id: req.supplier_id,
            strikes: *count,
        })
    }
}

pub struct StrikeLookupTool {
    registry: Arc<StrikeRegistry>,
}

impl StrikeLookupTool {
    pub fn new(registry: Arc<StrikeRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ExternalTool for StrikeLookupTool {
    fn name(&self) -> &str {
        STRIKE_LOOKUP
    }

    fn class(&self) -> ToolClass {
        ToolClass::Lookup
    }

    async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let req: StrikeLookupRequest = parse(call)?;
        let strikes = req
            .supplier_ids
            .into_iter()
            .map(|id| {
                let n = self.registry.strikes(&id);
                (id, n)
            })
            .collect();
        reply(&StrikeLookupResponse { strikes })
    }
}

/// 故障注入：前 N 次调用返回指定错误，之后转交内部工具
pub struct FlakyTool {
    inner: Arc<dyn ExternalTool>,
    remaining: AtomicU32,
    error: ToolError,
    calls: AtomicU32,
}

impl FlakyTool {
    pub fn new(inner: Arc<dyn ExternalTool>, failures: u32, error: ToolError) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(failures),
            error,
            calls: AtomicU32::new(0),
        }
    }

    /// 永远失败
    pub fn always(inner: Arc<dyn ExternalTool>, error: ToolError) -> Self {
        Self::new(inner, u32::MAX, error)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExternalTool for FlakyTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn class(&self) -> ToolClass {
        self.inner.class()
    }

    async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(self.error.clone());
        }
        self.inner.invoke(call).await
    }
}

/// 一整套模拟协作方，保留各自句柄便于检查副作用
pub struct SimulatedWorld {
    pub geocluster: Arc<SimulatedGeocluster>,
    pub suppliers: Arc<SupplierBook>,
    pub notifier: Arc<RecordingNotifier>,
    pub payments: Arc<SimulatedPayments>,
    pub shipping: Arc<SimulatedShipping>,
    pub delivery: Arc<SimulatedDelivery>,
    pub ledger: Arc<SimulatedLedger>,
    pub reliability: Arc<ReliabilityBoard>,
    pub strikes: Arc<StrikeRegistry>,
}

impl Default for SimulatedWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedWorld {
    /// 空世界：没有任何供应商，运费 150
    pub fn new() -> Self {
        Self {
            geocluster: Arc::new(SimulatedGeocluster::new()),
            suppliers: Arc::new(SupplierBook::new()),
            notifier: Arc::new(RecordingNotifier::new()),
            payments: Arc::new(SimulatedPayments::new()),
            shipping: Arc::new(SimulatedShipping::new(Decimal::from(150))),
            delivery: Arc::new(SimulatedDelivery::default()),
            ledger: Arc::new(SimulatedLedger::new()),
            reliability: Arc::new(ReliabilityBoard::new()),
            strikes: Arc::new(StrikeRegistry::new()),
        }
    }

    /// 演示数据：斋浦尔近郊两个陶艺簇，100km 外还有一个备用簇
    pub fn demo() -> Self {
        let world = Self::new();
        world.geocluster.add_cluster(
            0.0,
            ClusterGroup {
                cluster_id: "jaipur-north".to_string(),
                supplier_ids: vec!["artisan-amer-01".to_string(), "artisan-amer-02".to_string()],
                centroid: GeoPoint { lat: 26.98, lon: 75.85 },
            },
        );
        world.geocluster.add_cluster(
            0.0,
            ClusterGroup {
                cluster_id: "jaipur-south".to_string(),
                supplier_ids: vec!["artisan-sanganer-03".to_string()],
                centroid: GeoPoint { lat: 26.82, lon: 75.80 },
            },
        );
        world.geocluster.add_cluster(
            100.0,
            ClusterGroup {
                cluster_id: "ajmer".to_string(),
                supplier_ids: vec!["artisan-ajmer-04".to_string()],
                centroid: GeoPoint { lat: 26.45, lon: 74.64 },
            },
        );
        world.suppliers.listed("artisan-amer-01", Decimal::from(4500), 7);
        world.suppliers.voice(
            "artisan-amer-02",
            VoiceBehaviour::Accept {
                price: Decimal::from(4800),
                eta_days: 6,
            },
        );
        world.suppliers.voice("artisan-sanganer-03", VoiceBehaviour::NoAnswer);
        world.suppliers.listed("artisan-ajmer-04", Decimal::from(4300), 12);
        world.reliability.seed("artisan-amer-01", 2.0);
        world.reliability.seed("artisan-amer-02", 1.0);
        world
    }

    /// 按工具名组装注册表；llm_decide 使用传入的 LLM 客户端
    pub fn registry(&self, llm: Arc<dyn LlmClient>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(DecisionTool::new(llm));
        registry.register_arc(self.geocluster.clone());
        registry.register(PriceLookupTool::new(self.suppliers.clone()));
        registry.register(VoiceNegotiationTool::new(self.suppliers.clone()));
        registry.register_arc(self.notifier.clone());
        registry.register_arc(self.payments.clone());
        registry.register_arc(self.shipping.clone());
        registry.register_arc(self.delivery.clone());
        registry.register_arc(self.ledger.clone());
        registry.register(ReliabilityUpdateTool::new(self.reliability.clone()));
        registry.register(ReliabilityLookupTool::new(self.reliability.clone()));
        registry.register(StrikeRegisterTool::new(self.strikes.clone()));
        registry.register(StrikeLookupTool::new(self.strikes.clone()));
        registry
    }
}
