//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `RITVEER__*` 覆盖（双下划线表示嵌套，如 `RITVEER__PIPELINE__MIN_VIABLE_QUOTES=3`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::rules::PolicyConfig;
use crate::stages::guard::GuardPolicy;
use crate::tools::RetryPolicies;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub store: StoreSection,
    pub pipeline: PipelineSettings,
    pub policy: PolicyConfig,
    pub guard: GuardPolicy,
    pub tools: ToolsSection,
    pub dispatcher: DispatcherSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
}

fn default_app_name() -> String {
    "ritveer".to_string()
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
        }
    }
}

/// [store] 段：状态存储与租约
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    /// 未设置时使用内存存储
    #[serde(default)]
    pub sqlite_path: Option<PathBuf>,
    /// 租约有效期；持有者崩溃后超过此时间可被回收
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

fn default_lease_ttl_secs() -> u64 {
    120
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            sqlite_path: None,
            lease_ttl_secs: default_lease_ttl_secs(),
        }
    }
}

/// [pipeline] 段：各阶段的数量上限与时间窗口
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PipelineSettings {
    /// 进入 Commit 至少需要的可用报价数
    #[serde(default = "default_min_viable_quotes")]
    pub min_viable_quotes: usize,
    /// 报价不足时最多重新聚类的次数
    #[serde(default = "default_max_reclusters")]
    pub max_reclusters: u32,
    /// 同时联系供应商的并发上限
    #[serde(default = "default_supplier_fanout")]
    pub supplier_fanout: usize,
    /// 每轮最多联系的供应商数
    #[serde(default = "default_max_contacts_per_run")]
    pub max_contacts_per_run: usize,
    /// 首轮聚类半径；第 n 次重新聚类使用 base * (n + 1)
    #[serde(default = "default_base_radius_km")]
    pub base_radius_km: f64,
    /// 支付链接有效期
    #[serde(default = "default_payment_window_secs")]
    pub payment_window_secs: u64,
    /// 版本冲突时重新加载重试的次数
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_min_viable_quotes() -> usize {
    1
}

fn default_max_reclusters() -> u32 {
    2
}

fn default_supplier_fanout() -> usize {
    4
}

fn default_max_contacts_per_run() -> usize {
    8
}

fn default_base_radius_km() -> f64 {
    50.0
}

fn default_payment_window_secs() -> u64 {
    24 * 60 * 60
}

fn default_max_conflict_retries() -> u32 {
    3
}

fn default_currency() -> String {
    "INR".to_string()
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            min_viable_quotes: default_min_viable_quotes(),
            max_reclusters: default_max_reclusters(),
            supplier_fanout: default_supplier_fanout(),
            max_contacts_per_run: default_max_contacts_per_run(),
            base_radius_km: default_base_radius_km(),
            payment_window_secs: default_payment_window_secs(),
            max_conflict_retries: default_max_conflict_retries(),
            currency: default_currency(),
        }
    }
}

/// [tools] 段：按类别的重试策略
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsSection {
    #[serde(default)]
    pub retry: RetryPolicies,
}

/// [dispatcher] 段：工作协程数与挂起过期扫描周期
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherSection {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_expiry_sweep_secs")]
    pub expiry_sweep_secs: u64,
}

fn default_workers() -> usize {
    4
}

fn default_queue_depth() -> usize {
    256
}

fn default_expiry_sweep_secs() -> u64 {
    60
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: default_queue_depth(),
            expiry_sweep_secs: default_expiry_sweep_secs(),
        }
    }
}

/// 从 config/default.toml（若存在）与环境变量加载配置
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("RITVEER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.pipeline.min_viable_quotes, 1);
        assert_eq!(config.pipeline.currency, "INR");
        assert_eq!(config.policy.strike_threshold, 3);
        assert_eq!(config.tools.retry.decision.max_attempts, 2);
        assert!(config.store.sqlite_path.is_none());
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[pipeline]
min_viable_quotes = 2
max_reclusters = 1

[policy]
max_cost_overrun_pct = 5.0
max_unapproved_delta = 1000

[tools.retry.payment]
max_attempts = 7
"#
        )
        .unwrap();
        let config = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.pipeline.min_viable_quotes, 2);
        assert_eq!(config.pipeline.max_reclusters, 1);
        assert_eq!(config.pipeline.supplier_fanout, 4);
        assert_eq!(config.policy.max_cost_overrun_pct, 5.0);
        assert_eq!(config.policy.max_unapproved_delta, rust_decimal::Decimal::from(1000));
        assert_eq!(config.tools.retry.payment.max_attempts, 7);
        assert_eq!(config.tools.retry.shipping.max_attempts, 5);
    }
}
