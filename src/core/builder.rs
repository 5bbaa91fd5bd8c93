//! 编排器构建器：统一的组装逻辑
//!
//! 演示入口与测试都经由这里组装存储、工具网关、审计与阶段集合，避免各处初始化不一致。

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::{Orchestrator, PipelineError};
use crate::observability::{AuditSink, InMemoryAuditSink};
use crate::stages::StageSet;
use crate::store::{open_store, StateStore};
use crate::tools::{RetryPolicies, ToolGateway, ToolRegistry};

pub struct OrchestratorBuilder {
    config: AppConfig,
    registry: Option<ToolRegistry>,
    retry: Option<RetryPolicies>,
    store: Option<Arc<dyn StateStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    stages: StageSet,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            registry: None,
            retry: None,
            store: None,
            audit: None,
            stages: StageSet::standard(),
        }
    }

    /// 外部协作方（必填）
    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 覆盖配置中的 [tools.retry]
    pub fn with_retry_policies(mut self, retry: RetryPolicies) -> Self {
        self.retry = Some(retry);
        self
    }

    /// 未设置时按 [store] 配置打开
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_stages(mut self, stages: StageSet) -> Self {
        self.stages = stages;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn build(self) -> Result<Orchestrator, PipelineError> {
        let registry = self
            .registry
            .ok_or_else(|| PipelineError::Config("no tool registry configured".to_string()))?;
        let store = match self.store {
            Some(store) => store,
            None => open_store(&self.config.store)?,
        };
        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(InMemoryAuditSink::new()) as Arc<dyn AuditSink>);
        let retry = self.retry.unwrap_or_else(|| self.config.tools.retry.clone());
        tracing::info!(tools = registry.len(), "building orchestrator");
        let gateway = Arc::new(ToolGateway::new(registry, retry));
        Ok(Orchestrator::new(&self.config, store, gateway, audit, self.stages))
    }
}

/// 便捷函数：加载配置（失败时回退到默认值）并创建构建器
pub fn create_orchestrator_builder(config_path: Option<PathBuf>) -> OrchestratorBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    OrchestratorBuilder::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_requires_registry() {
        let err = OrchestratorBuilder::new(AppConfig::default()).build().err();
        assert!(matches!(err, Some(PipelineError::Config(_))));
    }

    #[test]
    fn test_build_with_defaults() {
        let orchestrator = OrchestratorBuilder::new(AppConfig::default())
            .with_registry(ToolRegistry::new())
            .build();
        assert!(orchestrator.is_ok());
    }
}
