//! Ritveer - 手工艺品采购履约编排
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 请求状态、错误与恢复、租约、编排器与调度器
//! - **llm**: LLM 客户端抽象、Mock / 规则抽取实现、llm_decide 工具
//! - **observability**: 日志初始化与请求审计
//! - **rules**: 策略配置与确定性规则引擎
//! - **stages**: Intake → Cluster → Supplier → Commit → Ops → Cash → Learn 各阶段执行器
//! - **store**: 请求状态存储（内存 / SQLite，乐观并发）
//! - **tools**: 工具网关（超时、重试、幂等键、审计）、边界契约与模拟协作方

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod rules;
pub mod stages;
pub mod store;
pub mod tools;

pub use crate::core::{
    DriveOutcome, InboundMessage, Orchestrator, OrchestratorBuilder, PipelineError, RequestState, ResumeOutcome,
    Stage, SubmitOutcome, TerminalOutcome,
};
