//! 可观测性：tracing 订阅器与请求审计

pub mod audit;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub use audit::{AuditKind, AuditRecord, AuditSink, InMemoryAuditSink};

/// 日志默认 info，可通过 RUST_LOG 覆盖
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}
