//! 核心编排层：请求状态、错误与恢复、租约、驱动循环与并发调度

pub mod builder;
pub mod dispatcher;
pub mod error;
pub mod lease;
pub mod orchestrator;
pub mod recovery;
pub mod state;

pub use builder::{create_orchestrator_builder, OrchestratorBuilder};
pub use dispatcher::{Dispatcher, DispatcherHandle, Job};
pub use error::{PipelineError, RecoveryAction};
pub use lease::{LeaseGuard, LeaseManager};
pub use orchestrator::{DriveOutcome, InboundMessage, Orchestrator, ResumeOutcome, SubmitOutcome};
pub use recovery::RecoveryEngine;
pub use state::{RequestId, RequestState, Stage, TerminalOutcome};
