//! 外部工具层：注册表、按类别重试的网关、类型化契约与模拟协作方

pub mod contracts;
pub mod gateway;
pub mod registry;
pub mod retry;
pub mod schema;
pub mod simulated;

pub use gateway::{GatewayError, ToolGateway};
pub use registry::{ExternalTool, ToolCall, ToolClass, ToolError, ToolRegistry};
pub use retry::{RetryPolicies, RetryPolicy};
pub use schema::{extraction_schema, ExtractionContract};
pub use simulated::{FlakyTool, SimulatedWorld, VoiceBehaviour};
