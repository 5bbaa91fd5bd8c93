//! LLM 层：客户端抽象、Mock / 规则抽取实现，以及把 LLM 包装成外部工具的 llm_decide

pub mod decision;
pub mod heuristic;
pub mod mock;
pub mod traits;

pub use decision::{extract_json, DecisionTool};
pub use heuristic::HeuristicLlmClient;
pub use mock::MockLlmClient;
pub use traits::{last_user_message, LlmClient, LlmError, Message, Role};
