//! llm_decide 工具：把结构化决策请求交给 LLM，并校验输出符合抽取契约
//!
//! system prompt 内嵌 schemars 生成的 JSON Schema；模型输出可以是 ```json 代码块或夹杂文字的 JSON，
//! 提取后按 ExtractionContract 解析。格式错误按 5xx 处理，交由网关重试。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{LlmClient, LlmError, Message};
use crate::tools::contracts::{DecisionRequest, DecisionTask, LLM_DECIDE};
use crate::tools::schema::ExtractionContract;
use crate::tools::{ExternalTool, ToolCall, ToolClass, ToolError};

pub struct DecisionTool {
    llm: Arc<dyn LlmClient>,
}

impl DecisionTool {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

fn system_prompt(task: DecisionTask, schema: &Value) -> String {
    let instruction = match task {
        DecisionTask::ExtractRequest => {
            "You extract a purchase request for handmade goods from a customer message. \
             Fill only what the message states; leave unknown fields null. \
             Budget is the total amount in INR. Reply with a single JSON object and nothing else."
        }
    };
    let schema = serde_json::to_string_pretty(schema).unwrap_or_default();
    format!("{instruction}\n\nJSON Schema:\n{schema}")
}

/// 从模型输出中提取 JSON 对象文本（```json 代码块优先，其次第一个 `{` 到最后一个 `}`）
pub fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

fn map_llm_error(err: LlmError) -> ToolError {
    match err {
        LlmError::Timeout => ToolError::Timeout,
        LlmError::RateLimited { retry_after_ms } => ToolError::RateLimited { retry_after_ms },
        LlmError::ApiError(message) => ToolError::Remote { code: 502, message },
    }
}

#[async_trait]
impl ExternalTool for DecisionTool {
    fn name(&self) -> &str {
        LLM_DECIDE
    }

    fn class(&self) -> ToolClass {
        ToolClass::Decision
    }

    async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let req: DecisionRequest = serde_json::from_value(call.payload.clone())
            .map_err(|e| ToolError::InvalidPayload(e.to_string()))?;
        let messages = [
            Message::system(system_prompt(req.task, &req.schema)),
            Message::user(req.input),
        ];
        let output = self.llm.complete(&messages).await.map_err(map_llm_error)?;
        let json = extract_json(&output).ok_or_else(|| ToolError::Remote {
            code: 502,
            message: "model output contained no JSON object".to_string(),
        })?;
        let contract: ExtractionContract = serde_json::from_str(json).map_err(|e| ToolError::Remote {
            code: 502,
            message: format!("malformed structured output: {e}"),
        })?;
        serde_json::to_value(contract).map_err(|e| ToolError::InvalidPayload(e.to_string()))
    }
}
