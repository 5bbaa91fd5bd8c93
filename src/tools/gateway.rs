//! 工具网关
//!
//! 持有 ToolRegistry 与按类别的 RetryPolicies，invoke(tool, payload, key) 对每次尝试施加超时，
//! 按策略重试可重试错误，最终给出成功结果或带分类的 GatewayError；每次调用输出结构化审计日志（JSON）。

use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::timeout;

use crate::tools::{RetryPolicies, ToolCall, ToolError, ToolRegistry};

/// 网关层面的最终失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("tool '{tool}' exhausted after {attempts} attempts: {last}")]
    Exhausted {
        tool: String,
        attempts: u32,
        last: ToolError,
    },

    #[error("tool '{tool}' rejected the call: {last}")]
    Rejected { tool: String, last: ToolError },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool '{tool}' payload could not be decoded: {detail}")]
    Decode { tool: String, detail: String },
}

impl GatewayError {
    pub fn tool(&self) -> &str {
        match self {
            GatewayError::Exhausted { tool, .. }
            | GatewayError::Rejected { tool, .. }
            | GatewayError::Decode { tool, .. } => tool,
            GatewayError::UnknownTool(tool) => tool,
        }
    }
}

/// 工具网关：统一超时、重试、幂等键透传与审计
pub struct ToolGateway {
    registry: ToolRegistry,
    policies: RetryPolicies,
}

impl ToolGateway {
    pub fn new(registry: ToolRegistry, policies: RetryPolicies) -> Self {
        Self { registry, policies }
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    /// 调用指定工具；所有重试共用同一个幂等键
    pub async fn invoke(&self, tool_name: &str, payload: Value, idempotency_key: &str) -> Result<Value, GatewayError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| GatewayError::UnknownTool(tool_name.to_string()))?;
        let policy = *self.policies.for_class(tool.class());
        let start = Instant::now();
        let payload_preview = payload_preview(&payload);

        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            let call = ToolCall {
                tool: tool_name.to_string(),
                payload: payload.clone(),
                idempotency_key: idempotency_key.to_string(),
                attempt,
            };
            let outcome = match timeout(policy.timeout(), tool.invoke(&call)).await {
                Ok(r) => r,
                Err(_) => Err(ToolError::Timeout),
            };
            match outcome {
                Ok(value) => break Ok(value),
                Err(err) if !err.is_retryable() => {
                    break Err(GatewayError::Rejected {
                        tool: tool_name.to_string(),
                        last: err,
                    })
                }
                Err(err) if attempt >= policy.attempts() => {
                    break Err(GatewayError::Exhausted {
                        tool: tool_name.to_string(),
                        attempts: attempt,
                        last: err,
                    })
                }
                Err(err) => {
                    let delay = policy.delay_for(attempt, &err);
                    tracing::debug!(
                        tool = %tool_name,
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "retrying tool call"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(GatewayError::Exhausted { last, .. }) | Err(GatewayError::Rejected { last, .. }) => last.kind(),
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "attempts": attempt,
            "idempotency_key": idempotency_key,
            "duration_ms": start.elapsed().as_millis() as u64,
            "payload_preview": payload_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }

    /// 类型化调用：请求序列化为 JSON，响应反序列化为 Resp
    pub async fn call<Req, Resp>(&self, tool_name: &str, request: &Req, idempotency_key: &str) -> Result<Resp, GatewayError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_value(request).map_err(|e| GatewayError::Decode {
            tool: tool_name.to_string(),
            detail: e.to_string(),
        })?;
        let value = self.invoke(tool_name, payload, idempotency_key).await?;
        serde_json::from_value(value).map_err(|e| GatewayError::Decode {
            tool: tool_name.to_string(),
            detail: e.to_string(),
        })
    }
}

fn payload_preview(payload: &Value) -> String {
    let s = payload.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::tools::{ExternalTool, RetryPolicy, ToolClass};

    /// 前 failures 次返回 error，之后回显幂等键
    struct Scripted {
        calls: AtomicU32,
        failures: u32,
        error: ToolError,
        keys: std::sync::Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(failures: u32, error: ToolError) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                failures,
                error,
                keys: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ExternalTool for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn class(&self) -> ToolClass {
            ToolClass::Lookup
        }

        async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError> {
            self.keys.lock().unwrap().push(call.idempotency_key.clone());
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(self.error.clone());
            }
            Ok(serde_json::json!({ "attempt": call.attempt }))
        }
    }

    struct Sleepy;

    #[async_trait]
    impl ExternalTool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn class(&self) -> ToolClass {
            ToolClass::Lookup
        }

        async fn invoke(&self, _call: &ToolCall) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    fn fast_policies(max_attempts: u32) -> RetryPolicies {
        RetryPolicies::uniform(RetryPolicy {
            max_attempts,
            timeout_ms: 50,
            base_delay_ms: 1,
            max_delay_ms: 5,
        })
    }

    fn gateway_with(tool: Arc<dyn ExternalTool>, max_attempts: u32) -> ToolGateway {
        let mut registry = ToolRegistry::new();
        registry.register_arc(tool);
        ToolGateway::new(registry, fast_policies(max_attempts))
    }

    #[tokio::test]
    async fn test_retry_until_success_with_same_key() {
        let tool = Scripted::new(2, ToolError::Remote { code: 503, message: "busy".to_string() });
        let gateway = gateway_with(tool.clone(), 3);
        let value = gateway.invoke("scripted", Value::Null, "r1:commit:3:payment").await.unwrap();
        assert_eq!(value["attempt"], 3);
        let keys = tool.keys.lock().unwrap().clone();
        assert_eq!(keys.len(), 3);
        assert!(keys.iter().all(|k| k == "r1:commit:3:payment"));
    }

    #[tokio::test]
    async fn test_exhausted_after_max_attempts() {
        let tool = Scripted::new(10, ToolError::Timeout);
        let gateway = gateway_with(tool.clone(), 3);
        let err = gateway.invoke("scripted", Value::Null, "k").await.unwrap_err();
        assert!(matches!(err, GatewayError::Exhausted { attempts: 3, .. }));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_rejected_immediately() {
        let tool = Scripted::new(10, ToolError::Remote { code: 400, message: "bad".to_string() });
        let gateway = gateway_with(tool.clone(), 5);
        let err = gateway.invoke("scripted", Value::Null, "k").await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { .. }));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_attempt() {
        let gateway = gateway_with(Arc::new(Sleepy), 2);
        let err = gateway.invoke("sleepy", Value::Null, "k").await.unwrap_err();
        match err {
            GatewayError::Exhausted { attempts, last, .. } => {
                assert_eq!(attempts, 2);
                assert_eq!(last, ToolError::Timeout);
            }
            other => panic!("Expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_and_decode() {
        let tool = Scripted::new(0, ToolError::Timeout);
        let gateway = gateway_with(tool, 1);
        assert!(matches!(
            gateway.invoke("nope", Value::Null, "k").await,
            Err(GatewayError::UnknownTool(_))
        ));
        let err = gateway
            .call::<_, Vec<String>>("scripted", &serde_json::json!({}), "k")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Decode { .. }));
    }
}
