//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按顺序返回预置回复；队列耗尽后重复最后一个兜底回复，并记录收到的每一轮消息。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message};

#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: Option<String>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    /// 每次都返回同一回复
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            fallback: Some(reply.into()),
            ..Default::default()
        }
    }

    /// 按顺序返回脚本中的结果
    pub fn scripted(script: Vec<Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn prompts(&self) -> Vec<Vec<Message>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.to_vec());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(result) => result,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| LlmError::ApiError("mock script exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_then_exhausted() {
        let mock = MockLlmClient::scripted(vec![Err(LlmError::Timeout), Ok("{}".to_string())]);
        let msgs = [Message::user("hi")];
        assert_eq!(mock.complete(&msgs).await, Err(LlmError::Timeout));
        assert_eq!(mock.complete(&msgs).await.unwrap(), "{}");
        assert!(mock.complete(&msgs).await.is_err());
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_replying_repeats() {
        let mock = MockLlmClient::replying("ok");
        let msgs = [Message::user("hi")];
        assert_eq!(mock.complete(&msgs).await.unwrap(), "ok");
        assert_eq!(mock.complete(&msgs).await.unwrap(), "ok");
    }
}
