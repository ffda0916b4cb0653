//! 生成服务客户端
//!
//! 编排器只依赖 `GenerationClient` 这个窄接口：
//! `generate(prompt, max_tokens, timeout) → 文本 | 超时 | 限流 | 服务错误`。
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的服务都可以接入（自定义 base url 与模型）

use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::models::response::FailureKind;

/// 生成调用错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("调用超时: {message}")]
    Timeout { message: String },
    #[error("请求被限流: {message}")]
    RateLimited { message: String },
    #[error("服务错误: {message}")]
    Service { message: String },
    #[error("请求不合法: {message}")]
    MalformedRequest { message: String },
    #[error("返回内容无法解析: {message}")]
    InvalidOutput { message: String },
}

impl GenerationError {
    pub fn timeout(message: impl Into<String>) -> Self {
        GenerationError::Timeout {
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        GenerationError::RateLimited {
            message: message.into(),
        }
    }

    pub fn service(message: impl Into<String>) -> Self {
        GenerationError::Service {
            message: message.into(),
        }
    }

    pub fn invalid_output(message: impl Into<String>) -> Self {
        GenerationError::InvalidOutput {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            GenerationError::Timeout { .. } => FailureKind::Timeout,
            GenerationError::RateLimited { .. } => FailureKind::RateLimited,
            GenerationError::Service { .. } => FailureKind::Service,
            GenerationError::MalformedRequest { .. } => FailureKind::MalformedRequest,
            GenerationError::InvalidOutput { .. } => FailureKind::InvalidOutput,
        }
    }

    /// 超时和限流可以重试，其余不重试
    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

/// 一次生成调用的提示词
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationPrompt {
    pub system: Option<String>,
    pub user: String,
}

impl GenerationPrompt {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            system: None,
            user: user.into(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// 外部生成服务
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(
        &self,
        prompt: &GenerationPrompt,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<String, GenerationError>;
}

/// 基于 OpenAI 兼容接口的生成客户端
pub struct OpenAiGenerationClient {
    client: Client<OpenAIConfig>,
    model_name: String,
}

impl OpenAiGenerationClient {
    /// 创建新的客户端
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
        }
    }

    fn build_messages(
        &self,
        prompt: &GenerationPrompt,
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let mut messages = Vec::new();

        if let Some(sys_msg) = &prompt.system {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg.as_str())
                .build()?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt.user.as_str())
            .build()?;
        messages.push(ChatCompletionRequestMessage::User(user_msg));

        Ok(messages)
    }
}

#[async_trait]
impl GenerationClient for OpenAiGenerationClient {
    async fn generate(
        &self,
        prompt: &GenerationPrompt,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<String, GenerationError> {
        debug!(
            "调用 LLM API，模型: {}, token 预算: {}, 超时: {:?}",
            self.model_name, max_tokens, timeout
        );
        debug!("用户消息长度: {} 字符", prompt.user.len());

        let messages = self
            .build_messages(prompt)
            .map_err(|e| GenerationError::MalformedRequest {
                message: e.to_string(),
            })?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(0.7)
            .max_tokens(max_tokens)
            .build()
            .map_err(|e| GenerationError::MalformedRequest {
                message: e.to_string(),
            })?;

        let response = tokio::time::timeout(timeout, self.client.chat().create(request))
            .await
            .map_err(|_| GenerationError::timeout(format!("{} 秒内未返回", timeout.as_secs())))?
            .map_err(|e| {
                warn!("LLM API 调用失败: {}", e);
                classify_openai_error(e)
            })?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| GenerationError::service("LLM 返回内容为空"))?;

        Ok(content.trim().to_string())
    }
}

/// 把 SDK 错误归类为超时 / 限流 / 请求错误 / 服务错误
fn classify_openai_error(err: OpenAIError) -> GenerationError {
    match err {
        OpenAIError::Reqwest(e) if e.is_timeout() => GenerationError::timeout(e.to_string()),
        OpenAIError::Reqwest(e) if e.status().map(|s| s.as_u16()) == Some(429) => {
            GenerationError::rate_limited(e.to_string())
        }
        OpenAIError::ApiError(api) => {
            let api_type = api.r#type.clone().unwrap_or_default();
            classify_api_message(&api_type, &api.message)
        }
        OpenAIError::InvalidArgument(message) => GenerationError::MalformedRequest { message },
        other => GenerationError::service(other.to_string()),
    }
}

fn classify_api_message(api_type: &str, message: &str) -> GenerationError {
    let lowered = format!("{} {}", api_type, message).to_lowercase();
    if lowered.contains("rate_limit") || lowered.contains("rate limit") || lowered.contains("429") {
        GenerationError::rate_limited(message)
    } else if lowered.contains("timeout") || lowered.contains("timed out") {
        GenerationError::timeout(message)
    } else if lowered.contains("invalid_request") {
        GenerationError::MalformedRequest {
            message: message.to_string(),
        }
    } else {
        GenerationError::service(message)
    }
}
