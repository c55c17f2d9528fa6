//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url），带工具定义；
//! 把内部 Message 转成 API 消息，把响应中的 function tool call 转回 ToolCallRequest。

use std::collections::HashSet;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestToolMessage,
    ChatCompletionRequestToolMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, ChatCompletionTool, ChatCompletionTools,
    CreateChatCompletionRequest, FunctionCall, FunctionObject,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{LlmClient, LlmError, ToolDescriptor};
use crate::memory::{Message, Role, ToolCallRequest};

/// 客户端设置
#[derive(Clone, Debug)]
pub struct OpenAiSettings {
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout: Duration,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key: None,
            temperature: 1.0,
            max_tokens: 4096,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    settings: OpenAiSettings,
}

impl OpenAiClient {
    pub fn new(settings: OpenAiSettings) -> Self {
        let api_key = settings
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = match settings.base_url.as_deref() {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            settings,
        }
    }

    /// 未被紧随其后的 tool 消息应答的 tool call（如未注册工具）不发送，避免端点拒绝请求
    fn to_openai_messages(messages: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        messages
            .iter()
            .enumerate()
            .map(|(idx, m)| {
                if m.role != Role::Ai || m.tool_calls.is_empty() {
                    return Self::convert_message(m);
                }
                let answered: HashSet<&str> = messages[idx + 1..]
                    .iter()
                    .take_while(|next| next.role == Role::Tool)
                    .filter_map(|next| next.tool_call_id.as_deref())
                    .collect();
                let mut pruned = m.clone();
                pruned.tool_calls.retain(|tc| answered.contains(tc.id.as_str()));
                Self::convert_message(&pruned)
            })
            .collect()
    }

    fn convert_message(m: &Message) -> Result<ChatCompletionRequestMessage, LlmError> {
        let message = match m.role {
            Role::System => ChatCompletionRequestSystemMessage {
                content: ChatCompletionRequestSystemMessageContent::Text(m.content.clone()),
                name: None,
            }
            .into(),
            Role::Human => ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(m.content.clone()),
                name: None,
            }
            .into(),
            Role::Ai => {
                let tool_calls = if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| {
                                ChatCompletionMessageToolCalls::Function(
                                    ChatCompletionMessageToolCall {
                                        id: tc.id.clone(),
                                        function: FunctionCall {
                                            name: tc.name.clone(),
                                            arguments: tc.args.to_string(),
                                        },
                                    },
                                )
                            })
                            .collect(),
                    )
                };
                let content = if m.content.is_empty() && tool_calls.is_some() {
                    None
                } else {
                    Some(ChatCompletionRequestAssistantMessageContent::Text(
                        m.content.clone(),
                    ))
                };
                #[allow(deprecated)]
                ChatCompletionRequestAssistantMessage {
                    content,
                    name: None,
                    tool_calls,
                    function_call: None,
                    refusal: None,
                    audio: None,
                }
                .into()
            }
            Role::Tool => {
                let tool_call_id = m.tool_call_id.clone().ok_or_else(|| {
                    LlmError::InvalidResponse("Tool message missing tool_call_id".to_string())
                })?;
                ChatCompletionRequestToolMessage {
                    content: ChatCompletionRequestToolMessageContent::Text(m.content.clone()),
                    tool_call_id,
                }
                .into()
            }
        };
        Ok(message)
    }

    fn convert_tool(tool: &ToolDescriptor) -> ChatCompletionTools {
        ChatCompletionTools::Function(ChatCompletionTool {
            function: FunctionObject {
                name: tool.name.clone(),
                description: Some(tool.description.clone()),
                parameters: Some(tool.parameters.clone()),
                strict: None,
            },
        })
    }
}

/// 工具参数是 JSON 字符串；解析失败时保留原文，交给工具自行报错
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn map_openai_error(e: OpenAIError) -> LlmError {
    match e {
        OpenAIError::Reqwest(err) => LlmError::Network(err.to_string()),
        OpenAIError::ApiError(api) => {
            let code = api.code.clone().unwrap_or_default();
            if code.contains("rate_limit") || api.message.to_lowercase().contains("rate limit") {
                LlmError::RateLimited {
                    retry_after_ms: 1000,
                }
            } else {
                LlmError::ApiError(api.message)
            }
        }
        other => LlmError::ApiError(other.to_string()),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<Message, LlmError> {
        let request = CreateChatCompletionRequest {
            model: self.settings.model.clone(),
            messages: Self::to_openai_messages(messages)?,
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.iter().map(Self::convert_tool).collect())
            },
            temperature: Some(self.settings.temperature),
            max_completion_tokens: Some(self.settings.max_tokens),
            ..Default::default()
        };

        tracing::debug!(model = %self.settings.model, messages = messages.len(), "Sending chat request");

        let response = tokio::time::timeout(
            self.settings.request_timeout,
            self.client.chat().create(request),
        )
        .await
        .map_err(|_| LlmError::Timeout)?
        .map_err(map_openai_error)?;

        let choice = response
            .choices
            .first()
            .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))?;

        let tool_calls: Vec<ToolCallRequest> = choice
            .message
            .tool_calls
            .as_ref()
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|tc| match tc {
                        ChatCompletionMessageToolCalls::Function(call) => Some(ToolCallRequest {
                            id: call.id.clone(),
                            name: call.function.name.clone(),
                            args: parse_arguments(&call.function.arguments),
                        }),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let content = choice.message.content.clone().unwrap_or_default();
        Ok(Message::ai_with_tool_calls(content, tool_calls))
    }

    fn model_name(&self) -> &str {
        &self.settings.model
    }
}
