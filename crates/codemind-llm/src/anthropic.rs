//! Cloud provider A (Anthropic-style) adapter (spec §4.2).
//!
//! Grounded structurally on the teacher's `anthropic_provider.rs`
//! (`AnthropicConfig`, `from_env`, exponential-backoff retry loop,
//! `x-api-key`/`anthropic-version` headers) but generalized to the wire
//! shape this spec requires: system-prompt lifting with ephemeral-cache
//! tagging, tool-use blocks, thinking-budget widening, and SSE streaming
//! (none of which the teacher's file implements).

use std::time::Duration;

use async_trait::async_trait;
use codemind_core::{ChatMessage, Result, ToolCall, ToolDefinition};
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use crate::adapter::{
    decode_error, empty_result_error, transport_error, CancellationHandle, ChatWithToolsResult,
    GenerationParams, LLMAdapter, ProviderCharacteristics, StopReason, StreamCallback, StreamEvent,
};

const PROVIDER: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const SYSTEM_CACHE_THRESHOLD_BYTES: usize = 1024;
const THINKING_BUDGET_HEADROOM: usize = 2048;

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub context_window: usize,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl AnthropicConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = codemind_core::config::require_credential(
            PROVIDER,
            codemind_core::config::anthropic_api_key(),
            "ANTHROPIC_API_KEY",
        )?;
        Ok(Self {
            api_key,
            model: codemind_core::config::claude_model(),
            base_url: DEFAULT_BASE_URL.to_string(),
            context_window: 200_000,
            timeout: Duration::from_secs(120),
            max_retries: 3,
        })
    }
}

#[derive(Debug)]
pub struct AnthropicAdapter {
    config: AnthropicConfig,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(config: AnthropicConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[derive(Debug, Serialize)]
struct SystemBlock {
    #[serde(rename = "type")]
    block_type: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    control_type: &'static str,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<RequestContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ThinkingConfig {
    #[serde(rename = "type")]
    thinking_type: &'static str,
    budget_tokens: usize,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<Vec<SystemBlock>>,
    messages: Vec<AnthropicMessage>,
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<ThinkingConfig>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ResponseContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ResponseContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicApiError {
    error: AnthropicApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicApiErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

fn build_request(
    messages: &[ChatMessage],
    params: &GenerationParams,
    model: &str,
    stream: bool,
) -> AnthropicRequest {
    let mut system_text = String::new();
    let mut anthropic_messages = Vec::with_capacity(messages.len());

    for message in messages {
        match message.role {
            codemind_core::MessageRole::System => {
                if !system_text.is_empty() {
                    system_text.push('\n');
                }
                system_text.push_str(&message.content);
            }
            codemind_core::MessageRole::User => {
                anthropic_messages.push(AnthropicMessage {
                    role: "user",
                    content: vec![RequestContentBlock::Text {
                        text: message.content.clone(),
                    }],
                });
            }
            codemind_core::MessageRole::Assistant => {
                let mut blocks = Vec::new();
                if !message.content.is_empty() {
                    blocks.push(RequestContentBlock::Text {
                        text: message.content.clone(),
                    });
                }
                if let Some(calls) = &message.tool_calls {
                    for call in calls {
                        blocks.push(RequestContentBlock::ToolUse {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            input: call.arguments.clone(),
                        });
                    }
                }
                anthropic_messages.push(AnthropicMessage {
                    role: "assistant",
                    content: blocks,
                });
            }
            codemind_core::MessageRole::Tool => {
                let tool_use_id = message
                    .tool_result
                    .as_ref()
                    .map(|link| link.tool_call_id.clone())
                    .unwrap_or_default();
                anthropic_messages.push(AnthropicMessage {
                    role: "user",
                    content: vec![RequestContentBlock::ToolResult {
                        tool_use_id,
                        content: message.content.clone(),
                    }],
                });
            }
        }
    }

    let system = if system_text.is_empty() {
        None
    } else {
        let cache_control = if system_text.len() > SYSTEM_CACHE_THRESHOLD_BYTES {
            Some(CacheControl {
                control_type: "ephemeral",
            })
        } else {
            None
        };
        Some(vec![SystemBlock {
            block_type: "text",
            text: system_text,
            cache_control,
        }])
    };

    let tools = if params.tools.is_empty() {
        None
    } else {
        Some(
            params
                .tools
                .iter()
                .map(|t| AnthropicTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: serde_json::to_value(&t.parameters).unwrap_or_else(|_| json!({})),
                })
                .collect(),
        )
    };

    let mut max_tokens = params.max_tokens.unwrap_or(4096);
    let thinking = params.thinking_budget.map(|budget| {
        let floor = budget as usize + THINKING_BUDGET_HEADROOM;
        if max_tokens < floor {
            max_tokens = floor;
        }
        ThinkingConfig {
            thinking_type: "enabled",
            budget_tokens: budget as usize,
        }
    });

    AnthropicRequest {
        model: model.to_string(),
        system,
        messages: anthropic_messages,
        max_tokens,
        temperature: params.temperature,
        top_p: params.top_p,
        stop_sequences: params.stop.clone(),
        tools,
        thinking,
        stream,
    }
}

fn parse_response(body: &[u8]) -> Result<AnthropicResponse> {
    serde_json::from_slice(body).map_err(|e| decode_error(PROVIDER, e.to_string()))
}

fn api_error_message(status: u16, body: &str) -> String {
    if let Ok(api_error) = serde_json::from_str::<AnthropicApiError>(body) {
        format!("{}: {}", api_error.error.error_type, api_error.error.message)
    } else {
        format!("HTTP {status}: {body}")
    }
}

impl AnthropicAdapter {
    async fn send(&self, request: &AnthropicRequest) -> Result<bytes::Bytes> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = self
                .client
                .post(format!("{}/messages", self.config.base_url))
                .timeout(self.config.timeout)
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", API_VERSION)
                .json(request)
                .send()
                .await;

            match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .bytes()
                            .await
                            .map_err(|e| transport_error(PROVIDER, status.as_u16(), e.to_string()));
                    }
                    let body = response.text().await.unwrap_or_default();
                    let message = api_error_message(status.as_u16(), &body);
                    if status.is_server_error() && attempt <= self.config.max_retries {
                        tokio::time::sleep(Duration::from_secs(2u64.pow(attempt - 1))).await;
                        continue;
                    }
                    return Err(transport_error(PROVIDER, status.as_u16(), message));
                }
                Err(e) => {
                    if attempt <= self.config.max_retries {
                        tokio::time::sleep(Duration::from_secs(2u64.pow(attempt - 1))).await;
                        continue;
                    }
                    return Err(transport_error(PROVIDER, 0, e.to_string()));
                }
            }
        }
    }
}

#[async_trait]
impl LLMAdapter for AnthropicAdapter {
    #[instrument(skip(self, messages, params, _cancel), fields(provider = PROVIDER, messages = messages.len(), temperature = params.temperature))]
    async fn chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        _cancel: &CancellationHandle,
    ) -> Result<String> {
        let model = params.model_override.clone().unwrap_or_else(|| self.config.model.clone());
        let request = build_request(messages, params, &model, false);
        let body = self.send(&request).await?;
        let response = parse_response(&body)?;
        let text: String = response
            .content
            .iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text.clone())
            .collect();
        if response.content.is_empty() {
            return Err(empty_result_error(PROVIDER));
        }
        Ok(text)
    }

    #[instrument(skip(self, messages, params, _cancel), fields(provider = PROVIDER, messages = messages.len(), temperature = params.temperature))]
    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        _cancel: &CancellationHandle,
    ) -> Result<ChatWithToolsResult> {
        let model = params.model_override.clone().unwrap_or_else(|| self.config.model.clone());
        let request = build_request(messages, params, &model, false);
        let body = self.send(&request).await?;
        let response = parse_response(&body)?;
        if response.content.is_empty() {
            return Err(empty_result_error(PROVIDER));
        }

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in &response.content {
            match block.block_type.as_str() {
                "text" => {
                    if let Some(t) = &block.text {
                        text.push_str(t);
                    }
                }
                "tool_use" => {
                    tool_calls.push(ToolCall {
                        id: block.id.clone().unwrap_or_default(),
                        name: block.name.clone().unwrap_or_default(),
                        arguments: block.input.clone().unwrap_or(json!({})),
                    });
                }
                _ => {}
            }
        }

        let stop_reason = if !tool_calls.is_empty() || response.stop_reason.as_deref() == Some("tool_use") {
            StopReason::ToolUse
        } else {
            StopReason::End
        };

        Ok(ChatWithToolsResult {
            text,
            tool_calls,
            stop_reason,
        })
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        cancel: &CancellationHandle,
        on_event: StreamCallback,
    ) -> Result<()> {
        let model = params.model_override.clone().unwrap_or_else(|| self.config.model.clone());
        let request = build_request(messages, params, &model, true);

        let response = self
            .client
            .post(format!("{}/messages", self.config.base_url))
            .timeout(self.config.timeout)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, 0, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            on_event(StreamEvent::Error(api_error_message(status.as_u16(), &body)));
            return Err(transport_error(PROVIDER, status.as_u16(), body));
        }

        let mut stream = response.bytes_stream().eventsource();
        while let Some(event) = stream.next().await {
            if cancel.is_cancelled() {
                on_event(StreamEvent::Error("cancelled".to_string()));
                return Err(codemind_core::CodeMindError::Cancelled(
                    "stream cancelled".to_string(),
                ));
            }
            let event = match event {
                Ok(e) => e,
                Err(e) => {
                    on_event(StreamEvent::Error(e.to_string()));
                    return Err(decode_error(PROVIDER, e.to_string()));
                }
            };
            if event.event == "error" {
                on_event(StreamEvent::Error(event.data.clone()));
                return Err(decode_error(PROVIDER, event.data));
            }
            let parsed: serde_json::Value = match serde_json::from_str(&event.data) {
                Ok(v) => v,
                Err(_) => continue,
            };
            match parsed.get("type").and_then(|v| v.as_str()) {
                Some("content_block_delta") => {
                    if let Some(delta) = parsed.get("delta") {
                        match delta.get("type").and_then(|v| v.as_str()) {
                            Some("text_delta") => {
                                if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
                                    on_event(StreamEvent::Token(text.to_string()));
                                }
                            }
                            Some("thinking_delta") => {
                                if let Some(text) = delta.get("thinking").and_then(|v| v.as_str()) {
                                    on_event(StreamEvent::Thinking(text.to_string()));
                                }
                            }
                            _ => {}
                        }
                    }
                }
                Some("message_stop") => break,
                _ => {}
            }
        }
        Ok(())
    }

    fn provider_name(&self) -> &str {
        PROVIDER
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn characteristics(&self) -> ProviderCharacteristics {
        let model = self.config.model.to_lowercase();
        let (max_tokens, rpm_limit, tpm_limit) = if model.contains("opus") {
            (4096, Some(50), Some(40_000))
        } else if model.contains("haiku") {
            (8192, Some(50), Some(100_000))
        } else {
            (8192, Some(50), Some(80_000))
        };
        ProviderCharacteristics {
            max_tokens,
            avg_latency_ms: 1500,
            rpm_limit,
            tpm_limit,
            supports_streaming: true,
            supports_functions: true,
        }
    }
}
