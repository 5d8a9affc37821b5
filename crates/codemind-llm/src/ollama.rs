//! Local-runtime adapter (spec §4.3 "one local runtime").
//!
//! Grounded on the teacher's `qwen_simple.rs` (`QwenConfig`/`QwenClient`):
//! same plain-JSON-over-HTTP shape, timeout wrapping, and error mapping.
//! Generalized from the teacher's single-prompt `/api/generate` endpoint to
//! Ollama's message-array `/api/chat` endpoint so multi-turn history and
//! tool definitions can be carried the way `chatWithTools` requires; NDJSON
//! streaming is treated as this adapter's streaming transport, parsed
//! line-by-line like the cloud SSE parsers but without `event:`/`data:`
//! framing.

use std::time::Duration;

use async_trait::async_trait;
use codemind_core::{ChatMessage, Result, ToolCall};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use crate::adapter::{
    decode_error, empty_result_error, transport_error, CancellationHandle, ChatWithToolsResult,
    GenerationParams, LLMAdapter, ProviderCharacteristics, StopReason, StreamCallback, StreamEvent,
};

const PROVIDER: &str = "ollama";

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub model: String,
    pub base_url: String,
    pub context_window: usize,
    pub timeout: Duration,
    pub keep_alive: Option<String>,
}

impl OllamaConfig {
    pub fn from_env(model: String) -> Self {
        Self {
            model,
            base_url: codemind_core::config::ollama_base_url(),
            context_window: 128_000,
            timeout: Duration::from_secs(90),
            keep_alive: None,
        }
    }
}

#[derive(Debug)]
pub struct OllamaAdapter {
    config: OllamaConfig,
    client: reqwest::Client,
}

impl OllamaAdapter {
    pub fn new(config: OllamaConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[derive(Debug, Serialize)]
struct RequestMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<RequestToolCall>>,
}

#[derive(Debug, Serialize)]
struct RequestToolCall {
    function: RequestFunctionCall,
}

#[derive(Debug, Serialize)]
struct RequestFunctionCall {
    name: String,
    arguments: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct RequestTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: RequestFunctionDefinition,
}

#[derive(Debug, Serialize)]
struct RequestFunctionDefinition {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct RequestOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<usize>,
    num_ctx: usize,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<RequestMessage>,
    stream: bool,
    options: RequestOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<RequestTool>>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "keep_alive")]
    keep_alive: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseFunctionCall {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    function: ResponseFunctionCall,
}

#[derive(Debug, Deserialize, Default)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: ResponseMessage,
    #[serde(default)]
    done: bool,
}

fn wire_role(role: codemind_core::MessageRole) -> &'static str {
    match role {
        codemind_core::MessageRole::System => "system",
        codemind_core::MessageRole::User => "user",
        codemind_core::MessageRole::Assistant => "assistant",
        codemind_core::MessageRole::Tool => "tool",
    }
}

fn build_request(
    messages: &[ChatMessage],
    params: &GenerationParams,
    config: &OllamaConfig,
    stream: bool,
) -> ChatRequest {
    let model = params.model_override.clone().unwrap_or_else(|| config.model.clone());
    let wire_messages = messages
        .iter()
        .map(|message| RequestMessage {
            role: wire_role(message.role),
            content: message.content.clone(),
            tool_calls: message.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|call| RequestToolCall {
                        function: RequestFunctionCall {
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        },
                    })
                    .collect()
            }),
        })
        .collect();

    let tools = if params.tools.is_empty() {
        None
    } else {
        Some(
            params
                .tools
                .iter()
                .map(|t| RequestTool {
                    tool_type: "function",
                    function: RequestFunctionDefinition {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: serde_json::to_value(&t.parameters).unwrap_or_else(|_| json!({})),
                    },
                })
                .collect(),
        )
    };

    ChatRequest {
        model,
        messages: wire_messages,
        stream,
        options: RequestOptions {
            temperature: params.temperature,
            num_predict: params.max_tokens,
            num_ctx: config.context_window,
        },
        tools,
        keep_alive: params.keep_alive.clone().or_else(|| config.keep_alive.clone()),
    }
}

fn extract_result(response: ChatResponse) -> Result<ChatWithToolsResult> {
    let mut tool_calls = Vec::new();
    if let Some(calls) = response.message.tool_calls {
        for (i, call) in calls.into_iter().enumerate() {
            tool_calls.push(ToolCall {
                id: format!("{PROVIDER}-call-{i}"),
                name: call.function.name,
                arguments: call.function.arguments,
            });
        }
    }
    if response.message.content.is_empty() && tool_calls.is_empty() {
        return Err(empty_result_error(PROVIDER));
    }
    let stop_reason = if tool_calls.is_empty() {
        StopReason::End
    } else {
        StopReason::ToolUse
    };
    Ok(ChatWithToolsResult {
        text: response.message.content,
        tool_calls,
        stop_reason,
    })
}

impl OllamaAdapter {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.config.base_url))
            .timeout(self.config.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, 0, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            return Err(transport_error(PROVIDER, status.as_u16(), body));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(PROVIDER, status.as_u16(), e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| decode_error(PROVIDER, e.to_string()))
    }
}

#[async_trait]
impl LLMAdapter for OllamaAdapter {
    #[instrument(skip(self, messages, params, _cancel), fields(provider = PROVIDER, messages = messages.len(), temperature = params.temperature))]
    async fn chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        _cancel: &CancellationHandle,
    ) -> Result<String> {
        let request = build_request(messages, params, &self.config, false);
        let response = self.send(&request).await?;
        if response.message.content.is_empty() {
            return Err(empty_result_error(PROVIDER));
        }
        Ok(response.message.content)
    }

    #[instrument(skip(self, messages, params, _cancel), fields(provider = PROVIDER, messages = messages.len(), temperature = params.temperature))]
    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        _cancel: &CancellationHandle,
    ) -> Result<ChatWithToolsResult> {
        let request = build_request(messages, params, &self.config, false);
        let response = self.send(&request).await?;
        extract_result(response)
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        cancel: &CancellationHandle,
        on_event: StreamCallback,
    ) -> Result<()> {
        let request = build_request(messages, params, &self.config, true);
        let response = self
            .client
            .post(format!("{}/api/chat", self.config.base_url))
            .timeout(self.config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, 0, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            on_event(StreamEvent::Error(body.clone()));
            return Err(transport_error(PROVIDER, status.as_u16(), body));
        }

        let mut buffer = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                on_event(StreamEvent::Error("cancelled".to_string()));
                return Err(codemind_core::CodeMindError::Cancelled(
                    "stream cancelled".to_string(),
                ));
            }
            let chunk = chunk.map_err(|e| decode_error(PROVIDER, e.to_string()))?;
            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = &line[..line.len() - 1];
                if line.is_empty() {
                    continue;
                }
                let parsed: ChatResponse = match serde_json::from_slice(line) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if !parsed.message.content.is_empty() {
                    on_event(StreamEvent::Token(parsed.message.content.clone()));
                }
                if parsed.done {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn supports_tool_calling(&self) -> bool {
        true
    }

    fn provider_name(&self) -> &str {
        PROVIDER
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn characteristics(&self) -> ProviderCharacteristics {
        ProviderCharacteristics {
            max_tokens: self.config.context_window,
            avg_latency_ms: 2000,
            rpm_limit: None,
            tpm_limit: None,
            supports_streaming: true,
            supports_functions: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OllamaConfig {
        OllamaConfig {
            model: "qwen2.5-coder".to_string(),
            base_url: "http://localhost:11434".to_string(),
            context_window: 128_000,
            timeout: Duration::from_secs(5),
            keep_alive: None,
        }
    }

    #[test]
    fn request_targets_chat_endpoint_shape() {
        let messages = vec![ChatMessage::system("be terse"), ChatMessage::user("hi")];
        let request = build_request(&messages, &GenerationParams::default(), &config(), false);
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert!(!request.stream);
    }

    #[test]
    fn tool_calls_get_synthesized_ordinal_ids() {
        let response = ChatResponse {
            message: ResponseMessage {
                content: String::new(),
                tool_calls: Some(vec![ResponseToolCall {
                    function: ResponseFunctionCall {
                        name: "find_callers".to_string(),
                        arguments: json!({"symbol": "Foo"}),
                    },
                }]),
            },
            done: true,
        };
        let result = extract_result(response).unwrap();
        assert_eq!(result.tool_calls[0].id, "ollama-call-0");
        assert_eq!(result.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn empty_content_and_no_tool_calls_is_an_error() {
        let response = ChatResponse {
            message: ResponseMessage::default(),
            done: true,
        };
        assert!(extract_result(response).is_err());
    }
}
