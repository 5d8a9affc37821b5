//! Cloud provider B (OpenAI-style) adapter (spec §4.2): Chat-Completions
//! wire shape — `tool_calls` array with string-encoded arguments,
//! `tool_call_id` linkage, `max_completion_tokens`.
//!
//! Structural conventions (config shape, retry loop, error surfacing) are
//! grounded on the teacher's `openai_llm_provider.rs`; its actual wire
//! shape targets OpenAI's Responses API, which this spec does not use —
//! here the JSON fields follow spec.md §4.2's explicit Chat-Completions
//! description instead of the teacher's `input`/`instructions` fields.

use std::time::Duration;

use async_trait::async_trait;
use codemind_core::{ChatMessage, Result, ToolCall};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use crate::adapter::{
    decode_error, empty_result_error, transport_error, CancellationHandle, ChatWithToolsResult,
    GenerationParams, LLMAdapter, ProviderCharacteristics, StopReason,
};

const PROVIDER: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub context_window: usize,
    pub timeout: Duration,
    pub max_retries: u32,
    pub organization: Option<String>,
}

impl OpenAiConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = codemind_core::config::require_credential(
            PROVIDER,
            codemind_core::config::openai_api_key(),
            "OPENAI_API_KEY",
        )?;
        Ok(Self {
            api_key,
            model: codemind_core::config::openai_model(),
            base_url: DEFAULT_BASE_URL.to_string(),
            context_window: 128_000,
            timeout: Duration::from_secs(120),
            max_retries: 3,
            organization: std::env::var("OPENAI_ORGANIZATION").ok(),
        })
    }
}

#[derive(Debug)]
pub struct OpenAiAdapter {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiAdapter {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[derive(Debug, Serialize)]
struct RequestMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<RequestToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct RequestToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: RequestFunctionCall,
}

#[derive(Debug, Serialize)]
struct RequestFunctionCall {
    name: String,
    arguments: String,
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
struct OpenAiRequest {
    model: String,
    messages: Vec<RequestMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<usize>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<RequestTool>>,
}

#[derive(Debug, Deserialize)]
struct ResponseFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunctionCall,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiApiError {
    error: OpenAiApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct OpenAiApiErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// All four roles map directly onto Chat-Completions roles; any role this
/// crate does not model falls back to `user` (spec §4.2 "unknown roles
/// collapse to `user`").
fn wire_role(role: codemind_core::MessageRole) -> &'static str {
    match role {
        codemind_core::MessageRole::System => "system",
        codemind_core::MessageRole::User => "user",
        codemind_core::MessageRole::Assistant => "assistant",
        codemind_core::MessageRole::Tool => "tool",
    }
}

fn build_request(messages: &[ChatMessage], params: &GenerationParams, model: &str) -> OpenAiRequest {
    let wire_messages = messages
        .iter()
        .map(|message| {
            let tool_calls = message.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|call| RequestToolCall {
                        id: call.id.clone(),
                        call_type: "function",
                        function: RequestFunctionCall {
                            name: call.name.clone(),
                            arguments: call.arguments.to_string(),
                        },
                    })
                    .collect()
            });
            let tool_call_id = message.tool_result.as_ref().map(|link| link.tool_call_id.clone());
            RequestMessage {
                role: wire_role(message.role),
                content: if message.content.is_empty() && tool_calls.is_some() {
                    None
                } else {
                    Some(message.content.clone())
                },
                tool_calls,
                tool_call_id,
            }
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

    OpenAiRequest {
        model: model.to_string(),
        messages: wire_messages,
        max_completion_tokens: params.max_tokens,
        temperature: params.temperature,
        top_p: params.top_p,
        stop: params.stop.clone(),
        tools,
    }
}

fn api_error_message(status: u16, body: &str) -> String {
    if let Ok(api_error) = serde_json::from_str::<OpenAiApiError>(body) {
        format!("{}: {}", api_error.error.error_type, api_error.error.message)
    } else {
        format!("HTTP {status}: {body}")
    }
}

impl OpenAiAdapter {
    async fn send(&self, request: &OpenAiRequest) -> Result<OpenAiResponse> {
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .timeout(self.config.timeout)
            .bearer_auth(&self.config.api_key);
        if let Some(org) = &self.config.organization {
            builder = builder.header("OpenAI-Organization", org);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = builder
                .try_clone()
                .expect("request has no streaming body")
                .json(request)
                .send()
                .await;
            match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body = response
                            .bytes()
                            .await
                            .map_err(|e| transport_error(PROVIDER, status.as_u16(), e.to_string()))?;
                        return serde_json::from_slice(&body)
                            .map_err(|e| decode_error(PROVIDER, e.to_string()));
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

fn extract_result(response: OpenAiResponse) -> Result<ChatWithToolsResult> {
    let choice = response.choices.into_iter().next().ok_or_else(|| empty_result_error(PROVIDER))?;
    let mut tool_calls = Vec::new();
    if let Some(calls) = choice.message.tool_calls {
        for call in calls {
            let arguments: serde_json::Value = serde_json::from_str(&call.function.arguments)
                .map_err(|e| decode_error(PROVIDER, format!("invalid tool arguments: {e}")))?;
            tool_calls.push(ToolCall {
                id: call.id,
                name: call.function.name,
                arguments,
            });
        }
    }
    let stop_reason = if choice.finish_reason.as_deref() == Some("tool_calls") || !tool_calls.is_empty() {
        StopReason::ToolUse
    } else {
        StopReason::End
    };
    Ok(ChatWithToolsResult {
        text: choice.message.content.unwrap_or_default(),
        tool_calls,
        stop_reason,
    })
}

#[async_trait]
impl LLMAdapter for OpenAiAdapter {
    #[instrument(skip(self, messages, params, _cancel), fields(provider = PROVIDER, messages = messages.len(), temperature = params.temperature))]
    async fn chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        _cancel: &CancellationHandle,
    ) -> Result<String> {
        let model = params.model_override.clone().unwrap_or_else(|| self.config.model.clone());
        let request = build_request(messages, params, &model);
        let response = self.send(&request).await?;
        let choice = response.choices.into_iter().next().ok_or_else(|| empty_result_error(PROVIDER))?;
        Ok(choice.message.content.unwrap_or_default())
    }

    #[instrument(skip(self, messages, params, _cancel), fields(provider = PROVIDER, messages = messages.len(), temperature = params.temperature))]
    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        _cancel: &CancellationHandle,
    ) -> Result<ChatWithToolsResult> {
        let model = params.model_override.clone().unwrap_or_else(|| self.config.model.clone());
        let request = build_request(messages, params, &model);
        let response = self.send(&request).await?;
        extract_result(response)
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
            avg_latency_ms: 1200,
            rpm_limit: Some(500),
            tpm_limit: Some(150_000),
            supports_streaming: true,
            supports_functions: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_arguments_round_trip_as_string() {
        let response_json = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "read_file", "arguments": "{\"path\":\"/src/main.go\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;
        let response: OpenAiResponse = serde_json::from_str(response_json).unwrap();
        let result = extract_result(response).unwrap();
        assert_eq!(result.stop_reason, StopReason::ToolUse);
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].name, "read_file");
        assert_eq!(
            serde_json::to_string(&result.tool_calls[0].arguments).unwrap(),
            r#"{"path":"/src/main.go"}"#
        );
    }

    #[test]
    fn request_serialises_tool_call_arguments_as_string() {
        let messages = vec![ChatMessage::assistant_with_tool_calls(
            "",
            vec![ToolCall {
                id: "call_1".into(),
                name: "read_file".into(),
                arguments: json!({"path": "/src/main.go"}),
            }],
        )];
        let params = GenerationParams::default();
        let request = build_request(&messages, &params, "gpt-4o");
        let value = serde_json::to_value(&request).unwrap();
        let arguments = value["messages"][0]["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(arguments, r#"{"path":"/src/main.go"}"#);
    }

    #[test]
    fn max_tokens_maps_to_max_completion_tokens_field() {
        let messages = vec![ChatMessage::user("hi")];
        let mut params = GenerationParams::default();
        params.max_tokens = Some(512);
        let request = build_request(&messages, &params, "gpt-4o");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["max_completion_tokens"], 512);
        assert!(value.get("max_tokens").is_none());
    }
}
