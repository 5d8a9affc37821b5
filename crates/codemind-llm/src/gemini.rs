//! Cloud provider C (Gemini-style) adapter (spec §4.2): `systemInstruction`
//! lift, `assistant` → `model` rename, `functionCall`/`functionResponse`
//! parts, synthesized call identifiers, credentials in a header.
//!
//! The wire shapes and SSE streaming mechanics (`eventsource-stream` over
//! `reqwest::bytes_stream()` against `:streamGenerateContent?alt=sse`) are
//! grounded on `austinjan-km/km-tools/src/llm/gemini.rs`, re-expressed
//! against this crate's `StreamEvent` contract.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use codemind_core::{ChatMessage, Result, ToolCall};
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tracing::instrument;

use crate::adapter::{
    decode_error, empty_result_error, transport_error, CancellationHandle, ChatWithToolsResult,
    GenerationParams, LLMAdapter, ProviderCharacteristics, StopReason, StreamCallback, StreamEvent,
};

const PROVIDER: &str = "gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub context_window: usize,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl GeminiConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = codemind_core::config::require_credential(
            PROVIDER,
            codemind_core::config::gemini_api_key(),
            "GEMINI_API_KEY",
        )?;
        Ok(Self {
            api_key,
            model: codemind_core::config::gemini_model(),
            base_url: DEFAULT_BASE_URL.to_string(),
            context_window: 1_000_000,
            timeout: Duration::from_secs(120),
            max_retries: 3,
        })
    }
}

/// Per-session mapping of the identifiers this adapter synthesises back to
/// the function name they belong to, needed to build `functionResponse`
/// parts (spec §4.2: "this provider does not issue tool-call identifiers").
#[derive(Debug, Default)]
struct CallIdRegistry {
    next: AtomicU64,
    names_by_id: RwLock<HashMap<String, String>>,
}

impl CallIdRegistry {
    fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        format!("{PROVIDER}-call-{n}")
    }

    fn register(&self, id: &str, name: &str) {
        self.names_by_id.write().insert(id.to_string(), name.to_string());
    }

    fn name_for(&self, id: &str) -> Option<String> {
        self.names_by_id.read().get(id).cloned()
    }
}

#[derive(Debug)]
pub struct GeminiAdapter {
    config: GeminiConfig,
    client: reqwest::Client,
    calls: CallIdRegistry,
}

impl GeminiAdapter {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            calls: CallIdRegistry::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct GeminiFunctionCall {
    name: String,
    args: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Serialize, Default)]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "functionCall", skip_serializing_if = "Option::is_none")]
    function_call: Option<GeminiFunctionCall>,
    #[serde(rename = "functionResponse", skip_serializing_if = "Option::is_none")]
    function_response: Option<GeminiFunctionResponse>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct GeminiTool {
    #[serde(rename = "functionDeclarations")]
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<usize>,
    #[serde(rename = "topP", skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(rename = "stopSequences", skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(rename = "functionCall", default)]
    function_call: Option<ResponseFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseFunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiApiError {
    error: GeminiApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct GeminiApiErrorBody {
    #[serde(default)]
    status: String,
    message: String,
}

impl GeminiAdapter {
    fn build_request(&self, messages: &[ChatMessage], params: &GenerationParams) -> GenerateContentRequest {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();

        for message in messages {
            match message.role {
                codemind_core::MessageRole::System => {
                    system_parts.push(GeminiPart {
                        text: Some(message.content.clone()),
                        ..Default::default()
                    });
                }
                codemind_core::MessageRole::User => {
                    contents.push(GeminiContent {
                        role: "user",
                        parts: vec![GeminiPart {
                            text: Some(message.content.clone()),
                            ..Default::default()
                        }],
                    });
                }
                codemind_core::MessageRole::Assistant => {
                    let mut parts = Vec::new();
                    if !message.content.is_empty() {
                        parts.push(GeminiPart {
                            text: Some(message.content.clone()),
                            ..Default::default()
                        });
                    }
                    if let Some(calls) = &message.tool_calls {
                        for call in calls {
                            self.calls.register(&call.id, &call.name);
                            parts.push(GeminiPart {
                                function_call: Some(GeminiFunctionCall {
                                    name: call.name.clone(),
                                    args: call.arguments.clone(),
                                }),
                                ..Default::default()
                            });
                        }
                    }
                    contents.push(GeminiContent {
                        role: "model",
                        parts,
                    });
                }
                codemind_core::MessageRole::Tool => {
                    let link = message.tool_result.clone();
                    let name = link
                        .as_ref()
                        .map(|l| l.tool_name.clone())
                        .unwrap_or_default();
                    let response_value: serde_json::Value =
                        serde_json::from_str(&message.content).unwrap_or_else(|_| json!({ "result": message.content }));
                    contents.push(GeminiContent {
                        role: "user",
                        parts: vec![GeminiPart {
                            function_response: Some(GeminiFunctionResponse {
                                name,
                                response: response_value,
                            }),
                            ..Default::default()
                        }],
                    });
                }
            }
        }

        let system_instruction = if system_parts.is_empty() {
            None
        } else {
            Some(GeminiSystemInstruction { parts: system_parts })
        };

        let tools = if params.tools.is_empty() {
            None
        } else {
            Some(vec![GeminiTool {
                function_declarations: params
                    .tools
                    .iter()
                    .map(|t| GeminiFunctionDeclaration {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: serde_json::to_value(&t.parameters).unwrap_or_else(|_| json!({})),
                    })
                    .collect(),
            }])
        };

        GenerateContentRequest {
            contents,
            system_instruction,
            tools,
            generation_config: GeminiGenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_tokens,
                top_p: params.top_p,
                stop_sequences: params.stop.clone(),
            },
        }
    }

    fn endpoint(&self, stream: bool) -> String {
        if stream {
            format!(
                "{}/models/{}:streamGenerateContent?alt=sse",
                self.config.base_url, self.config.model
            )
        } else {
            format!("{}/models/{}:generateContent", self.config.base_url, self.config.model)
        }
    }

    async fn send(&self, request: &GenerateContentRequest) -> Result<GenerateContentResponse> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = self
                .client
                .post(self.endpoint(false))
                .timeout(self.config.timeout)
                .header("x-goog-api-key", &self.config.api_key)
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

    fn extract_result(&self, response: GenerateContentResponse) -> Result<ChatWithToolsResult> {
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| empty_result_error(PROVIDER))?;
        if candidate.content.parts.is_empty() {
            return Err(empty_result_error(PROVIDER));
        }

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for part in candidate.content.parts {
            if let Some(t) = part.text {
                text.push_str(&t);
            }
            if let Some(call) = part.function_call {
                let id = self.calls.next_id();
                self.calls.register(&id, &call.name);
                tool_calls.push(ToolCall {
                    id,
                    name: call.name,
                    arguments: call.args,
                });
            }
        }

        let stop_reason = if !tool_calls.is_empty() {
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
}

fn api_error_message(status: u16, body: &str) -> String {
    if let Ok(api_error) = serde_json::from_str::<GeminiApiError>(body) {
        format!("{}: {}", api_error.error.status, api_error.error.message)
    } else {
        format!("HTTP {status}: {body}")
    }
}

#[async_trait]
impl LLMAdapter for GeminiAdapter {
    #[instrument(skip(self, messages, params, _cancel), fields(provider = PROVIDER, messages = messages.len(), temperature = params.temperature))]
    async fn chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        _cancel: &CancellationHandle,
    ) -> Result<String> {
        let request = self.build_request(messages, params);
        let response = self.send(&request).await?;
        let result = self.extract_result(response)?;
        Ok(result.text)
    }

    #[instrument(skip(self, messages, params, _cancel), fields(provider = PROVIDER, messages = messages.len(), temperature = params.temperature))]
    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        _cancel: &CancellationHandle,
    ) -> Result<ChatWithToolsResult> {
        let request = self.build_request(messages, params);
        let response = self.send(&request).await?;
        self.extract_result(response)
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        cancel: &CancellationHandle,
        on_event: StreamCallback,
    ) -> Result<()> {
        let request = self.build_request(messages, params);
        let response = self
            .client
            .post(self.endpoint(true))
            .timeout(self.config.timeout)
            .header("x-goog-api-key", &self.config.api_key)
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
            let parsed: GenerateContentResponse = match serde_json::from_str(&event.data) {
                Ok(v) => v,
                Err(_) => continue,
            };
            for candidate in parsed.candidates {
                for part in candidate.content.parts {
                    if let Some(text) = part.text {
                        on_event(StreamEvent::Token(text));
                    }
                }
                if candidate.finish_reason.is_some() {
                    return Ok(());
                }
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
        ProviderCharacteristics {
            max_tokens: self.config.context_window,
            avg_latency_ms: 1400,
            rpm_limit: Some(360),
            tpm_limit: Some(4_000_000),
            supports_streaming: true,
            supports_functions: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> GeminiAdapter {
        GeminiAdapter::new(GeminiConfig {
            api_key: "test-key".to_string(),
            model: "gemini-1.5-pro".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            context_window: 1_000_000,
            timeout: Duration::from_secs(5),
            max_retries: 0,
        })
    }

    #[test]
    fn system_message_becomes_system_instruction() {
        let a = adapter();
        let messages = vec![ChatMessage::system("be terse"), ChatMessage::user("hi")];
        let request = a.build_request(&messages, &GenerationParams::default());
        assert!(request.system_instruction.is_some());
        assert_eq!(request.contents.len(), 1);
        assert_eq!(request.contents[0].role, "user");
    }

    #[test]
    fn assistant_role_becomes_model() {
        let a = adapter();
        let messages = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        let request = a.build_request(&messages, &GenerationParams::default());
        assert_eq!(request.contents[1].role, "model");
    }

    #[test]
    fn two_consecutive_function_calls_get_ordinal_ids() {
        let a = adapter();
        let response = GenerateContentResponse {
            candidates: vec![Candidate {
                content: ResponseContent {
                    parts: vec![
                        ResponsePart {
                            text: None,
                            function_call: Some(ResponseFunctionCall {
                                name: "find_callers".to_string(),
                                args: json!({}),
                            }),
                        },
                        ResponsePart {
                            text: None,
                            function_call: Some(ResponseFunctionCall {
                                name: "find_callees".to_string(),
                                args: json!({}),
                            }),
                        },
                    ],
                },
                finish_reason: Some("STOP".to_string()),
            }],
        };
        let result = a.extract_result(response).unwrap();
        assert_eq!(result.tool_calls[0].id, "gemini-call-0");
        assert_eq!(result.tool_calls[1].id, "gemini-call-1");
    }
}
