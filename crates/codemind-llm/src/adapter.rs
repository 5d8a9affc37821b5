//! The unified contract every provider adapter implements (spec §4.2).
//!
//! Each provider's wire quirks — system-prompt lifting, tool-call-id
//! synthesis, caching hints, thinking-budget widening — are load-bearing
//! and live in the provider module, not here (spec §9: "do not attempt a
//! macro-style abstraction over the wire formats").

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use codemind_core::{CancellationHandle, CodeMindError, Result, ToolCall, ToolDefinition};
use serde::{Deserialize, Serialize};

/// Generation parameters accepted by every adapter operation (spec §4.2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: Option<usize>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub stop: Vec<String>,
    pub model_override: Option<String>,
    pub tools: Vec<ToolDefinition>,
    /// "Thinking"/reasoning-token budget. When set, the Anthropic-style
    /// adapter widens its max-tokens ceiling to at least
    /// `budget + 2048` (spec §4.2).
    pub thinking_budget: Option<u32>,
    /// Hint forwarded to local runtimes to keep a model resident
    /// (spec §4.2, §4.3).
    pub keep_alive: Option<String>,
}

impl GenerationParams {
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature,
            ..Default::default()
        }
    }
}

/// Why a `chatWithTools` turn stopped (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    End,
    ToolUse,
}

/// The result of a `chatWithTools` turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatWithToolsResult {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
}

impl ChatWithToolsResult {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One event emitted by a streaming `chatStream` call (spec §4.2, §4.10 the
/// "thinking" stream is distinct from user-visible tokens per spec §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamEvent {
    Token(String),
    Thinking(String),
    Error(String),
}

/// Callback invoked once per `StreamEvent` by `chat_stream`.
pub type StreamCallback = Arc<dyn Fn(StreamEvent) + Send + Sync>;

/// Declared capabilities and rate limits of a provider (spec §4.3,
/// grounded on the teacher's `ProviderCharacteristics`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCharacteristics {
    pub max_tokens: usize,
    pub avg_latency_ms: u64,
    pub rpm_limit: Option<u64>,
    pub tpm_limit: Option<u64>,
    pub supports_streaming: bool,
    pub supports_functions: bool,
}

/// The unified per-provider contract (spec §4.2 "LLMAdapter").
#[async_trait]
pub trait LLMAdapter: Send + Sync + fmt::Debug {
    /// History in, text out.
    async fn chat(
        &self,
        messages: &[codemind_core::ChatMessage],
        params: &GenerationParams,
        cancel: &CancellationHandle,
    ) -> Result<String>;

    /// History plus tool schema in; text and/or tool calls out.
    async fn chat_with_tools(
        &self,
        messages: &[codemind_core::ChatMessage],
        params: &GenerationParams,
        cancel: &CancellationHandle,
    ) -> Result<ChatWithToolsResult>;

    /// Streaming variant. Adapters that do not support streaming keep the
    /// default, which fails with a `Tool`-class error naming the provider;
    /// adapters that do support it override this.
    async fn chat_stream(
        &self,
        _messages: &[codemind_core::ChatMessage],
        _params: &GenerationParams,
        _cancel: &CancellationHandle,
        _on_event: StreamCallback,
    ) -> Result<()> {
        Err(CodeMindError::Tool(format!(
            "{}: streaming is not supported by this adapter",
            self.provider_name()
        )))
    }

    fn supports_tool_calling(&self) -> bool {
        true
    }

    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;

    fn characteristics(&self) -> ProviderCharacteristics;
}

/// Build a `TransportError` already carrying the provider prefix (spec
/// §4.2 "Error contract", §8 "Adapter attribution").
pub fn transport_error(provider: &str, status: u16, message: impl Into<String>) -> CodeMindError {
    CodeMindError::Transport {
        provider: provider.to_string(),
        status,
        message: codemind_core::Redactor::redact(&message.into()),
    }
}

pub fn decode_error(provider: &str, message: impl Into<String>) -> CodeMindError {
    CodeMindError::Decode {
        provider: provider.to_string(),
        message: message.into(),
    }
}

pub fn empty_result_error(provider: &str) -> CodeMindError {
    CodeMindError::EmptyResult {
        provider: provider.to_string(),
    }
}
