//! Multi-provider LLM dispatch: a unified contract over heterogeneous
//! cloud APIs plus one local runtime, role-based provider selection, and a
//! shared observability surface (spec §1, §4.2-§4.4, §4.10).

pub mod adapter;
pub mod anthropic;
pub mod factory;
pub mod gemini;
pub mod observability;
pub mod ollama;
pub mod openai;
pub mod role_resolver;

pub use adapter::{
    ChatWithToolsResult, GenerationParams, LLMAdapter, ProviderCharacteristics, StopReason,
    StreamCallback, StreamEvent,
};
pub use codemind_core::CancellationHandle;
pub use factory::{
    CloudLifecycleManager, LocalLifecycleManager, LocalModelManager, ModelLifecycleManager,
    ProviderBundle, ProviderConfig, ProviderFactory, WarmOptions, SUPPORTED_PROVIDERS,
};
pub use observability::{classify_error, Observability};
pub use role_resolver::{RoleConfig, RoleOverrides, RoleResolverConfig};

pub use anthropic::{AnthropicAdapter, AnthropicConfig};
pub use gemini::{GeminiAdapter, GeminiConfig};
pub use ollama::{OllamaAdapter, OllamaConfig};
pub use openai::{OpenAiAdapter, OpenAiConfig};
