//! `ProviderFactory` and `ModelLifecycleManager` (spec §4.3).
//!
//! Grounded on the teacher's `llm_factory.rs`: a `match` on the lower-cased
//! provider name, a per-provider constructor reading config plus
//! environment-variable fallbacks, and a hard error listing the valid
//! provider set for anything unrecognised.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codemind_core::{CodeMindError, Result};
use parking_lot::RwLock;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::info;

use crate::adapter::LLMAdapter;
use crate::anthropic::{AnthropicAdapter, AnthropicConfig};
use crate::gemini::{GeminiAdapter, GeminiConfig};
use crate::ollama::{OllamaAdapter, OllamaConfig};
use crate::openai::{OpenAiAdapter, OpenAiConfig};

pub const SUPPORTED_PROVIDERS: &[&str] = &["ollama", "anthropic", "openai", "gemini"];
const LOCAL_PROVIDER: &str = "ollama";

/// Requested provider/model/endpoint for one role (spec §4.3).
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub credential: Option<String>,
    pub keep_alive: Option<String>,
    pub context_window: Option<usize>,
}

/// Options accepted by `ModelLifecycleManager::warm` (spec §4.3).
#[derive(Debug, Clone, Default)]
pub struct WarmOptions {
    pub keep_alive: Option<String>,
}

/// Warms/unloads a model ahead of or after use; cloud variants are no-ops
/// that log a single informational event, the local variant delegates to
/// the shared `LocalModelManager` (spec §4.3).
#[async_trait]
pub trait ModelLifecycleManager: Send + Sync {
    async fn warm(&self, model: &str, opts: WarmOptions) -> Result<()>;
    async fn unload(&self, model: &str) -> Result<()>;
    fn is_local(&self) -> bool;
}

/// No-op lifecycle manager used by every cloud provider.
pub struct CloudLifecycleManager {
    provider: String,
}

impl CloudLifecycleManager {
    pub fn new(provider: impl Into<String>) -> Self {
        Self { provider: provider.into() }
    }
}

#[async_trait]
impl ModelLifecycleManager for CloudLifecycleManager {
    async fn warm(&self, model: &str, _opts: WarmOptions) -> Result<()> {
        info!(provider = %self.provider, model, "cloud provider warm is a no-op");
        Ok(())
    }

    async fn unload(&self, model: &str) -> Result<()> {
        info!(provider = %self.provider, model, "cloud provider unload is a no-op");
        Ok(())
    }

    fn is_local(&self) -> bool {
        false
    }
}

/// Shared coordinator for the local runtime's model warmups. Serialises
/// concurrent warmups against the same model and coalesces duplicate
/// requests (spec §5, §12): the second caller for a model already
/// warming waits on the first caller's completion rather than issuing a
/// second warmup request — the same "look up, else compute once, share
/// result" shape the teacher uses for its tool-result cache, applied here
/// to warmup futures instead of tool results.
pub struct LocalModelManager {
    client: reqwest::Client,
    base_url: String,
    warmed: RwLock<HashSet<String>>,
    in_flight: AsyncMutex<HashMap<String, Arc<Notify>>>,
}

impl LocalModelManager {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            warmed: RwLock::new(HashSet::new()),
            in_flight: AsyncMutex::new(HashMap::new()),
        }
    }

    pub async fn warm(&self, model: &str, opts: WarmOptions) -> Result<()> {
        if self.warmed.read().contains(model) {
            return Ok(());
        }

        let notify = {
            let mut guard = self.in_flight.lock().await;
            if let Some(existing) = guard.get(model) {
                let existing = existing.clone();
                drop(guard);
                existing.notified().await;
                return Ok(());
            }
            let notify = Arc::new(Notify::new());
            guard.insert(model.to_string(), notify.clone());
            notify
        };

        let result = self.do_warm(model, &opts).await;
        if result.is_ok() {
            self.warmed.write().insert(model.to_string());
        }
        self.in_flight.lock().await.remove(model);
        notify.notify_waiters();
        result
    }

    async fn do_warm(&self, model: &str, opts: &WarmOptions) -> Result<()> {
        let body = serde_json::json!({
            "model": model,
            "messages": [],
            "keep_alive": opts.keep_alive.clone().unwrap_or_else(|| "5m".to_string()),
        });
        self.client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(Duration::from_secs(30))
            .json(&body)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| crate::adapter::transport_error(LOCAL_PROVIDER, 0, format!("warm failed: {e}")))
    }

    pub async fn unload(&self, model: &str) -> Result<()> {
        self.warmed.write().remove(model);
        let body = serde_json::json!({ "model": model, "messages": [], "keep_alive": 0 });
        self.client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(Duration::from_secs(10))
            .json(&body)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| crate::adapter::transport_error(LOCAL_PROVIDER, 0, format!("unload failed: {e}")))
    }
}

/// Lifecycle manager handed out by the factory for the local provider;
/// delegates every call to the shared `LocalModelManager`.
pub struct LocalLifecycleManager {
    manager: Arc<LocalModelManager>,
}

impl LocalLifecycleManager {
    pub fn new(manager: Arc<LocalModelManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ModelLifecycleManager for LocalLifecycleManager {
    async fn warm(&self, model: &str, opts: WarmOptions) -> Result<()> {
        self.manager.warm(model, opts).await
    }

    async fn unload(&self, model: &str) -> Result<()> {
        self.manager.unload(model).await
    }

    fn is_local(&self) -> bool {
        true
    }
}

/// The three things `ProviderFactory::create` hands back (spec §4.3).
pub struct ProviderBundle {
    pub chat: Arc<dyn LLMAdapter>,
    pub agent: Arc<dyn LLMAdapter>,
    pub lifecycle: Arc<dyn ModelLifecycleManager>,
}

pub struct ProviderFactory;

impl ProviderFactory {
    /// Construct a provider bundle. `local_manager` must be `Some` when
    /// `config.provider` names the local runtime; its absence fails with a
    /// message explaining the all-cloud case (spec §4.3(a)).
    pub fn create(config: &ProviderConfig, local_manager: Option<Arc<LocalModelManager>>) -> Result<ProviderBundle> {
        match config.provider.to_lowercase().as_str() {
            LOCAL_PROVIDER => {
                let manager = local_manager.ok_or_else(|| {
                    CodeMindError::Config(
                        "ollama: local runtime requires a shared model-manager reference; this \
                         deployment is all-cloud if no local manager was constructed"
                            .to_string(),
                    )
                })?;
                let adapter = Arc::new(OllamaAdapter::new(OllamaConfig {
                    model: config.model.clone(),
                    base_url: config.base_url.clone().unwrap_or_else(codemind_core::config::ollama_base_url),
                    context_window: config.context_window.unwrap_or(128_000),
                    timeout: Duration::from_secs(90),
                    keep_alive: config.keep_alive.clone(),
                }));
                Ok(ProviderBundle {
                    chat: adapter.clone(),
                    agent: adapter,
                    lifecycle: Arc::new(LocalLifecycleManager::new(manager)),
                })
            }
            "anthropic" => {
                let credential = codemind_core::config::require_credential(
                    "anthropic",
                    config.credential.clone(),
                    "ANTHROPIC_API_KEY",
                )?;
                let adapter = Arc::new(AnthropicAdapter::new(AnthropicConfig {
                    api_key: credential,
                    model: config.model.clone(),
                    base_url: config
                        .base_url
                        .clone()
                        .unwrap_or_else(|| "https://api.anthropic.com/v1".to_string()),
                    context_window: config.context_window.unwrap_or(200_000),
                    timeout: Duration::from_secs(120),
                    max_retries: 3,
                }));
                Ok(ProviderBundle {
                    chat: adapter.clone(),
                    agent: adapter,
                    lifecycle: Arc::new(CloudLifecycleManager::new("anthropic")),
                })
            }
            "openai" => {
                let credential =
                    codemind_core::config::require_credential("openai", config.credential.clone(), "OPENAI_API_KEY")?;
                let adapter = Arc::new(OpenAiAdapter::new(OpenAiConfig {
                    api_key: credential,
                    model: config.model.clone(),
                    base_url: config.base_url.clone().unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                    context_window: config.context_window.unwrap_or(128_000),
                    timeout: Duration::from_secs(120),
                    max_retries: 3,
                    organization: None,
                }));
                Ok(ProviderBundle {
                    chat: adapter.clone(),
                    agent: adapter,
                    lifecycle: Arc::new(CloudLifecycleManager::new("openai")),
                })
            }
            "gemini" => {
                let credential =
                    codemind_core::config::require_credential("gemini", config.credential.clone(), "GEMINI_API_KEY")?;
                let adapter = Arc::new(GeminiAdapter::new(GeminiConfig {
                    api_key: credential,
                    model: config.model.clone(),
                    base_url: config
                        .base_url
                        .clone()
                        .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
                    context_window: config.context_window.unwrap_or(1_000_000),
                    timeout: Duration::from_secs(120),
                    max_retries: 3,
                }));
                Ok(ProviderBundle {
                    chat: adapter.clone(),
                    agent: adapter,
                    lifecycle: Arc::new(CloudLifecycleManager::new("gemini")),
                })
            }
            other => Err(CodeMindError::Config(format!(
                "unknown provider {other:?}; supported providers are {}",
                SUPPORTED_PROVIDERS.join(", ")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str) -> ProviderConfig {
        ProviderConfig {
            provider: provider.to_string(),
            model: "test-model".to_string(),
            base_url: None,
            credential: Some("test-credential-0123456789".to_string()),
            keep_alive: None,
            context_window: None,
        }
    }

    #[test]
    fn unknown_provider_lists_valid_set() {
        let err = ProviderFactory::create(&config("bogus"), None).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("bogus"));
        for provider in SUPPORTED_PROVIDERS {
            assert!(message.contains(provider));
        }
    }

    #[test]
    fn local_provider_without_manager_fails_with_all_cloud_explanation() {
        let err = ProviderFactory::create(&config(LOCAL_PROVIDER), None).unwrap_err();
        assert!(err.to_string().contains("all-cloud"));
    }

    #[test]
    fn local_provider_with_manager_succeeds() {
        let manager = Arc::new(LocalModelManager::new("http://localhost:11434"));
        let bundle = ProviderFactory::create(&config(LOCAL_PROVIDER), Some(manager)).unwrap();
        assert!(bundle.lifecycle.is_local());
    }

    #[test]
    fn cloud_provider_requires_non_empty_credential() {
        let mut cfg = config("anthropic");
        cfg.credential = None;
        let err = ProviderFactory::create(&cfg, None).unwrap_err();
        assert!(matches!(err, CodeMindError::Config(_)));
    }

    #[test]
    fn cloud_provider_lifecycle_is_not_local() {
        let bundle = ProviderFactory::create(&config("openai"), None).unwrap();
        assert!(!bundle.lifecycle.is_local());
    }
}
