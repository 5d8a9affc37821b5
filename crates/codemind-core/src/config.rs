//! Environment-driven configuration shared by every layer that reads
//! credentials, default models, or per-role overrides (spec §6).
//!
//! This module only reads and normalises the raw environment; `RoleResolver`
//! in `codemind-llm` is responsible for merging these values with
//! per-request overrides into a `ProviderConfig` (spec §4.4).

use std::env;
use std::fs;
use std::sync::Once;

use serde::{Deserialize, Serialize};

use crate::error::{CodeMindError, Result};

/// One of the three reasoning roles (spec §4.4, glossary "Role").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Main,
    Router,
    Param,
}

impl Role {
    fn env_suffix(self) -> &'static str {
        match self {
            Role::Main => "MAIN",
            Role::Router => "ROUTER",
            Role::Param => "PARAM",
        }
    }
}

const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-7-sonnet-latest";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-pro";
const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_LOCAL_PROVIDER: &str = "ollama";
const ANTHROPIC_KEY_SECRET_FILE: &str = "/run/secrets/anthropic_api_key";

static OLLAMA_URL_DEPRECATION_WARNING: Once = Once::new();

/// Default model string for a cloud provider, applied when the
/// corresponding `*_MODEL` environment variable is unset (spec §6: "a
/// stable recent model per provider").
pub fn default_model_for_provider(provider: &str) -> Option<&'static str> {
    match provider.to_lowercase().as_str() {
        "anthropic" => Some(DEFAULT_ANTHROPIC_MODEL),
        "openai" => Some(DEFAULT_OPENAI_MODEL),
        "gemini" => Some(DEFAULT_GEMINI_MODEL),
        _ => None,
    }
}

/// Read `ANTHROPIC_API_KEY`, falling back to the single-line secret file
/// at `/run/secrets/anthropic_api_key` (spec §6).
pub fn anthropic_api_key() -> Option<String> {
    if let Ok(key) = env::var("ANTHROPIC_API_KEY") {
        if !key.is_empty() {
            return Some(key);
        }
    }
    fs::read_to_string(ANTHROPIC_KEY_SECRET_FILE)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn openai_api_key() -> Option<String> {
    env::var("OPENAI_API_KEY").ok().filter(|s| !s.is_empty())
}

pub fn gemini_api_key() -> Option<String> {
    env::var("GEMINI_API_KEY").ok().filter(|s| !s.is_empty())
}

/// Default model for a cloud provider's `*_MODEL` environment variable.
pub fn claude_model() -> String {
    env::var("CLAUDE_MODEL").unwrap_or_else(|_| DEFAULT_ANTHROPIC_MODEL.to_string())
}

pub fn openai_model() -> String {
    env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_OPENAI_MODEL.to_string())
}

pub fn gemini_model() -> String {
    env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_GEMINI_MODEL.to_string())
}

/// Local-runtime endpoint. Prefers `OLLAMA_BASE_URL`; falls back to the
/// deprecated `OLLAMA_URL`, logging a one-time warning (spec §6).
pub fn ollama_base_url() -> String {
    if let Ok(url) = env::var("OLLAMA_BASE_URL") {
        if !url.is_empty() {
            return url;
        }
    }
    if let Ok(url) = env::var("OLLAMA_URL") {
        if !url.is_empty() {
            OLLAMA_URL_DEPRECATION_WARNING.call_once(|| {
                tracing::warn!("OLLAMA_URL is deprecated; set OLLAMA_BASE_URL instead");
            });
            return url;
        }
    }
    DEFAULT_OLLAMA_BASE_URL.to_string()
}

/// Raw per-role environment overrides, before merging with code-level
/// fallbacks (spec §4.4).
#[derive(Debug, Clone, Default)]
pub struct RoleEnv {
    pub provider: Option<String>,
    pub model: Option<String>,
}

/// Read `TRACE_{ROLE}_PROVIDER` / `TRACE_{ROLE}_MODEL` for one role.
pub fn role_env(role: Role) -> RoleEnv {
    let suffix = role.env_suffix();
    RoleEnv {
        provider: env::var(format!("TRACE_{suffix}_PROVIDER")).ok().filter(|s| !s.is_empty()),
        model: env::var(format!("TRACE_{suffix}_MODEL")).ok().filter(|s| !s.is_empty()),
    }
}

pub fn default_local_provider() -> &'static str {
    DEFAULT_LOCAL_PROVIDER
}

/// Optional system-message text for the single-prompt `generate` entry
/// point (spec §6).
pub fn system_role_prompt_persona() -> Option<String> {
    env::var("SYSTEM_ROLE_PROMPT_PERSONA").ok().filter(|s| !s.is_empty())
}

/// Require a non-empty credential for a cloud provider, producing a
/// `ConfigError` naming the offending variable otherwise (spec §4.3(b),
/// §7.1).
pub fn require_credential(provider: &str, credential: Option<String>, env_var: &str) -> Result<String> {
    credential.filter(|s| !s.is_empty()).ok_or_else(|| {
        CodeMindError::Config(format!(
            "{provider}: missing credential; set {env_var}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_known_providers() {
        assert_eq!(default_model_for_provider("anthropic"), Some(DEFAULT_ANTHROPIC_MODEL));
        assert_eq!(default_model_for_provider("OpenAI"), Some(DEFAULT_OPENAI_MODEL));
        assert_eq!(default_model_for_provider("gemini"), Some(DEFAULT_GEMINI_MODEL));
        assert_eq!(default_model_for_provider("ollama"), None);
    }

    #[test]
    fn require_credential_names_the_env_var() {
        let err = require_credential("anthropic", None, "ANTHROPIC_API_KEY").unwrap_err();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn require_credential_rejects_empty_string() {
        let err = require_credential("anthropic", Some(String::new()), "ANTHROPIC_API_KEY").unwrap_err();
        assert!(matches!(err, CodeMindError::Config(_)));
    }
}
