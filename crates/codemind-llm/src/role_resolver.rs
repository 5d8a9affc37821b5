//! Per-request role→provider/model resolution (spec §4.4).
//!
//! Startup sources, in order: (1) explicit role-qualified environment
//! variables, (2) default to the local runtime with a caller-supplied
//! fallback model, (3) per-role credential/endpoint derived from the
//! provider choice. Per-request overrides may replace the ROUTER and
//! PARAM models only; MAIN is fixed per deployment.

use codemind_core::config::{self, Role};
use codemind_core::{CodeMindError, Result};

use crate::factory::ProviderConfig;

/// Resolved provider/model for one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleConfig {
    pub provider: String,
    pub model: String,
}

/// Resolved provider/model for all three roles (spec §4.4, glossary
/// "Role").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleResolverConfig {
    pub main: RoleConfig,
    pub router: RoleConfig,
    pub param: RoleConfig,
}

/// Per-request overrides: only ROUTER and PARAM may be replaced.
#[derive(Debug, Clone, Default)]
pub struct RoleOverrides {
    pub router_model: Option<String>,
    pub param_model: Option<String>,
}

fn resolve_role(role: Role, fallback_model: &str) -> Result<RoleConfig> {
    let env = config::role_env(role);
    let provider_explicit = env.provider.is_some();
    let provider = env.provider.unwrap_or_else(|| config::default_local_provider().to_string());

    let model = match env.model {
        Some(model) => model,
        None if provider_explicit => {
            return Err(CodeMindError::Config(format!(
                "provider {provider:?} is explicitly set for this role but its model is empty \
                 and no fallback was supplied; set TRACE_{role_suffix}_MODEL",
                role_suffix = role_env_suffix(role),
            )));
        }
        None => fallback_model.to_string(),
    };

    Ok(RoleConfig { provider, model })
}

fn role_env_suffix(role: Role) -> &'static str {
    match role {
        Role::Main => "MAIN",
        Role::Router => "ROUTER",
        Role::Param => "PARAM",
    }
}

impl RoleResolverConfig {
    /// Load startup configuration for all three roles. `fallback_model` is
    /// the caller-supplied model used when a role's provider defaults to
    /// the local runtime and no explicit model was configured (spec
    /// §4.4's source (2)).
    pub fn load(fallback_model: &str) -> Result<Self> {
        Ok(Self {
            main: resolve_role(Role::Main, fallback_model)?,
            router: resolve_role(Role::Router, fallback_model)?,
            param: resolve_role(Role::Param, fallback_model)?,
        })
    }

    /// Apply per-request overrides. MAIN is copied unchanged; ROUTER and
    /// PARAM models may be replaced. Every field is copied explicitly —
    /// no `..self` structural forwarding — and `self` is never mutated
    /// (spec §4.4).
    pub fn merge_overrides(&self, overrides: &RoleOverrides) -> RoleResolverConfig {
        RoleResolverConfig {
            main: RoleConfig {
                provider: self.main.provider.clone(),
                model: self.main.model.clone(),
            },
            router: RoleConfig {
                provider: self.router.provider.clone(),
                model: overrides.router_model.clone().unwrap_or_else(|| self.router.model.clone()),
            },
            param: RoleConfig {
                provider: self.param.provider.clone(),
                model: overrides.param_model.clone().unwrap_or_else(|| self.param.model.clone()),
            },
        }
    }

    /// Derive a `ProviderConfig` for one role's provider, filling in the
    /// credential/endpoint by provider choice (spec §4.4's source (3)).
    pub fn provider_config_for(&self, role_config: &RoleConfig) -> ProviderConfig {
        let credential = match role_config.provider.as_str() {
            "anthropic" => config::anthropic_api_key(),
            "openai" => config::openai_api_key(),
            "gemini" => config::gemini_api_key(),
            _ => None,
        };
        let base_url = if role_config.provider == config::default_local_provider() {
            Some(config::ollama_base_url())
        } else {
            None
        };
        ProviderConfig {
            provider: role_config.provider.clone(),
            model: role_config.model.clone(),
            base_url,
            credential,
            keep_alive: None,
            context_window: None,
        }
    }
}
