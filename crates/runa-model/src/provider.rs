// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Model provider seam.
//!
//! The runtime never speaks HTTP itself: concrete provider clients
//! (OpenAI, Anthropic, OpenRouter, ...) live outside the core and plug in
//! through [`ModelProvider`].  What belongs here is the *contract*: the
//! model reference grammar, API-key/base-URL resolution from the
//! environment, and the registry front-ends use to turn a reference into
//! a live provider.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use crate::types::{CompletionRequest, ResponseEvent};

/// Boxed stream of response events from one completion call.
pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown model provider `{provider}` in `{reference}`")]
    UnknownProvider { provider: String, reference: String },
    #[error("invalid model reference `{0}` (expected provider:model[:suffix])")]
    InvalidReference(String),
    #[error("missing API key: set {var} for provider `{provider}`")]
    AuthenticationMissing { provider: String, var: String },
}

/// A parsed model reference: `provider:model[:envSuffixOrVar]`.
///
/// The optional third segment selects an alternative credential: when it
/// names an existing environment variable it is used verbatim, otherwise
/// it is appended as a suffix to the provider's key variable
/// (`ANTHROPIC_API_KEY_<SUFFIX>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
    pub env_suffix: Option<String>,
}

impl ModelRef {
    pub fn parse(reference: &str) -> Result<Self, ModelError> {
        let mut parts = reference.splitn(3, ':');
        let provider = parts.next().unwrap_or_default().trim();
        let model = parts.next().unwrap_or_default().trim();
        if provider.is_empty() || model.is_empty() {
            return Err(ModelError::InvalidReference(reference.to_string()));
        }
        Ok(Self {
            provider: provider.to_string(),
            model: model.to_string(),
            env_suffix: parts
                .next()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        })
    }

    /// Canonical `provider:model` form (without the credential segment).
    pub fn id(&self) -> String {
        format!("{}:{}", self.provider, self.model)
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Environment variable that carries the API key for `provider`.
fn key_var(provider: &str) -> String {
    format!("{}_API_KEY", provider.to_uppercase())
}

/// Resolve the API key for a model reference.
///
/// Lookup order:
/// 1. When `env_suffix` names an existing environment variable, use it.
/// 2. `<PROVIDER>_API_KEY_<SUFFIX>` when a suffix is present.
/// 3. `<PROVIDER>_API_KEY`.
pub fn resolve_api_key(model: &ModelRef) -> Result<String, ModelError> {
    if let Some(suffix) = &model.env_suffix {
        if let Ok(key) = std::env::var(suffix) {
            return Ok(key);
        }
        let var = format!("{}_{}", key_var(&model.provider), suffix.to_uppercase());
        if let Ok(key) = std::env::var(&var) {
            return Ok(key);
        }
        return Err(ModelError::AuthenticationMissing {
            provider: model.provider.clone(),
            var,
        });
    }
    let var = key_var(&model.provider);
    std::env::var(&var).map_err(|_| ModelError::AuthenticationMissing {
        provider: model.provider.clone(),
        var,
    })
}

/// Resolve an optional base-URL override: `<PROVIDER>_BASE_URL[_SUFFIX]`.
pub fn resolve_base_url(model: &ModelRef) -> Option<String> {
    let base = format!("{}_BASE_URL", model.provider.to_uppercase());
    if let Some(suffix) = &model.env_suffix {
        if let Ok(url) = std::env::var(format!("{base}_{}", suffix.to_uppercase())) {
            return Some(url);
        }
    }
    std::env::var(base).ok()
}

/// A language-model provider capable of streaming completions.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Canonical `provider:model` identifier, used for journaling.
    fn id(&self) -> &str;

    /// Model context window in tokens, when known.
    fn context_window(&self) -> Option<u32> {
        crate::catalog::context_window(self.id())
    }

    /// Open a streaming completion.  The returned stream yields events in
    /// provider emission order and ends with `Done` (or an `Err`).
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;
}

type ProviderFactory =
    Arc<dyn Fn(&ModelRef) -> anyhow::Result<Arc<dyn ModelProvider>> + Send + Sync>;

/// Registry mapping provider names to factories.
///
/// The front-end registers the concrete SDK-backed factories at startup;
/// the `mock` provider is always available so agent documents are testable
/// without network access.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, provider: &str, factory: F)
    where
        F: Fn(&ModelRef) -> anyhow::Result<Arc<dyn ModelProvider>> + Send + Sync + 'static,
    {
        self.factories.insert(provider.to_string(), Arc::new(factory));
    }

    /// Create a provider for `reference`.
    pub fn create(&self, reference: &str) -> anyhow::Result<Arc<dyn ModelProvider>> {
        let model = ModelRef::parse(reference)?;
        match self.factories.get(&model.provider) {
            Some(factory) => factory(&model),
            None => Err(ModelError::UnknownProvider {
                provider: model.provider.clone(),
                reference: reference.to_string(),
            }
            .into()),
        }
    }

    pub fn known_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── ModelRef grammar ──────────────────────────────────────────────────────

    #[test]
    fn parses_provider_and_model() {
        let r = ModelRef::parse("openai:gpt-test").unwrap();
        assert_eq!(r.provider, "openai");
        assert_eq!(r.model, "gpt-test");
        assert!(r.env_suffix.is_none());
    }

    #[test]
    fn parses_credential_suffix() {
        let r = ModelRef::parse("anthropic:claude-sonnet-4-5:WORK").unwrap();
        assert_eq!(r.env_suffix.as_deref(), Some("WORK"));
        assert_eq!(r.id(), "anthropic:claude-sonnet-4-5");
    }

    #[test]
    fn rejects_missing_model() {
        assert!(ModelRef::parse("openai").is_err());
        assert!(ModelRef::parse("openai:").is_err());
        assert!(ModelRef::parse(":gpt").is_err());
    }

    // ── Key resolution ────────────────────────────────────────────────────────

    #[test]
    fn resolves_plain_key_var() {
        std::env::set_var("TESTPROV_API_KEY", "sk-plain");
        let r = ModelRef::parse("testprov:m").unwrap();
        assert_eq!(resolve_api_key(&r).unwrap(), "sk-plain");
    }

    #[test]
    fn suffix_expands_to_suffixed_key_var() {
        std::env::set_var("TESTPROVB_API_KEY_WORK", "sk-work");
        let r = ModelRef::parse("testprovb:m:WORK").unwrap();
        assert_eq!(resolve_api_key(&r).unwrap(), "sk-work");
    }

    #[test]
    fn suffix_naming_a_whole_var_wins() {
        std::env::set_var("MY_EXPLICIT_KEY", "sk-explicit");
        let r = ModelRef::parse("testprovc:m:MY_EXPLICIT_KEY").unwrap();
        assert_eq!(resolve_api_key(&r).unwrap(), "sk-explicit");
    }

    #[test]
    fn missing_key_names_the_variable() {
        let r = ModelRef::parse("ghostprov:m").unwrap();
        let err = resolve_api_key(&r).unwrap_err();
        assert!(err.to_string().contains("GHOSTPROV_API_KEY"), "{err}");
    }

    // ── Registry ──────────────────────────────────────────────────────────────

    #[test]
    fn unknown_provider_is_an_error() {
        let reg = ProviderRegistry::new();
        let err = match reg.create("nobody:model") {
            Err(err) => err,
            Ok(_) => panic!("expected an error"),
        };
        assert!(err.to_string().contains("nobody"), "{err}");
    }

    #[test]
    fn registered_factory_is_used() {
        let mut reg = ProviderRegistry::new();
        reg.register("mock", |m| {
            Ok(Arc::new(crate::MockProvider::new(&m.id(), vec![])) as Arc<dyn ModelProvider>)
        });
        let p = reg.create("mock:fixture").unwrap();
        assert_eq!(p.id(), "mock:fixture");
    }
}
