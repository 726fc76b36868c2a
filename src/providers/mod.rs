//! Uniform provider adapters (§4.2). Every vendor implements the same two
//! operations — free-form completion and schema-validated structured output —
//! behind the [`Provider`] trait, selected at runtime by a name-keyed registry
//! built by [`ProviderFactory`].

mod anthropic;
mod deepseek;
mod gemini;
mod openai;

pub use anthropic::AnthropicProvider;
pub use deepseek::DeepSeekProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

use crate::config::ProviderCredentials;
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub prompt: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    pub action: String,
    pub strategy: String,
}

fn default_temperature() -> f32 {
    0.0
}

fn default_max_tokens() -> u32 {
    8192
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub provider: String,
    pub model_id: String,
    pub tokens_in: Option<u64>,
    pub tokens_out: Option<u64>,
    pub latency_ms: u64,
    pub cost_usd: Option<f64>,
    pub action: String,
    pub strategy: String,
    pub finished_at: DateTime<Utc>,
}

/// Raw text + usage returned by a vendor SDK call, before the router enriches
/// it with cost/action/strategy/provenance.
pub(crate) struct RawCompletion {
    pub content: String,
    pub tokens_in: Option<u64>,
    pub tokens_out: Option<u64>,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);

    async fn complete(&self, model_id: &str, request: &LlmRequest) -> Result<LlmResponse>;

    /// Output must validate against `schema`; otherwise fails with a
    /// structured-output error, which the router treats as transient and
    /// retryable. Vendors without a native structured-output mode inject the
    /// schema into the system prompt and parse the text response themselves.
    async fn complete_structured(
        &self,
        model_id: &str,
        request: &LlmRequest,
        schema: &serde_json::Value,
    ) -> Result<(serde_json::Value, LlmResponse)>;
}

/// Shared helper: times a vendor call and builds the partially-filled
/// `LlmResponse` the router then enriches with cost/provenance.
pub(crate) fn response_from_raw(
    provider: &str,
    model_id: &str,
    action: &str,
    strategy: &str,
    started: Instant,
    raw: RawCompletion,
) -> LlmResponse {
    LlmResponse {
        content: raw.content,
        provider: provider.to_string(),
        model_id: model_id.to_string(),
        tokens_in: raw.tokens_in,
        tokens_out: raw.tokens_out,
        latency_ms: started.elapsed().as_millis() as u64,
        cost_usd: None,
        action: action.to_string(),
        strategy: strategy.to_string(),
        finished_at: Utc::now(),
    }
}

/// Validate a structured-output payload against its JSON schema, mapping a
/// failure to the transient, retryable structured-output error kind.
pub(crate) fn validate_structured(
    schema: &serde_json::Value,
    value: &serde_json::Value,
) -> Result<()> {
    let compiled = jsonschema::JSONSchema::compile(schema)
        .map_err(|e| CoreError::StructuredOutputInvalid(format!("invalid schema: {e}")))?;

    if let Err(errors) = compiled.validate(value) {
        let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
        return Err(CoreError::StructuredOutputInvalid(messages.join("; ")));
    }
    Ok(())
}

/// Injects the target schema into the system prompt for vendors with no
/// native structured-output mode, then parses the response as JSON.
pub(crate) fn schema_prompted_system(system_prompt: Option<&str>, schema: &serde_json::Value) -> String {
    let base = system_prompt.unwrap_or_default();
    format!(
        "{base}\n\nRespond with JSON only, matching this schema exactly:\n{}",
        serde_json::to_string_pretty(schema).unwrap_or_default()
    )
}

pub(crate) fn parse_structured_text(text: &str) -> Result<serde_json::Value> {
    let trimmed = text.trim().trim_start_matches("```json").trim_end_matches("```").trim();
    serde_json::from_str(trimmed)
        .map_err(|e| CoreError::StructuredOutputInvalid(format!("could not parse JSON response: {e}")))
}

/// Maps `provider_name -> provider instance`.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    pub fn insert(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Table-driven construction: a provider is only built when its credential is
/// present in the environment, per §4.2.
pub struct ProviderFactory;

impl ProviderFactory {
    pub fn build(credentials: &ProviderCredentials) -> ProviderRegistry {
        let mut registry = ProviderRegistry::default();

        if let Some(key) = &credentials.gemini {
            registry.insert(Arc::new(GeminiProvider::new(key.clone())));
        }
        if let Some(key) = &credentials.anthropic {
            registry.insert(Arc::new(AnthropicProvider::new(key.clone())));
        }
        if let Some(key) = &credentials.openai {
            registry.insert(Arc::new(OpenAiProvider::new(key.clone())));
        }
        if let Some(key) = &credentials.deepseek {
            registry.insert(Arc::new(DeepSeekProvider::new(key.clone())));
        }

        registry
    }
}

/// Shared runtime-enabled flag: a manual circuit breaker a provider can be
/// switched off with on sustained failure, checked before every dispatch.
pub(crate) struct EnabledFlag(AtomicBool);

impl EnabledFlag {
    pub fn new() -> Self {
        Self(AtomicBool::new(true))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, value: bool) {
        self.0.store(value, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_only_builds_providers_with_credentials() {
        let creds = ProviderCredentials {
            gemini: Some("key".into()),
            anthropic: None,
            openai: None,
            deepseek: None,
        };
        let registry = ProviderFactory::build(&creds);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("gemini").is_some());
        assert!(registry.get("openai").is_none());
    }

    #[test]
    fn enabled_flag_defaults_true_and_toggles() {
        let flag = EnabledFlag::new();
        assert!(flag.get());
        flag.set(false);
        assert!(!flag.get());
    }
}
