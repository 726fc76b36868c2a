//! Model Router — the core of the core (§4.3). Two-level fallback dispatcher:
//! within a chain, each model gets up to `max_retries` attempts; if the whole
//! chain is exhausted and the requested strategy wasn't `default`, the router
//! retries once more against the `default` chain.

use crate::error::{CoreError, Result};
use crate::providers::{LlmRequest, LlmResponse, Provider, ProviderRegistry};
use crate::registry::{ModelConfig, ModelRegistry, DEFAULT_STRATEGY};
use crate::retry::RetryConfig;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Sink for the ledger callback fired on every terminal per-model attempt.
/// Implementations must never let a failure escape `record` — the router
/// catches and logs it so a ledger outage can never fail the business call.
#[async_trait]
pub trait LedgerSink: Send + Sync {
    async fn record(&self, response: &LlmResponse, success: bool, error_message: Option<String>);
}

/// Ledger sink that does nothing; the default when no callback is wired up.
pub struct NoopLedgerSink;

#[async_trait]
impl LedgerSink for NoopLedgerSink {
    async fn record(&self, _response: &LlmResponse, _success: bool, _error_message: Option<String>) {}
}

#[derive(Clone, Copy)]
enum CompletionMode<'a> {
    Plain,
    Structured(&'a serde_json::Value),
}

pub struct ModelRouter {
    registry: Arc<ModelRegistry>,
    providers: Arc<ProviderRegistry>,
    ledger: Arc<dyn LedgerSink>,
    retry: RetryConfig,
}

impl ModelRouter {
    pub fn new(registry: Arc<ModelRegistry>, providers: Arc<ProviderRegistry>) -> Self {
        Self { registry, providers, ledger: Arc::new(NoopLedgerSink), retry: RetryConfig::default() }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn LedgerSink>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn complete(
        &self,
        action: &str,
        prompt: &str,
        system_prompt: Option<&str>,
        temperature: f32,
        max_tokens: u32,
        strategy: &str,
    ) -> Result<LlmResponse> {
        let request = LlmRequest {
            prompt: prompt.to_string(),
            system_prompt: system_prompt.map(|s| s.to_string()),
            temperature,
            max_tokens,
            action: action.to_string(),
            strategy: strategy.to_string(),
        };
        let (_, response) = self.run(action, request, CompletionMode::Plain).await?;
        Ok(response)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn complete_structured(
        &self,
        action: &str,
        prompt: &str,
        schema: &serde_json::Value,
        system_prompt: Option<&str>,
        temperature: f32,
        max_tokens: u32,
        strategy: &str,
    ) -> Result<(serde_json::Value, LlmResponse)> {
        let request = LlmRequest {
            prompt: prompt.to_string(),
            system_prompt: system_prompt.map(|s| s.to_string()),
            temperature,
            max_tokens,
            action: action.to_string(),
            strategy: strategy.to_string(),
        };
        let (parsed, response) = self.run(action, request, CompletionMode::Structured(schema)).await?;
        Ok((parsed.expect("structured mode always returns a parsed value"), response))
    }

    async fn run(
        &self,
        action: &str,
        request: LlmRequest,
        mode: CompletionMode<'_>,
    ) -> Result<(Option<serde_json::Value>, LlmResponse)> {
        let requested_strategy = request.strategy.clone();
        let mut strategies_tried = Vec::new();
        let mut errors: Vec<(String, String)> = Vec::new();

        let mut strategy = requested_strategy.clone();
        loop {
            strategies_tried.push(strategy.clone());

            match self.try_chain(action, &strategy, &request, mode, &mut errors).await {
                Ok((parsed, mut response)) => {
                    if strategy != requested_strategy {
                        response.strategy = format!("{requested_strategy}\u{2192}{DEFAULT_STRATEGY}");
                    }
                    return Ok((parsed, response));
                }
                Err(()) => {
                    // Never self-fallback from default, and never fall back twice.
                    if strategy == DEFAULT_STRATEGY || strategy != requested_strategy {
                        break;
                    }
                    strategy = DEFAULT_STRATEGY.to_string();
                }
            }
        }

        Err(CoreError::AllModelsFailed {
            action: action.to_string(),
            strategies_tried,
            errors,
        })
    }

    /// Attempt every model in the `(action, strategy)` chain, in declared
    /// order, with up to `max_attempts` tries per model. `Err(())` signals the
    /// caller that the whole chain is exhausted.
    async fn try_chain(
        &self,
        action: &str,
        strategy: &str,
        request: &LlmRequest,
        mode: CompletionMode<'_>,
        errors: &mut Vec<(String, String)>,
    ) -> std::result::Result<(Option<serde_json::Value>, LlmResponse), ()> {
        let chain = match self.registry.get_chain(action, strategy) {
            Ok(chain) => chain,
            Err(e) => {
                errors.push(("<registry>".to_string(), e.to_string()));
                return Err(());
            }
        };

        for model in chain {
            let Some(provider) = self.providers.get(&model.provider) else {
                debug!(model_id = %model.model_id, provider = %model.provider, "provider unregistered, skipping");
                errors.push((model.model_id.clone(), format!("provider '{}' is not registered", model.provider)));
                continue;
            };

            if !provider.is_enabled() {
                debug!(model_id = %model.model_id, provider = %model.provider, "provider disabled, skipping");
                errors.push((model.model_id.clone(), format!("provider '{}' is disabled", model.provider)));
                continue;
            }

            match self.try_model(&model, provider, strategy, request, mode).await {
                Ok((parsed, response)) => return Ok((parsed, response)),
                Err(message) => {
                    errors.push((model.model_id.clone(), message.clone()));
                    self.emit_failure_ledger_event(action, strategy, &model, message).await;
                }
            }
        }

        Err(())
    }

    async fn try_model(
        &self,
        model: &ModelConfig,
        provider: Arc<dyn Provider>,
        strategy: &str,
        request: &LlmRequest,
        mode: CompletionMode<'_>,
    ) -> std::result::Result<(Option<serde_json::Value>, LlmResponse), String> {
        let mut last_error = String::new();

        for attempt in 1..=self.retry.max_attempts {
            let mut request = request.clone();
            request.strategy = strategy.to_string();

            let outcome = match mode {
                CompletionMode::Plain => provider
                    .complete(&model.model_id, &request)
                    .await
                    .map(|response| (None, response)),
                CompletionMode::Structured(schema) => provider
                    .complete_structured(&model.model_id, &request, schema)
                    .await
                    .map(|(value, response)| (Some(value), response)),
            };

            match outcome {
                Ok((parsed, mut response)) => {
                    if let (Some(tokens_in), Some(tokens_out)) = (response.tokens_in, response.tokens_out) {
                        response.cost_usd = Some(model.estimate_cost(tokens_in, tokens_out));
                    }
                    self.ledger.record(&response, true, None).await;
                    return Ok((parsed, response));
                }
                Err(e) => {
                    warn!(model_id = %model.model_id, attempt, error = %e, "provider attempt failed");
                    last_error = e.to_string();

                    if attempt < self.retry.max_attempts {
                        let delay = self.retry.backoff.calculate_delay(attempt, self.retry.jitter_factor);
                        sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error)
    }

    async fn emit_failure_ledger_event(
        &self,
        action: &str,
        strategy: &str,
        model: &ModelConfig,
        message: String,
    ) {
        let response = LlmResponse {
            content: String::new(),
            provider: model.provider.clone(),
            model_id: model.model_id.clone(),
            tokens_in: None,
            tokens_out: None,
            latency_ms: 0,
            cost_usd: None,
            action: action.to_string(),
            strategy: strategy.to_string(),
            finished_at: chrono::Utc::now(),
        };
        self.ledger.record(&response, false, Some(message)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubProvider {
        name: &'static str,
        enabled: AtomicBool,
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn is_enabled(&self) -> bool {
            self.enabled.load(Ordering::Relaxed)
        }

        fn set_enabled(&self, enabled: bool) {
            self.enabled.store(enabled, Ordering::Relaxed);
        }

        async fn complete(&self, model_id: &str, request: &LlmRequest) -> Result<LlmResponse> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                return Err(CoreError::TransientLlm(format!("{} unavailable", self.name)));
            }
            Ok(LlmResponse {
                content: "ok".to_string(),
                provider: self.name.to_string(),
                model_id: model_id.to_string(),
                tokens_in: Some(1000),
                tokens_out: Some(500),
                latency_ms: 1,
                cost_usd: None,
                action: request.action.clone(),
                strategy: request.strategy.clone(),
                finished_at: chrono::Utc::now(),
            })
        }

        async fn complete_structured(
            &self,
            _model_id: &str,
            _request: &LlmRequest,
            _schema: &serde_json::Value,
        ) -> Result<(serde_json::Value, LlmResponse)> {
            unimplemented!("not exercised in these tests")
        }
    }

    fn registry_with(yaml: &str) -> Arc<ModelRegistry> {
        Arc::new(ModelRegistry::load_from_str(yaml).unwrap())
    }

    #[tokio::test]
    async fn cross_strategy_fallback_to_default() {
        let yaml = r#"
models:
  m_a:
    provider: p_a
    capabilities: []
    max_context: 8000
    cost_per_1k: { input: 0.001, output: 0.002 }
  m_b:
    provider: p_b
    capabilities: []
    max_context: 8000
    cost_per_1k: { input: 0.001, output: 0.002 }
actions:
  a:
    description: ""
    requires: []
routing:
  a:
    quality: [m_b]
    default: [m_a]
"#;
        let registry = registry_with(yaml);
        let mut providers = ProviderRegistry::default();
        providers.insert(Arc::new(StubProvider {
            name: "p_b",
            enabled: AtomicBool::new(true),
            fail: true,
            calls: AtomicUsize::new(0),
        }));
        providers.insert(Arc::new(StubProvider {
            name: "p_a",
            enabled: AtomicBool::new(true),
            fail: false,
            calls: AtomicUsize::new(0),
        }));

        let router = ModelRouter::new(registry, Arc::new(providers))
            .with_retry_config(RetryConfig::no_retry());

        let response = router
            .complete("a", "hi", None, 0.0, 100, "quality")
            .await
            .unwrap();

        assert_eq!(response.provider, "p_a");
        assert!(response.strategy.contains("default"));
        assert_eq!(response.cost_usd, Some(0.002));
        assert_eq!(response.action, "a");
    }

    #[tokio::test]
    async fn default_strategy_never_retries_itself() {
        let yaml = r#"
models:
  m_a:
    provider: p_a
    capabilities: []
    max_context: 8000
    cost_per_1k: { input: 0.001, output: 0.002 }
actions:
  a:
    description: ""
    requires: []
routing:
  a:
    default: [m_a]
"#;
        let registry = registry_with(yaml);
        let mut providers = ProviderRegistry::default();
        providers.insert(Arc::new(StubProvider {
            name: "p_a",
            enabled: AtomicBool::new(true),
            fail: true,
            calls: AtomicUsize::new(0),
        }));

        let router = ModelRouter::new(registry, Arc::new(providers))
            .with_retry_config(RetryConfig::no_retry());

        let err = router.complete("a", "hi", None, 0.0, 100, "default").await.unwrap_err();
        match err {
            CoreError::AllModelsFailed { strategies_tried, .. } => {
                assert_eq!(strategies_tried, vec!["default".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabled_provider_produces_exactly_one_skip_entry() {
        let yaml = r#"
models:
  m_a:
    provider: p_a
    capabilities: []
    max_context: 8000
    cost_per_1k: { input: 0.001, output: 0.002 }
actions:
  a:
    description: ""
    requires: []
routing:
  a:
    default: [m_a]
"#;
        let registry = registry_with(yaml);
        let mut providers = ProviderRegistry::default();
        providers.insert(Arc::new(StubProvider {
            name: "p_a",
            enabled: AtomicBool::new(false),
            fail: false,
            calls: AtomicUsize::new(0),
        }));

        let router = ModelRouter::new(registry, Arc::new(providers))
            .with_retry_config(RetryConfig::no_retry());

        let err = router.complete("a", "hi", None, 0.0, 100, "default").await.unwrap_err();
        match err {
            CoreError::AllModelsFailed { errors, .. } => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].0, "m_a");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn ledger_sink_records_success_and_failure() {
        struct RecordingSink {
            events: Mutex<Vec<(bool, Option<String>)>>,
        }

        #[async_trait]
        impl LedgerSink for RecordingSink {
            async fn record(&self, _response: &LlmResponse, success: bool, error_message: Option<String>) {
                self.events.lock().unwrap().push((success, error_message));
            }
        }

        let yaml = r#"
models:
  m_a:
    provider: p_a
    capabilities: []
    max_context: 8000
    cost_per_1k: { input: 0.001, output: 0.002 }
actions:
  a:
    description: ""
    requires: []
routing:
  a:
    default: [m_a]
"#;
        let registry = registry_with(yaml);
        let mut providers = ProviderRegistry::default();
        providers.insert(Arc::new(StubProvider {
            name: "p_a",
            enabled: AtomicBool::new(true),
            fail: false,
            calls: AtomicUsize::new(0),
        }));

        let sink = Arc::new(RecordingSink { events: Mutex::new(Vec::new()) });
        let router = ModelRouter::new(registry, Arc::new(providers))
            .with_ledger(sink.clone())
            .with_retry_config(RetryConfig::no_retry());

        router.complete("a", "hi", None, 0.0, 100, "default").await.unwrap();

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].0);
    }
}
