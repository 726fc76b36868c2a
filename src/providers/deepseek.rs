//! DeepSeek adapter — a member of the text-only provider family (§4.2): it
//! has no native structured-output mode, so `complete_structured` injects the
//! target schema into the system prompt and parses the resulting text.

use super::{
    parse_structured_text, response_from_raw, schema_prompted_system, validate_structured,
    EnabledFlag, LlmRequest, LlmResponse, Provider, RawCompletion,
};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::time::Instant;

const API_BASE: &str = "https://api.deepseek.com/chat/completions";

pub struct DeepSeekProvider {
    http: reqwest::Client,
    api_key: String,
    enabled: EnabledFlag,
}

impl DeepSeekProvider {
    pub fn new(api_key: String) -> Self {
        Self { http: reqwest::Client::new(), api_key, enabled: EnabledFlag::new() }
    }

    async fn call(&self, model_id: &str, system_prompt: Option<String>, request: &LlmRequest) -> Result<(String, Option<u64>, Option<u64>)> {
        let mut messages = Vec::new();
        if let Some(system) = system_prompt {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));

        let body = json!({
            "model": model_id,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let response = self
            .http
            .post(API_BASE)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::TransientLlm(format!("deepseek request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CoreError::TransientLlm(format!("deepseek returned {status}: {text}")));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CoreError::TransientLlm(format!("deepseek response decode failed: {e}")))?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| CoreError::TransientLlm("deepseek response missing content".to_string()))?
            .to_string();

        let tokens_in = payload["usage"]["prompt_tokens"].as_u64();
        let tokens_out = payload["usage"]["completion_tokens"].as_u64();

        Ok((content, tokens_in, tokens_out))
    }
}

#[async_trait]
impl Provider for DeepSeekProvider {
    fn name(&self) -> &str {
        "deepseek"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    async fn complete(&self, model_id: &str, request: &LlmRequest) -> Result<LlmResponse> {
        let started = Instant::now();
        let (content, tokens_in, tokens_out) =
            self.call(model_id, request.system_prompt.clone(), request).await?;
        Ok(response_from_raw(
            self.name(),
            model_id,
            &request.action,
            &request.strategy,
            started,
            RawCompletion { content, tokens_in, tokens_out },
        ))
    }

    async fn complete_structured(
        &self,
        model_id: &str,
        request: &LlmRequest,
        schema: &serde_json::Value,
    ) -> Result<(serde_json::Value, LlmResponse)> {
        let started = Instant::now();
        let system = schema_prompted_system(request.system_prompt.as_deref(), schema);
        let (content, tokens_in, tokens_out) = self.call(model_id, Some(system), request).await?;

        let parsed = parse_structured_text(&content)?;
        validate_structured(schema, &parsed)?;

        let llm_response = response_from_raw(
            self.name(),
            model_id,
            &request.action,
            &request.strategy,
            started,
            RawCompletion { content, tokens_in, tokens_out },
        );

        Ok((parsed, llm_response))
    }
}
