//! OpenAI adapter. Structured output uses the native
//! `response_format: {type: "json_schema", json_schema: {...}}` mode.

use super::{response_from_raw, validate_structured, EnabledFlag, LlmRequest, LlmResponse, Provider, RawCompletion};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::time::Instant;

const API_BASE: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    enabled: EnabledFlag,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Self {
        Self { http: reqwest::Client::new(), api_key, enabled: EnabledFlag::new() }
    }

    fn messages(request: &LlmRequest) -> Vec<serde_json::Value> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));
        messages
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    async fn complete(&self, model_id: &str, request: &LlmRequest) -> Result<LlmResponse> {
        let started = Instant::now();

        let body = json!({
            "model": model_id,
            "messages": Self::messages(request),
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
            .map_err(|e| CoreError::TransientLlm(format!("openai request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CoreError::TransientLlm(format!("openai returned {status}: {text}")));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CoreError::TransientLlm(format!("openai response decode failed: {e}")))?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| CoreError::TransientLlm("openai response missing content".to_string()))?
            .to_string();

        let tokens_in = payload["usage"]["prompt_tokens"].as_u64();
        let tokens_out = payload["usage"]["completion_tokens"].as_u64();

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

        let body = json!({
            "model": model_id,
            "messages": Self::messages(request),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "course_structuring_output",
                    "schema": schema,
                    "strict": true,
                }
            }
        });

        let response = self
            .http
            .post(API_BASE)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::TransientLlm(format!("openai request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CoreError::TransientLlm(format!("openai returned {status}: {text}")));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CoreError::TransientLlm(format!("openai response decode failed: {e}")))?;

        let text = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| CoreError::StructuredOutputInvalid("openai response missing content".to_string()))?;

        let parsed: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| CoreError::StructuredOutputInvalid(format!("could not parse JSON response: {e}")))?;
        validate_structured(schema, &parsed)?;

        let tokens_in = payload["usage"]["prompt_tokens"].as_u64();
        let tokens_out = payload["usage"]["completion_tokens"].as_u64();

        let llm_response = response_from_raw(
            self.name(),
            model_id,
            &request.action,
            &request.strategy,
            started,
            RawCompletion { content: text.to_string(), tokens_in, tokens_out },
        );

        Ok((parsed, llm_response))
    }
}
