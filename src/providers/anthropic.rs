//! Anthropic adapter. Structured output is implemented via a single forced
//! tool call whose `input_schema` is the target schema — the vendor's native
//! mechanism for constrained JSON output.

use super::{response_from_raw, validate_structured, EnabledFlag, LlmRequest, LlmResponse, Provider, RawCompletion};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::time::Instant;

const API_BASE: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    http: reqwest::Client,
    api_key: String,
    enabled: EnabledFlag,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self { http: reqwest::Client::new(), api_key, enabled: EnabledFlag::new() }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    async fn complete(&self, model_id: &str, request: &LlmRequest) -> Result<LlmResponse> {
        let started = Instant::now();

        let mut body = json!({
            "model": model_id,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [{ "role": "user", "content": request.prompt }],
        });
        if let Some(system) = &request.system_prompt {
            body["system"] = json!(system);
        }

        let response = self
            .http
            .post(API_BASE)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::TransientLlm(format!("anthropic request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CoreError::TransientLlm(format!("anthropic returned {status}: {text}")));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CoreError::TransientLlm(format!("anthropic response decode failed: {e}")))?;

        let content = payload["content"][0]["text"]
            .as_str()
            .ok_or_else(|| CoreError::TransientLlm("anthropic response missing content".to_string()))?
            .to_string();

        let tokens_in = payload["usage"]["input_tokens"].as_u64();
        let tokens_out = payload["usage"]["output_tokens"].as_u64();

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

        let mut body = json!({
            "model": model_id,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [{ "role": "user", "content": request.prompt }],
            "tools": [{
                "name": "emit_structured_output",
                "description": "Emit the final answer as structured data.",
                "input_schema": schema,
            }],
            "tool_choice": { "type": "tool", "name": "emit_structured_output" },
        });
        if let Some(system) = &request.system_prompt {
            body["system"] = json!(system);
        }

        let response = self
            .http
            .post(API_BASE)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::TransientLlm(format!("anthropic request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CoreError::TransientLlm(format!("anthropic returned {status}: {text}")));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CoreError::TransientLlm(format!("anthropic response decode failed: {e}")))?;

        let tool_use = payload["content"]
            .as_array()
            .and_then(|blocks| blocks.iter().find(|b| b["type"] == "tool_use"))
            .ok_or_else(|| CoreError::StructuredOutputInvalid("anthropic response missing tool_use block".to_string()))?;

        let parsed = tool_use["input"].clone();
        validate_structured(schema, &parsed)?;

        let tokens_in = payload["usage"]["input_tokens"].as_u64();
        let tokens_out = payload["usage"]["output_tokens"].as_u64();

        let llm_response = response_from_raw(
            self.name(),
            model_id,
            &request.action,
            &request.strategy,
            started,
            RawCompletion { content: parsed.to_string(), tokens_in, tokens_out },
        );

        Ok((parsed, llm_response))
    }
}
