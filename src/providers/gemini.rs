//! Gemini adapter — also the vision backend for the video/presentation
//! ingestion processors (§4.5).

use super::{
    parse_structured_text, response_from_raw, validate_structured, EnabledFlag, LlmRequest,
    LlmResponse, Provider, RawCompletion,
};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::time::Instant;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: String,
    enabled: EnabledFlag,
}

impl GeminiProvider {
    pub fn new(api_key: String) -> Self {
        Self { http: reqwest::Client::new(), api_key, enabled: EnabledFlag::new() }
    }

    async fn generate(&self, model_id: &str, system_prompt: Option<&str>, prompt: &str, temperature: f32, max_tokens: u32) -> Result<RawCompletion> {
        let url = format!("{API_BASE}/{model_id}:generateContent?key={}", self.api_key);

        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": temperature,
                "maxOutputTokens": max_tokens,
            }
        });
        if let Some(system) = system_prompt {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::TransientLlm(format!("gemini request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CoreError::TransientLlm(format!("gemini returned {status}: {text}")));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CoreError::TransientLlm(format!("gemini response decode failed: {e}")))?;

        let content = payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| CoreError::TransientLlm("gemini response missing content".to_string()))?
            .to_string();

        let tokens_in = payload["usageMetadata"]["promptTokenCount"].as_u64();
        let tokens_out = payload["usageMetadata"]["candidatesTokenCount"].as_u64();

        Ok(RawCompletion { content, tokens_in, tokens_out })
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    async fn complete(&self, model_id: &str, request: &LlmRequest) -> Result<LlmResponse> {
        let started = Instant::now();
        let raw = self
            .generate(
                model_id,
                request.system_prompt.as_deref(),
                &request.prompt,
                request.temperature,
                request.max_tokens,
            )
            .await?;
        Ok(response_from_raw(self.name(), model_id, &request.action, &request.strategy, started, raw))
    }

    async fn complete_structured(
        &self,
        model_id: &str,
        request: &LlmRequest,
        schema: &serde_json::Value,
    ) -> Result<(serde_json::Value, LlmResponse)> {
        let started = Instant::now();
        let url = format!("{API_BASE}/{model_id}:generateContent?key={}", self.api_key);

        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
                "responseMimeType": "application/json",
                "responseSchema": schema,
            }
        });
        if let Some(system) = &request.system_prompt {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::TransientLlm(format!("gemini request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CoreError::TransientLlm(format!("gemini returned {status}: {text}")));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CoreError::TransientLlm(format!("gemini response decode failed: {e}")))?;

        let text = payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| CoreError::StructuredOutputInvalid("gemini response missing content".to_string()))?;

        let parsed = parse_structured_text(text)?;
        validate_structured(schema, &parsed)?;

        let tokens_in = payload["usageMetadata"]["promptTokenCount"].as_u64();
        let tokens_out = payload["usageMetadata"]["candidatesTokenCount"].as_u64();

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
