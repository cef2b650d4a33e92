use std::time::Instant;

use async_trait::async_trait;
use coterie_types::ChatMessage;
use reqwest::Client;
use serde_json::json;

use crate::{estimate_cost, CompletionResponse, LatencyWindow, Pricing, Provider, ProviderError, ProviderResult};

/// Covers every LLM HTTP API that speaks an OpenAI-shaped chat completion
/// body: a flat `messages` array (system prompt included as a normal
/// message), a single JSON response with `choices[0].message.content` and a
/// `usage` object. OpenAI, Groq, and Mistral are all instances of this
/// family; so is any self-hosted/gateway provider (Ollama, OpenRouter,
/// Together, Azure, Bedrock's OpenAI-compatible front door, Vertex's OpenAI
/// front door, Copilot) configured with its own base URL.
pub struct OpenAiCompatibleProvider {
    id: String,
    base_url: String,
    api_key: Option<String>,
    models: Vec<String>,
    pricing: Vec<(String, Pricing)>,
    client: Client,
    latency: LatencyWindow,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        models: Vec<String>,
        pricing: Vec<(String, Pricing)>,
    ) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            api_key,
            models,
            pricing,
            client: Client::new(),
            latency: LatencyWindow::new(),
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    fn models(&self) -> &[String] {
        &self.models
    }

    fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    fn cost_per_1k(&self, model: &str) -> Pricing {
        self.pricing
            .iter()
            .find(|(m, _)| m == model)
            .map(|(_, p)| *p)
            .unwrap_or(Pricing {
                input_per_1k: 0.0,
                output_per_1k: 0.0,
            })
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> ProviderResult<CompletionResponse> {
        let Some(api_key) = &self.api_key else {
            return Err(ProviderError::Disabled(self.id.clone()));
        };

        let wire_messages: Vec<_> = messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let started = Instant::now();
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&json!({
                "model": model,
                "messages": wire_messages,
                "max_tokens": max_tokens,
                "temperature": temperature,
                "stream": false,
            }))
            .send()
            .await
            .map_err(|source| ProviderError::Transport {
                provider: self.id.clone(),
                source,
            })?;

        let status = response.status();
        let body: serde_json::Value = response.json().await.map_err(|source| ProviderError::Transport {
            provider: self.id.clone(),
            source,
        })?;

        if !status.is_success() {
            return Err(ProviderError::Http {
                provider: self.id.clone(),
                status: status.as_u16(),
                detail: extract_error(&body).unwrap_or_else(|| body.to_string()),
            });
        }

        let content = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| ProviderError::EmptyResponse(self.id.clone()))?
            .to_string();

        let latency_ms = started.elapsed().as_millis() as u64;
        self.latency.record(latency_ms);

        let input_tokens = body
            .get("usage")
            .and_then(|u| u.get("prompt_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let output_tokens = body
            .get("usage")
            .and_then(|u| u.get("completion_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let pricing = self.cost_per_1k(model);

        Ok(CompletionResponse {
            content,
            input_tokens,
            output_tokens,
            cost_usd: estimate_cost(pricing, input_tokens, output_tokens),
            latency_ms,
            model: model.to_string(),
            provider: self.id.clone(),
        })
    }

    fn average_latency_ms(&self) -> f64 {
        self.latency.average()
    }

    fn record_latency(&self, ms: u64) {
        self.latency.record(ms);
    }
}

fn extract_error(body: &serde_json::Value) -> Option<String> {
    body.get("error")
        .and_then(|e| e.get("message").or(Some(e)))
        .and_then(|v| v.as_str().map(str::to_string).or_else(|| Some(v.to_string())))
}
