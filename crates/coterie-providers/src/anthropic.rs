use std::time::Instant;

use async_trait::async_trait;
use coterie_types::{ChatMessage, Role};
use reqwest::Client;
use serde_json::json;

use crate::{estimate_cost, CompletionResponse, LatencyWindow, Pricing, Provider, ProviderError, ProviderResult};

const API_VERSION: &str = "2023-06-01";

/// Anthropic's Messages API pulls the system prompt out of the `messages`
/// array into its own top-level `system` field; everything else (role,
/// content, usage accounting) mirrors the OpenAI-shaped family.
pub struct AnthropicProvider {
    api_key: Option<String>,
    models: Vec<String>,
    pricing: Vec<(String, Pricing)>,
    client: Client,
    latency: LatencyWindow,
}

impl AnthropicProvider {
    pub fn new(api_key: Option<String>, models: Vec<String>, pricing: Vec<(String, Pricing)>) -> Self {
        Self {
            api_key,
            models,
            pricing,
            client: Client::new(),
            latency: LatencyWindow::new(),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
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
            return Err(ProviderError::Disabled("anthropic".to_string()));
        };

        let system: String = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let wire_messages: Vec<_> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                json!({
                    "role": if m.role == Role::Assistant { "assistant" } else { "user" },
                    "content": m.content,
                })
            })
            .collect();

        let started = Instant::now();
        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&json!({
                "model": model,
                "system": system,
                "messages": wire_messages,
                "max_tokens": max_tokens,
                "temperature": temperature,
            }))
            .send()
            .await
            .map_err(|source| ProviderError::Transport {
                provider: "anthropic".to_string(),
                source,
            })?;

        let status = response.status();
        let body: serde_json::Value = response.json().await.map_err(|source| ProviderError::Transport {
            provider: "anthropic".to_string(),
            source,
        })?;

        if !status.is_success() {
            let detail = body
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown anthropic error")
                .to_string();
            return Err(ProviderError::Http {
                provider: "anthropic".to_string(),
                status: status.as_u16(),
                detail,
            });
        }

        let content = body
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.iter().find(|b| b.get("type").and_then(|t| t.as_str()) == Some("text")))
            .and_then(|b| b.get("text"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| ProviderError::EmptyResponse("anthropic".to_string()))?
            .to_string();

        let latency_ms = started.elapsed().as_millis() as u64;
        self.latency.record(latency_ms);

        let input_tokens = body
            .get("usage")
            .and_then(|u| u.get("input_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let output_tokens = body
            .get("usage")
            .and_then(|u| u.get("output_tokens"))
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
            provider: "anthropic".to_string(),
        })
    }

    fn average_latency_ms(&self) -> f64 {
        self.latency.average()
    }

    fn record_latency(&self, ms: u64) {
        self.latency.record(ms);
    }
}
