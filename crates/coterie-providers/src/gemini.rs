use std::time::Instant;

use async_trait::async_trait;
use coterie_types::{ChatMessage, Role};
use reqwest::Client;
use serde_json::json;

use crate::{estimate_cost, CompletionResponse, LatencyWindow, Pricing, Provider, ProviderError, ProviderResult};

/// Gemini restructures the conversation into a `contents` array of
/// `{role, parts: [{text}]}` objects and lifts the system prompt into a
/// separate `systemInstruction` object, rather than either an OpenAI-shaped
/// messages array or Anthropic's flat `system` string.
pub struct GeminiProvider {
    api_key: Option<String>,
    models: Vec<String>,
    pricing: Vec<(String, Pricing)>,
    client: Client,
    latency: LatencyWindow,
}

impl GeminiProvider {
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
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
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
            return Err(ProviderError::Disabled("gemini".to_string()));
        };

        let system_instruction: Vec<_> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| json!({ "text": m.content }))
            .collect();

        let contents: Vec<_> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                json!({
                    "role": if m.role == Role::Assistant { "model" } else { "user" },
                    "parts": [{ "text": m.content }],
                })
            })
            .collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": max_tokens,
                "temperature": temperature,
            },
        });
        if !system_instruction.is_empty() {
            body["systemInstruction"] = json!({ "parts": system_instruction });
        }

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent?key={api_key}"
        );

        let started = Instant::now();
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|source| ProviderError::Transport {
                provider: "gemini".to_string(),
                source,
            })?;

        let status = response.status();
        let value: serde_json::Value = response.json().await.map_err(|source| ProviderError::Transport {
            provider: "gemini".to_string(),
            source,
        })?;

        if !status.is_success() {
            let detail = value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown gemini error")
                .to_string();
            return Err(ProviderError::Http {
                provider: "gemini".to_string(),
                status: status.as_u16(),
                detail,
            });
        }

        let content = value
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.get(0))
            .and_then(|p| p.get("text"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| ProviderError::EmptyResponse("gemini".to_string()))?
            .to_string();

        let latency_ms = started.elapsed().as_millis() as u64;
        self.latency.record(latency_ms);

        let input_tokens = value
            .get("usageMetadata")
            .and_then(|u| u.get("promptTokenCount"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let output_tokens = value
            .get("usageMetadata")
            .and_then(|u| u.get("candidatesTokenCount"))
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
            provider: "gemini".to_string(),
        })
    }

    fn average_latency_ms(&self) -> f64 {
        self.latency.average()
    }

    fn record_latency(&self, ms: u64) {
        self.latency.record(ms);
    }
}
