mod anthropic;
mod error;
mod gemini;
mod openai_compatible;

pub use anthropic::AnthropicProvider;
pub use error::{ProviderError, ProviderResult};
pub use gemini::GeminiProvider;
pub use openai_compatible::OpenAiCompatibleProvider;

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use coterie_types::ChatMessage;

/// A completion result normalized across every provider family: usage
/// counters, wall-clock latency, and the dollar cost already computed from
/// the adapter's own pricing table.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub model: String,
    pub provider: String,
}

/// Per-million (expressed as per-1k here) token pricing for one model.
#[derive(Debug, Clone, Copy)]
pub struct Pricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Implemented once per LLM HTTP API family. Each adapter owns the
/// translation between the common `ChatMessage` form and whatever body shape
/// its provider expects, and computes cost from its own pricing table.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn models(&self) -> &[String];
    fn is_enabled(&self) -> bool;
    fn cost_per_1k(&self, model: &str) -> Pricing;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> ProviderResult<CompletionResponse>;

    /// Average of the last 10 observed latencies (capped to a 50-sample
    /// window), used by the router's scoring formula.
    fn average_latency_ms(&self) -> f64;
    fn record_latency(&self, ms: u64);
}

/// Shared latency-window bookkeeping every adapter embeds.
pub struct LatencyWindow {
    samples: Mutex<VecDeque<u64>>,
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyWindow {
    const SAMPLE_CAP: usize = 50;
    const AVERAGE_OVER: usize = 10;

    pub fn new() -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(Self::SAMPLE_CAP)),
        }
    }

    pub fn record(&self, ms: u64) {
        let mut samples = self.samples.lock().expect("latency window mutex poisoned");
        samples.push_back(ms);
        while samples.len() > Self::SAMPLE_CAP {
            samples.pop_front();
        }
    }

    pub fn average(&self) -> f64 {
        let samples = self.samples.lock().expect("latency window mutex poisoned");
        let take = samples.len().min(Self::AVERAGE_OVER);
        if take == 0 {
            return 0.0;
        }
        let sum: u64 = samples.iter().rev().take(take).sum();
        sum as f64 / take as f64
    }
}

pub fn is_placeholder_api_key(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("x") || trimmed.eq_ignore_ascii_case("placeholder")
}

pub fn env_api_key_for_provider(id: &str) -> Option<String> {
    let env_name = match id {
        "openai" => "OPENAI_API_KEY",
        "groq" => "GROQ_API_KEY",
        "mistral" => "MISTRAL_API_KEY",
        "anthropic" => "ANTHROPIC_API_KEY",
        "gemini" => "GEMINI_API_KEY",
        "ollama" | "openrouter" | "together" | "azure" | "bedrock" | "vertex" | "copilot" => return env_var_or_none(&format!("{}_API_KEY", id.to_uppercase())),
        _ => return None,
    };
    env_var_or_none(env_name)
}

fn env_var_or_none(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn estimate_cost(pricing: Pricing, input_tokens: u32, output_tokens: u32) -> f64 {
    (input_tokens as f64 / 1000.0) * pricing.input_per_1k + (output_tokens as f64 / 1000.0) * pricing.output_per_1k
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_keys_are_rejected() {
        assert!(is_placeholder_api_key(""));
        assert!(is_placeholder_api_key("x"));
        assert!(is_placeholder_api_key("  placeholder  "));
        assert!(!is_placeholder_api_key("sk-real-looking-key"));
    }

    #[test]
    fn latency_window_averages_last_ten_capped_at_fifty_samples() {
        let window = LatencyWindow::new();
        for ms in 1..=60u64 {
            window.record(ms);
        }
        // last 10 recorded are 51..=60
        let expected: f64 = (51..=60u64).sum::<u64>() as f64 / 10.0;
        assert!((window.average() - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn cost_estimate_is_linear_in_tokens() {
        let pricing = Pricing {
            input_per_1k: 0.01,
            output_per_1k: 0.03,
        };
        let cost = estimate_cost(pricing, 2000, 1000);
        assert!((cost - 0.05).abs() < 1e-9);
    }
}
