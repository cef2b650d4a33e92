//! Layered configuration (§6, §10.L): built-in defaults, overlaid by an
//! optional YAML file, overlaid by environment variables, assembled once
//! into a single JSON value via the same recursive-merge shape the
//! teacher's config store uses for its own layers, then deserialized into
//! a strongly-typed, validated `Config`. No component reaches back into
//! this module after construction — the entry point loads once and
//! threads the result (or its sub-sections) explicitly into constructors.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use coterie_providers::{
    is_placeholder_api_key, AnthropicProvider, GeminiProvider, OpenAiCompatibleProvider, Pricing,
    Provider,
};
use coterie_router::ProviderRegistration;
use coterie_types::TaskTier;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub priority: f64,
    pub cost_per_1k_input: f64,
    pub cost_per_1k_output: f64,
    pub max_requests_per_minute: u32,
    pub timeout_seconds: u64,
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogSettings {
    pub poll_interval_seconds: u64,
    pub cpu_kill_threshold_percent: f32,
    pub cpu_kill_sustained_seconds: u64,
    pub ram_kill_threshold_mb: u64,
    pub heartbeat_timeout_seconds: u64,
    /// Parsed and validated, but the supervisor's kill/restart escalation
    /// runs a fixed 5s/15s/60s schedule (`coterie_supervisor::backoff`)
    /// rather than this array — the curve's shape is an implementation
    /// constant, not a per-deployment tuning knob. Kept in the schema so a
    /// YAML file written against §6 still loads instead of failing.
    #[serde(default)]
    pub restart_backoff_seconds: Vec<u64>,
    pub max_restarts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemorySettings {
    pub db_path: String,
    pub short_term_maxlen: usize,
    pub summarize_every_n_turns: i64,
    pub summary_compression_ratio: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BudgetSettings {
    pub daily_usd: f64,
    pub weekly_usd: f64,
    pub alert_threshold_percent: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AgentBudget {
    pub max_input_tokens: i64,
    pub max_output_tokens: u32,
    pub context_turns: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,
    pub watchdog: WatchdogSettings,
    pub memory: MemorySettings,
    pub budget: BudgetSettings,
    #[serde(default)]
    pub agent_budgets: HashMap<String, AgentBudget>,
    pub telegram_token: Option<String>,
    #[serde(default)]
    pub telegram_allowed_users: Vec<String>,
    pub n8n_webhook_base: Option<String>,
    pub default_model_task: String,
    pub max_tool_iterations: usize,
    pub sandbox_timeout_seconds: u64,
}

impl Config {
    /// Required keys present (guaranteed by the defaults layer) and
    /// numeric ranges sane. Any failure here is a **configuration error**
    /// (§7): the caller exits non-zero before constructing a component.
    fn validate(&self) -> CoreResult<()> {
        if self.budget.daily_usd < 0.0 || self.budget.weekly_usd < 0.0 {
            return Err(CoreError::Config("budget.daily_usd/weekly_usd must be non-negative".into()));
        }
        if !(0.0..=100.0).contains(&self.budget.alert_threshold_percent) {
            return Err(CoreError::Config("budget.alert_threshold_percent must be within 0..=100".into()));
        }
        if self.watchdog.poll_interval_seconds == 0 {
            return Err(CoreError::Config("watchdog.poll_interval_seconds must be > 0".into()));
        }
        if !(0.0..=100.0).contains(&self.watchdog.cpu_kill_threshold_percent) {
            return Err(CoreError::Config("watchdog.cpu_kill_threshold_percent must be within 0..=100".into()));
        }
        if self.watchdog.heartbeat_timeout_seconds == 0 {
            return Err(CoreError::Config("watchdog.heartbeat_timeout_seconds must be > 0".into()));
        }
        if self.watchdog.max_restarts == 0 {
            return Err(CoreError::Config("watchdog.max_restarts must be > 0".into()));
        }
        if self.memory.short_term_maxlen == 0 {
            return Err(CoreError::Config("memory.short_term_maxlen must be > 0".into()));
        }
        if self.memory.summarize_every_n_turns <= 0 {
            return Err(CoreError::Config("memory.summarize_every_n_turns must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.memory.summary_compression_ratio) {
            return Err(CoreError::Config("memory.summary_compression_ratio must be within 0..=1".into()));
        }
        if self.max_tool_iterations == 0 {
            return Err(CoreError::Config("max_tool_iterations must be > 0".into()));
        }
        if self.sandbox_timeout_seconds == 0 {
            return Err(CoreError::Config("sandbox_timeout_seconds must be > 0".into()));
        }
        for (id, settings) in &self.providers {
            if settings.cost_per_1k_input < 0.0 || settings.cost_per_1k_output < 0.0 {
                return Err(CoreError::Config(format!("providers.{id}: cost_per_1k_* must be non-negative")));
            }
            if settings.enabled && settings.models.is_empty() {
                return Err(CoreError::Config(format!("providers.{id}: enabled with no models[] configured")));
            }
            if settings.enabled && !is_known_family(id) && settings.base_url.is_none() {
                return Err(CoreError::Config(format!(
                    "providers.{id}: no built-in base URL known for this provider id, base_url is required"
                )));
            }
        }
        Ok(())
    }
}

fn default_value() -> Value {
    json!({
        "providers": {},
        "watchdog": {
            "poll_interval_seconds": 5,
            "cpu_kill_threshold_percent": 90.0,
            "cpu_kill_sustained_seconds": 30,
            "ram_kill_threshold_mb": 1024,
            "heartbeat_timeout_seconds": 20,
            "restart_backoff_seconds": [5, 15, 60],
            "max_restarts": 5
        },
        "memory": {
            "db_path": "coterie.sqlite3",
            "short_term_maxlen": 20,
            "summarize_every_n_turns": 15,
            "summary_compression_ratio": 0.33
        },
        "budget": {
            "daily_usd": 5.0,
            "weekly_usd": 25.0,
            "alert_threshold_percent": 80.0
        },
        "agent_budgets": {},
        "telegram_token": null,
        "telegram_allowed_users": [],
        "n8n_webhook_base": null,
        "default_model_task": "simple",
        "max_tool_iterations": 6,
        "sandbox_timeout_seconds": 30
    })
}

/// Mirrors the teacher's own layer-assembly primitive: an overlay's object
/// keys recurse into the base, any other value (including an array)
/// replaces the base value outright, and a `null` overlay leaves the base
/// untouched rather than erasing it.
fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}

fn known_provider_ids() -> &'static [&'static str] {
    &[
        "openai", "groq", "mistral", "anthropic", "gemini", "ollama", "openrouter", "together",
        "azure", "bedrock", "vertex", "copilot",
    ]
}

fn is_known_family(id: &str) -> bool {
    matches!(id, "anthropic" | "gemini") || default_base_url(id).is_some()
}

fn default_base_url(id: &str) -> Option<&'static str> {
    match id {
        "openai" => Some("https://api.openai.com/v1"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        "mistral" => Some("https://api.mistral.ai/v1"),
        "ollama" => Some("http://localhost:11434/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "together" => Some("https://api.together.xyz/v1"),
        _ => None,
    }
}

/// Every known provider's API key env var enables it and sets the key
/// (§6), plus a handful of top-level env overrides. Unknown to this layer:
/// anything not named here must come from the YAML file.
fn env_layer() -> Value {
    let mut root = json!({});
    let mut providers = serde_json::Map::new();

    for id in known_provider_ids() {
        if let Some(key) = coterie_providers::env_api_key_for_provider(id) {
            if !is_placeholder_api_key(&key) {
                providers.insert(
                    id.to_string(),
                    json!({ "enabled": true, "api_key": key }),
                );
            }
        }
    }
    if !providers.is_empty() {
        deep_merge(&mut root, &json!({ "providers": Value::Object(providers) }));
    }

    if let Ok(token) = std::env::var("COTERIE_TELEGRAM_TOKEN") {
        if !token.trim().is_empty() {
            deep_merge(&mut root, &json!({ "telegram_token": token }));
            if let Ok(allowed) = std::env::var("COTERIE_TELEGRAM_ALLOWED_USERS") {
                let list: Vec<String> = allowed.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
                if !list.is_empty() {
                    deep_merge(&mut root, &json!({ "telegram_allowed_users": list }));
                }
            }
        }
    }
    if let Ok(base) = std::env::var("COTERIE_N8N_WEBHOOK_BASE") {
        if !base.trim().is_empty() {
            deep_merge(&mut root, &json!({ "n8n_webhook_base": base }));
        }
    }
    if let Ok(daily) = std::env::var("COTERIE_BUDGET_DAILY_USD") {
        if let Ok(v) = daily.parse::<f64>() {
            deep_merge(&mut root, &json!({ "budget": { "daily_usd": v } }));
        }
    }

    root
}

/// Assembles and validates the configuration. `yaml_path` is read if it
/// exists; a missing file is not an error (defaults plus env still apply),
/// matching the spec's "the YAML file... then overlaid by environment
/// variables" wording — env can stand alone for a minimal deployment.
pub fn load(yaml_path: &Path) -> CoreResult<Config> {
    let mut merged = default_value();

    if yaml_path.exists() {
        let raw = std::fs::read_to_string(yaml_path)?;
        let parsed: Value = serde_yaml::from_str(&raw)
            .map_err(|err| CoreError::Config(format!("invalid YAML in {}: {err}", yaml_path.display())))?;
        deep_merge(&mut merged, &parsed);
    }

    deep_merge(&mut merged, &env_layer());

    let config: Config = serde_json::from_value(merged)
        .map_err(|err| CoreError::Config(format!("config does not match the expected schema: {err}")))?;
    config.validate()?;
    Ok(config)
}

/// Model-to-tier assignment for a provider's flat `models[]` list: by
/// convention the list is ordered most- to least-capable, so the first
/// entry serves `complex`, the last serves `fast`, and a shorter list
/// reuses its last entry for the tiers it has none of. A provider with one
/// model therefore uses it uniformly across all three tiers.
fn models_by_tier(models: &[String]) -> HashMap<TaskTier, String> {
    let mut map = HashMap::new();
    if models.is_empty() {
        return map;
    }
    let pick = |i: usize| models.get(i).cloned().unwrap_or_else(|| models.last().unwrap().clone());
    map.insert(TaskTier::Complex, pick(0));
    map.insert(TaskTier::Simple, pick(1));
    map.insert(TaskTier::Fast, pick(2));
    map
}

/// Parses `config.default_model_task` ("complex"/"simple"/"fast") into the
/// tier the CEO's own completions run at — falls back to `Complex` on an
/// unrecognized value rather than failing startup over one cosmetic typo.
pub fn default_tier(config: &Config) -> TaskTier {
    serde_json::from_value(Value::String(config.default_model_task.clone())).unwrap_or(TaskTier::Complex)
}

/// Builds one `ProviderRegistration` per enabled provider in `config`,
/// instantiating the adapter family the teacher's env-layer already picks
/// by provider id (anthropic and gemini get their own adapters; everything
/// else speaks the OpenAI-compatible family against either its built-in
/// base URL or the one named in config).
pub fn providers_from_config(config: &Config) -> Vec<ProviderRegistration> {
    let mut registrations = Vec::new();
    for (id, settings) in &config.providers {
        if !settings.enabled {
            continue;
        }
        let api_key = settings.api_key.clone();
        let pricing: Vec<(String, Pricing)> = settings
            .models
            .iter()
            .map(|m| {
                (
                    m.clone(),
                    Pricing {
                        input_per_1k: settings.cost_per_1k_input,
                        output_per_1k: settings.cost_per_1k_output,
                    },
                )
            })
            .collect();

        let provider: Arc<dyn Provider> = match id.as_str() {
            "anthropic" => Arc::new(AnthropicProvider::new(api_key, settings.models.clone(), pricing)),
            "gemini" => Arc::new(GeminiProvider::new(api_key, settings.models.clone(), pricing)),
            _ => {
                let base_url = settings
                    .base_url
                    .clone()
                    .or_else(|| default_base_url(id).map(str::to_string))
                    .unwrap_or_default();
                Arc::new(OpenAiCompatibleProvider::new(id.clone(), base_url, api_key, settings.models.clone(), pricing))
            }
        };

        registrations.push(ProviderRegistration {
            provider,
            priority: settings.priority,
            models_by_tier: models_by_tier(&settings.models),
        });
    }
    registrations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_alone_validate_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist.yaml");
        let config = load(&missing).unwrap();
        assert_eq!(config.max_tool_iterations, 6);
        assert!(config.providers.is_empty());
    }

    #[test]
    fn out_of_range_budget_percent_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "budget:\n  alert_threshold_percent: 250\n").unwrap();
        let err = load(&path).unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn yaml_layer_overrides_defaults_and_env_overrides_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "budget:\n  daily_usd: 10\n").unwrap();
        std::env::set_var("COTERIE_BUDGET_DAILY_USD", "2.5");
        let config = load(&path).unwrap();
        std::env::remove_var("COTERIE_BUDGET_DAILY_USD");
        assert_eq!(config.budget.daily_usd, 2.5);
    }

    #[test]
    fn models_by_tier_reuses_last_entry_for_a_short_list() {
        let models = vec!["big-model".to_string()];
        let map = models_by_tier(&models);
        assert_eq!(map[&TaskTier::Complex], "big-model");
        assert_eq!(map[&TaskTier::Fast], "big-model");
    }

    #[test]
    fn default_tier_falls_back_to_complex_on_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "default_model_task: not-a-real-tier\n").unwrap();
        let config = load(&path).unwrap();
        assert_eq!(default_tier(&config), TaskTier::Complex);
    }
}
