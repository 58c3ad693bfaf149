//! Agent configuration with defaults, JSON file loading, environment
//! overrides, and per-session overrides set from the chat prompt.
//!
//! [`AgentConfig`] is the durable configuration. Every field has a default,
//! so an empty or missing `config.json` produces a usable (key-less)
//! config. API keys usually come from the environment.
//!
//! Named [`ModelConfig`]s in `models` let one config carry several
//! providers. The active one is `default_model` (or the first name in
//! alphabetical order) unless `/model` switched it for the session. With no
//! named models the legacy provider sections are used.
//!
//! [`SessionOverrides`] hold values set with `/config set`. They shadow the
//! config for the lifetime of the process and are never written back. Each
//! key accepts one value type.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{DEFAULT_AZURE_API_VERSION, DEFAULT_MODEL, OPENAI_BASE_URL, OPENROUTER_BASE_URL, Provider};

/// Directory name under the platform config/state directories.
pub const APP_DIR: &str = "panepilot";

/// Keys that `/config set` may override for the current session.
pub const ALLOWED_OVERRIDE_KEYS: &[&str] = &[
    "max_capture_lines",
    "max_context_size",
    "wait_interval",
    "send_keys_confirm",
    "paste_multiline_confirm",
    "exec_confirm",
    "openrouter.model",
    "tools_manifest_path",
];

/// Value type an override key accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideKind {
    Integer,
    Boolean,
    Text,
}

impl OverrideKind {
    fn expected(self) -> &'static str {
        match self {
            OverrideKind::Integer => "a non-negative integer",
            OverrideKind::Boolean => "true or false",
            OverrideKind::Text => "text",
        }
    }

    /// Parse `raw` as this kind.
    pub fn parse(self, raw: &str) -> Option<serde_json::Value> {
        let raw = raw.trim();
        match self {
            OverrideKind::Integer => raw.parse::<u64>().ok().map(serde_json::Value::from),
            OverrideKind::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" => Some(serde_json::Value::Bool(true)),
                "false" => Some(serde_json::Value::Bool(false)),
                _ => None,
            },
            OverrideKind::Text if raw.is_empty() => None,
            OverrideKind::Text => Some(serde_json::Value::String(raw.to_string())),
        }
    }
}

/// The value type of an allowed override key.
pub fn override_kind(key: &str) -> Option<OverrideKind> {
    match key {
        "max_capture_lines" | "max_context_size" | "wait_interval" => Some(OverrideKind::Integer),
        "send_keys_confirm" | "paste_multiline_confirm" | "exec_confirm" => {
            Some(OverrideKind::Boolean)
        }
        "openrouter.model" | "tools_manifest_path" => Some(OverrideKind::Text),
        _ => None,
    }
}

// ── Provider sections ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenRouterConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: OPENROUTER_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: String::new(),
            base_url: OPENAI_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureOpenAiConfig {
    pub api_key: String,
    pub api_base: String,
    pub api_version: String,
    pub deployment_name: String,
}

impl Default for AzureOpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: String::new(),
            api_version: DEFAULT_AZURE_API_VERSION.to_string(),
            deployment_name: String::new(),
        }
    }
}

/// A named model selectable with `/model`.
///
/// Empty `api_key` and `base_url` fall back to the legacy section of the
/// same provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// `openrouter` (default), `openai`, or `azure`.
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    pub api_base: String,
    pub api_version: String,
    pub deployment_name: String,
}

impl ModelConfig {
    fn is_azure(&self) -> bool {
        matches!(self.provider.as_str(), "azure" | "azure_openai")
    }

    /// The model name sent with each request. Azure uses the deployment.
    pub fn model_name(&self) -> &str {
        if self.is_azure() && !self.deployment_name.is_empty() {
            &self.deployment_name
        } else {
            &self.model
        }
    }

    /// Provider label for listings.
    pub fn provider_name(&self) -> &str {
        if self.provider.is_empty() {
            "openrouter"
        } else {
            &self.provider
        }
    }
}

/// Optional prompt text replacing or extending the built-in prompts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Replaces the built-in base system prompt.
    pub base_system: String,
    /// Appended to the chat assistant prompt.
    pub chat_assistant: String,
    /// Appended to the watch prompt.
    pub watch: String,
}

// ── AgentConfig ────────────────────────────────────────────────────

/// Durable agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub debug: bool,
    /// Scrollback lines captured per pane for each snapshot. Default: `200`.
    pub max_capture_lines: usize,
    /// Token budget of the conversation history. Default: `100000`.
    pub max_context_size: usize,
    /// Seconds to wait when the exec pane is busy, and between watch
    /// iterations. Default: `5`.
    pub wait_interval: u64,
    pub send_keys_confirm: bool,
    pub paste_multiline_confirm: bool,
    pub exec_confirm: bool,
    /// Regexes that let matching commands skip confirmation.
    pub whitelist_patterns: Vec<String>,
    /// Regexes that veto a whitelist match.
    pub blacklist_patterns: Vec<String>,
    pub openrouter: OpenRouterConfig,
    pub openai: OpenAiConfig,
    pub azure_openai: AzureOpenAiConfig,
    pub prompts: PromptsConfig,
    /// Markdown tool manifest maintained by reflection. Default:
    /// `"tools-available.md"`.
    pub tools_manifest_path: String,
    /// Reflection log location. Default: `lessons-learned.json` in the
    /// state directory.
    pub reflection_log_path: Option<PathBuf>,
    /// Consecutive guideline violations tolerated per request. Default: `3`.
    pub max_guideline_retries: u32,
    /// Automatic continuations per request. Default: `25`.
    pub max_continuations: u32,
    /// Seconds to wait for a command in a prepared pane to return to the
    /// prompt. Default: `600`.
    pub exec_timeout: u64,
    /// Name of the model in `models` used at startup.
    pub default_model: String,
    /// Named model configurations.
    pub models: BTreeMap<String, ModelConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            debug: false,
            max_capture_lines: 200,
            max_context_size: 100_000,
            wait_interval: 5,
            send_keys_confirm: true,
            paste_multiline_confirm: true,
            exec_confirm: true,
            whitelist_patterns: Vec::new(),
            blacklist_patterns: Vec::new(),
            openrouter: OpenRouterConfig::default(),
            openai: OpenAiConfig::default(),
            azure_openai: AzureOpenAiConfig::default(),
            prompts: PromptsConfig::default(),
            tools_manifest_path: "tools-available.md".to_string(),
            reflection_log_path: None,
            max_guideline_retries: 3,
            max_continuations: 25,
            exec_timeout: 600,
            default_model: String::new(),
            models: BTreeMap::new(),
        }
    }
}

impl AgentConfig {
    /// `<config dir>/panepilot`, if the platform has a config directory.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR))
    }

    /// `<state dir>/panepilot`, falling back to the local data directory and
    /// then to `./.panepilot`.
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from(".panepilot"))
    }

    /// Load from `path` (or `<config dir>/panepilot/config.json`), then
    /// apply environment overrides. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, String> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::config_dir().map(|d| d.join("config.json")),
        };

        let mut config = match path {
            Some(ref p) if p.exists() => {
                let json = std::fs::read_to_string(p)
                    .map_err(|e| format!("Failed to read config {}: {e}", p.display()))?;
                debug!("Loaded config from {}", p.display());
                Self::from_json(&json)?
            }
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a JSON config document. Blank input yields defaults.
    pub fn from_json(json: &str) -> Result<Self, String> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(json).map_err(|e| format!("Failed to parse config: {e}"))
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) =
            non_empty("PANEPILOT_OPENROUTER_API_KEY").or_else(|| non_empty("OPENROUTER_KEY"))
        {
            self.openrouter.api_key = key;
        }
        if let Some(key) = non_empty("PANEPILOT_OPENAI_API_KEY") {
            self.openai.api_key = key;
        }
        if let Some(key) = non_empty("PANEPILOT_AZURE_OPENAI_API_KEY") {
            self.azure_openai.api_key = key;
        }
        if let Some(model) = non_empty("PANEPILOT_MODEL") {
            self.set_model(model);
        }
    }

    /// Select the provider: Azure when its key and deployment are set, then
    /// OpenAI when its key is set, otherwise OpenRouter. Returns the provider
    /// and its API key, or an error when no key is configured.
    pub fn provider(&self) -> Result<(Provider, String), String> {
        let azure = &self.azure_openai;
        if !azure.api_key.is_empty() && !azure.deployment_name.is_empty() {
            if azure.api_base.is_empty() {
                return Err("azure_openai.api_base is required for Azure OpenAI".to_string());
            }
            return Ok((
                Provider::Azure {
                    api_base: azure.api_base.clone(),
                    api_version: azure.api_version.clone(),
                    deployment: azure.deployment_name.clone(),
                },
                azure.api_key.clone(),
            ));
        }
        if !self.openai.api_key.is_empty() {
            return Ok((
                Provider::OpenAi {
                    base_url: self.openai.base_url.clone(),
                },
                self.openai.api_key.clone(),
            ));
        }
        if !self.openrouter.api_key.is_empty() {
            return Ok((
                Provider::OpenRouter {
                    base_url: self.openrouter.base_url.clone(),
                },
                self.openrouter.api_key.clone(),
            ));
        }
        Err("An API key is required. Set OPENROUTER_KEY, PANEPILOT_OPENAI_API_KEY, or \
             PANEPILOT_AZURE_OPENAI_API_KEY, or add a key to the config file."
            .to_string())
    }

    /// Model name for the selected provider.
    pub fn model(&self) -> String {
        let azure = &self.azure_openai;
        if !azure.api_key.is_empty() && !azure.deployment_name.is_empty() {
            azure.deployment_name.clone()
        } else if !self.openai.api_key.is_empty() && !self.openai.model.is_empty() {
            self.openai.model.clone()
        } else {
            self.openrouter.model.clone()
        }
    }

    /// Set the model for every provider section that names one.
    pub fn set_model(&mut self, model: impl Into<String>) {
        let model = model.into();
        self.openai.model = model.clone();
        self.openrouter.model = model;
    }

    /// The configured default model name, else the first named model.
    pub fn default_model_name(&self) -> Option<&str> {
        if !self.default_model.is_empty() {
            return Some(&self.default_model);
        }
        self.models.keys().next().map(String::as_str)
    }

    /// Named models in alphabetical order.
    pub fn available_models(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }

    /// Resolve the named model to its provider and API key.
    pub fn model_provider(&self, name: &str) -> Result<(Provider, String), String> {
        let Some(model) = self.models.get(name) else {
            return Err(format!(
                "Model '{name}' not found. Available models: {}",
                self.available_models().join(", ")
            ));
        };
        let or_legacy = |own: &str, legacy: &str| {
            if own.is_empty() { legacy.to_string() } else { own.to_string() }
        };

        let (provider, api_key) = match model.provider_name() {
            "openrouter" => (
                Provider::OpenRouter {
                    base_url: or_legacy(&model.base_url, &self.openrouter.base_url),
                },
                or_legacy(&model.api_key, &self.openrouter.api_key),
            ),
            "openai" => (
                Provider::OpenAi {
                    base_url: or_legacy(&model.base_url, &self.openai.base_url),
                },
                or_legacy(&model.api_key, &self.openai.api_key),
            ),
            "azure" | "azure_openai" => {
                let api_base = or_legacy(&model.api_base, &self.azure_openai.api_base);
                if api_base.is_empty() {
                    return Err(format!("Model '{name}' needs api_base for Azure OpenAI"));
                }
                (
                    Provider::Azure {
                        api_base,
                        api_version: or_legacy(&model.api_version, &self.azure_openai.api_version),
                        deployment: model.model_name().to_string(),
                    },
                    or_legacy(&model.api_key, &self.azure_openai.api_key),
                )
            }
            other => return Err(format!("Model '{name}' has unknown provider '{other}'")),
        };
        if api_key.is_empty() {
            return Err(format!("Model '{name}' has no API key"));
        }
        Ok((provider, api_key))
    }

    /// Effective reflection log path.
    pub fn reflection_log_path(&self) -> PathBuf {
        self.reflection_log_path
            .clone()
            .unwrap_or_else(|| Self::state_dir().join("lessons-learned.json"))
    }
}

// ── Session overrides ──────────────────────────────────────────────

/// Session-only config overrides keyed by the names in
/// [`ALLOWED_OVERRIDE_KEYS`].
#[derive(Debug, Clone, Default)]
pub struct SessionOverrides(BTreeMap<String, serde_json::Value>);

impl SessionOverrides {
    /// Set `key` from its textual form. Returns the stored value, or an
    /// error when the key is not allowed or the value has the wrong type.
    pub fn set(&mut self, key: &str, raw: &str) -> Result<&serde_json::Value, String> {
        let Some(kind) = override_kind(key) else {
            return Err(format!(
                "Cannot set '{key}'. Only these keys are allowed: {}",
                ALLOWED_OVERRIDE_KEYS.join(", ")
            ));
        };
        let value = kind.parse(raw).ok_or_else(|| {
            format!(
                "Invalid value '{}' for {key}: expected {}",
                raw.trim(),
                kind.expected()
            )
        })?;
        self.0.insert(key.to_string(), value);
        Ok(&self.0[key])
    }

    /// Store a value the user cannot set with `/config set`.
    pub(crate) fn insert_internal(&mut self, key: &str, value: serde_json::Value) {
        self.0.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(|v| v.as_u64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }
}
