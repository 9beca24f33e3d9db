//! Configuration management for estimate-chat
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{EstimateError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Main configuration structure
///
/// Holds everything the chat context needs: where the backend and the
/// generative endpoint live, the anonymous quota policy, chat display
/// defaults, the localization block injected into prompts, and logging.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Session/message REST backend
    #[serde(default)]
    pub backend: BackendConfig,

    /// Generative AI streaming endpoint
    #[serde(default)]
    pub generative: GenerativeConfig,

    /// Anonymous daily quota
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Chat display defaults
    #[serde(default)]
    pub chat: ChatConfig,

    /// Localization block sent with every generation request
    #[serde(default)]
    pub localization: LocalizationConfig,

    /// Prompt assembly inputs
    #[serde(default)]
    pub prompt: PromptConfig,

    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend REST configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL, e.g. `https://api.example.com/v1`
    #[serde(default = "default_backend_url")]
    pub base_url: String,

    /// Per-request timeout (seconds)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Bearer token for an authenticated identity. When absent the
    /// client is anonymous and subject to the daily quota.
    #[serde(default)]
    pub auth_token: Option<String>,
}

fn default_backend_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_timeout_seconds() -> u64 {
    60
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            timeout_seconds: default_timeout_seconds(),
            auth_token: None,
        }
    }
}

/// Generative endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerativeConfig {
    /// Base URL of the model API. The streaming path is built from it:
    /// `{endpoint}/models/{model}:streamGenerateContent?alt=sse`
    #[serde(default = "default_generative_endpoint")]
    pub endpoint: String,

    /// Model identifier
    #[serde(default = "default_generative_model")]
    pub model: String,

    /// API key sent as `x-goog-api-key`
    #[serde(default)]
    pub api_key: Option<String>,

    /// Timeout for the whole streamed response (seconds)
    #[serde(default = "default_stream_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_generative_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_generative_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_stream_timeout_seconds() -> u64 {
    180
}

impl Default for GenerativeConfig {
    fn default() -> Self {
        Self {
            endpoint: default_generative_endpoint(),
            model: default_generative_model(),
            api_key: None,
            timeout_seconds: default_stream_timeout_seconds(),
        }
    }
}

/// Anonymous quota configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Calls allowed per calendar day for anonymous identities
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,

    /// Location of the durable client store. Defaults to the user's
    /// data directory.
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
}

fn default_daily_limit() -> u32 {
    11
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: default_daily_limit(),
            storage_path: None,
        }
    }
}

/// Chat display configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Placeholder shown for sessions the backend has not titled yet
    #[serde(default = "default_new_chat_title")]
    pub new_chat_title: String,

    /// Length cap for the title proposed with a session's first message
    #[serde(default = "default_title_max_chars")]
    pub title_max_chars: usize,
}

fn default_new_chat_title() -> String {
    "New chat".to_string()
}

fn default_title_max_chars() -> usize {
    40
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            new_chat_title: default_new_chat_title(),
            title_max_chars: default_title_max_chars(),
        }
    }
}

/// Localization block injected into every generation request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalizationConfig {
    /// ISO 639-1 language the model should answer in
    #[serde(default = "default_language_code")]
    pub primary_language_code: String,

    /// ISO 4217 currency the invoice amounts are quoted in
    #[serde(default = "default_currency_code")]
    pub primary_currency_code: String,

    /// Display name of the user's country
    #[serde(default = "default_country_name")]
    pub user_country_name: String,

    /// Exchange rates keyed by currency code, relative to USD
    #[serde(default = "default_exchange_rates")]
    pub exchange_rates: HashMap<String, f64>,
}

fn default_language_code() -> String {
    "en".to_string()
}

fn default_currency_code() -> String {
    "USD".to_string()
}

fn default_country_name() -> String {
    "United States".to_string()
}

fn default_exchange_rates() -> HashMap<String, f64> {
    HashMap::from([("USD".to_string(), 1.0)])
}

impl Default for LocalizationConfig {
    fn default() -> Self {
        Self {
            primary_language_code: default_language_code(),
            primary_currency_code: default_currency_code(),
            user_country_name: default_country_name(),
            exchange_rates: default_exchange_rates(),
        }
    }
}

/// Prompt assembly inputs
///
/// Both files are optional; built-in defaults are used when absent.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PromptConfig {
    /// Persona/rules document (plain text or markdown)
    #[serde(default)]
    pub persona_path: Option<PathBuf>,

    /// Feature/price dataset (JSON)
    #[serde(default)]
    pub dataset_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json_format: bool,

    /// Additional log file (appended)
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "estimate_chat=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| EstimateError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| EstimateError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply `ESTIMATE_*` overrides using `lookup` as the variable source
    pub(crate) fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("ESTIMATE_BACKEND_URL") {
            self.backend.base_url = url;
        }

        if let Some(token) = lookup("ESTIMATE_AUTH_TOKEN") {
            self.backend.auth_token = Some(token).filter(|t| !t.is_empty());
        }

        if let Some(endpoint) = lookup("ESTIMATE_GENERATIVE_URL") {
            self.generative.endpoint = endpoint;
        }

        if let Some(model) = lookup("ESTIMATE_GENERATIVE_MODEL") {
            self.generative.model = model;
        }

        if let Some(key) = lookup("ESTIMATE_API_KEY") {
            self.generative.api_key = Some(key).filter(|k| !k.is_empty());
        }

        if let Some(limit) = lookup("ESTIMATE_DAILY_LIMIT") {
            if let Ok(value) = limit.parse() {
                self.quota.daily_limit = value;
            } else {
                tracing::warn!("Invalid ESTIMATE_DAILY_LIMIT: {}", limit);
            }
        }

        if let Some(path) = lookup("ESTIMATE_STORAGE_PATH") {
            self.quota.storage_path = Some(PathBuf::from(path));
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            self.logging.level = "estimate_chat=debug".to_string();
        }

        if let Some(url) = &cli.backend_url {
            self.backend.base_url = url.clone();
        }

        if let Some(path) = &cli.storage_path {
            self.quota.storage_path = Some(path.clone());
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `EstimateError::Config` naming the first invalid field
    pub fn validate(&self) -> Result<()> {
        validate_url("backend.base_url", &self.backend.base_url)?;
        validate_url("generative.endpoint", &self.generative.endpoint)?;

        if self.backend.timeout_seconds == 0 {
            return Err(EstimateError::Config(
                "backend.timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.generative.timeout_seconds == 0 {
            return Err(EstimateError::Config(
                "generative.timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.generative.model.trim().is_empty() {
            return Err(
                EstimateError::Config("generative.model cannot be empty".to_string()).into(),
            );
        }

        if self.quota.daily_limit == 0 {
            return Err(EstimateError::Config(
                "quota.daily_limit must be greater than 0".to_string(),
            )
            .into());
        }

        if self.chat.title_max_chars == 0 {
            return Err(EstimateError::Config(
                "chat.title_max_chars must be greater than 0".to_string(),
            )
            .into());
        }

        for (currency, rate) in &self.localization.exchange_rates {
            if !rate.is_finite() || *rate <= 0.0 {
                return Err(EstimateError::Config(format!(
                    "localization.exchange_rates.{} must be a positive number, got {}",
                    currency, rate
                ))
                .into());
            }
        }

        Ok(())
    }
}

fn validate_url(field: &str, value: &str) -> Result<()> {
    let parsed = url::Url::parse(value)
        .map_err(|e| EstimateError::Config(format!("{} is not a valid URL: {}", field, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(EstimateError::Config(format!(
            "{} must use http or https, got {}",
            field,
            parsed.scheme()
        ))
        .into());
    }
    Ok(())
}
