use std::collections::HashSet;
use std::num::NonZeroU32;
use std::path::Path;

use error_stack::{Report, ResultExt};
use nonzero_ext::nonzero;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::sampler::poloniex::POLONIEX_BASE_URL;
use crate::watcher::WatcherConfig;

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_poloniex_base_url() -> String {
    POLONIEX_BASE_URL.into()
}

fn default_request_timeout_secs() -> u64 {
    10
}

/// Poloniex public API allows 6 calls per second per IP.
fn default_requests_per_second() -> NonZeroU32 {
    nonzero!(6u32)
}

fn default_notifier_kind() -> String {
    "terminal".into()
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".into()
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub poloniex: PoloniexConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub watchers: Vec<WatcherEntry>,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Accepted values: `"text"` | `"json"`
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PoloniexConfig {
    #[serde(default = "default_poloniex_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Zero is rejected when the file is parsed.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: NonZeroU32,
}

impl Default for PoloniexConfig {
    fn default() -> Self {
        Self {
            base_url: default_poloniex_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            requests_per_second: default_requests_per_second(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NotifierConfig {
    /// Accepted values: `"terminal"` | `"telegram"`
    #[serde(default = "default_notifier_kind")]
    pub kind: String,
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            kind: default_notifier_kind(),
            bot_token: None,
            chat_id: None,
            api_base: default_telegram_api_base(),
        }
    }
}

/// Raw watcher entry. `threshold` stays a string until validated so it is
/// never read through a binary float.
#[derive(Debug, Deserialize)]
pub struct WatcherEntry {
    pub instrument: String,
    pub operator: String,
    pub threshold: String,
    pub interval: Option<u64>,
}

/// Load and validate an `AppConfig` from a TOML file at `path`.
pub fn load(path: &Path) -> Result<AppConfig, Report<ConfigError>> {
    let content = std::fs::read_to_string(path)
        .change_context(ConfigError::ReadFile)
        .attach_with(|| format!("path: {}", path.display()))?;

    let config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    validate(&config)?;

    Ok(config)
}

const VALID_LOG_FORMATS: &[&str] = &["text", "json"];
const VALID_NOTIFIER_KINDS: &[&str] = &["terminal", "telegram"];

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_general(config)?;
    validate_poloniex(config)?;
    validate_notifier(config)?;
    validate_watchers(config)?;
    Ok(())
}

fn validate_general(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if !VALID_LOG_FORMATS.contains(&config.general.log_format.as_str()) {
        return Err(Report::new(ConfigError::Validation {
            field: format!(
                "general.log_format \"{}\" is not valid",
                config.general.log_format
            ),
        }));
    }
    Ok(())
}

fn validate_poloniex(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if config.poloniex.request_timeout_secs == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "poloniex.request_timeout_secs must be positive".into(),
        }));
    }
    Ok(())
}

fn validate_notifier(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let notifier = &config.notifier;
    if !VALID_NOTIFIER_KINDS.contains(&notifier.kind.as_str()) {
        return Err(Report::new(ConfigError::Validation {
            field: format!("notifier.kind \"{}\" is not valid", notifier.kind),
        }));
    }

    if notifier.kind == "telegram" {
        let missing = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());
        if missing(&notifier.bot_token) {
            return Err(Report::new(ConfigError::Validation {
                field: "notifier.bot_token is required for kind \"telegram\"".into(),
            }));
        }
        if missing(&notifier.chat_id) {
            return Err(Report::new(ConfigError::Validation {
                field: "notifier.chat_id is required for kind \"telegram\"".into(),
            }));
        }
    }
    Ok(())
}

fn validate_watchers(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if config.watchers.is_empty() {
        return Err(Report::new(ConfigError::Validation {
            field: "watchers: at least one watcher is required".into(),
        }));
    }

    let mut seen = HashSet::new();
    for entry in &config.watchers {
        let watcher = WatcherConfig::from_entry(entry)?;
        if !seen.insert((watcher.instrument, watcher.operator, watcher.threshold)) {
            return Err(Report::new(ConfigError::Validation {
                field: format!(
                    "watchers: duplicate entry for {} {} {}",
                    entry.instrument, entry.operator, entry.threshold
                ),
            }));
        }
    }
    Ok(())
}
