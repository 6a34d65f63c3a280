use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use crate::{
    companion::ProviderSettings,
    correlator::{CorrelatorSettings, DEFAULT_SETTLE_DELAY},
    model::Coordinates,
    provider::ProviderId,
};

/// Configuration for a single provider (e.g., API key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,
}

/// Device-side tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Companion address for `weather-relay device`.
    pub companion_addr: String,
    /// Accept cached weather younger than this.
    pub max_age_secs: u64,
    /// Pause after the channel opens before queued requests are sent.
    pub settle_delay_ms: u64,
    /// Give up on unanswered requests after this long. Unset waits forever.
    pub request_timeout_secs: Option<u64>,
    /// Seconds between reconnect attempts.
    pub reconnect_secs: u64,
    /// Where the last record is persisted. Defaults to the platform data dir.
    pub cache_dir: Option<PathBuf>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            companion_addr: "127.0.0.1:7878".to_string(),
            max_age_secs: 30 * 60,
            settle_delay_ms: DEFAULT_SETTLE_DELAY.as_millis() as u64,
            request_timeout_secs: None,
            reconnect_secs: 5,
            cache_dir: None,
        }
    }
}

impl DeviceConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn correlator_settings(&self) -> CorrelatorSettings {
        CorrelatorSettings {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            request_timeout: self.request_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Companion-side settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    pub listen_addr: String,
    /// JSON file replacing the built-in condition code tables.
    pub custom_codes: Option<PathBuf>,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self { listen_addr: "127.0.0.1:7878".to_string(), custom_codes: None }
    }
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Optional default provider id, e.g. "owm" or "weatherbit".
    pub default_provider: Option<String>,

    /// Report apparent ("feels like") temperature where the provider has one.
    #[serde(default)]
    pub feels_like: bool,

    /// Example TOML:
    /// [providers.owm]
    /// api_key = "..."
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Position reported by the companion.
    pub location: Option<Coordinates>,

    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub companion: CompanionConfig,
}

impl Config {
    /// Return the default provider as a strongly-typed ProviderId.
    pub fn default_provider_id(&self) -> Result<ProviderId> {
        let s = self.default_provider.as_ref().ok_or_else(|| {
            anyhow::anyhow!(
                "No default provider configured.\n\
                 Hint: run `weather-relay configure <provider>` (e.g. `weather-relay configure owm`) first."
            )
        })?;

        ProviderId::try_from(s.as_str())
    }

    /// Store default provider as string.
    pub fn set_default_provider(&mut self, id: ProviderId) {
        self.default_provider = Some(id.as_str().to_string());
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("dev", "weather-relay", "weather-relay")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Directory holding the persisted weather record.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        match &self.device.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::project_dirs()?.data_dir().to_path_buf()),
        }
    }

    /// Convenience helper: set/replace a provider API key and optionally set default provider.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        self.providers.insert(provider_id.as_str().to_string(), ProviderConfig { api_key });

        if self.default_provider.is_none() {
            self.default_provider = Some(provider_id.to_string());
        }
    }

    /// Returns API key for a provider, if present.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.providers.get(provider_id.as_str()).map(|cfg| cfg.api_key.as_str())
    }

    pub fn is_provider_configured(&self, provider_id: ProviderId) -> bool {
        self.provider_api_key(provider_id).is_some() || !provider_id.requires_api_key()
    }

    /// Settings the companion answers requests with.
    pub fn provider_settings(&self) -> Result<ProviderSettings> {
        let provider = self.default_provider_id()?;
        let api_key = match self.provider_api_key(provider) {
            Some(key) => key.to_owned(),
            None if !provider.requires_api_key() => String::new(),
            None => {
                return Err(anyhow!(
                    "No API key configured for provider '{provider}'.\n\
                     Hint: run `weather-relay configure {provider}` and enter your API key."
                ));
            }
        };

        Ok(ProviderSettings { provider, api_key, feels_like: self.feels_like })
    }
}
