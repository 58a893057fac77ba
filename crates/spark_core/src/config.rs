use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Per-provider tweaks, keyed by provider id in [`GatewayConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Replaces the built-in endpoint (proxies, regional hosts, mocks).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Gateway configuration stored at `~/.spark/config.json`.
///
/// API keys are **never** written here. They live in `~/.spark/keys.enc`,
/// see [`crate::key_store::KeyStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub request_timeout_secs: u64,
    pub default_max_tokens: u32,
    pub default_temperature: f32,
    pub provider_overrides: BTreeMap<String, ProviderOverride>,
    pub image_quality: String,
    /// Fill vendors missing from the key store from `*_API_KEY` variables.
    pub env_fallback: bool,
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            default_max_tokens: 4000,
            default_temperature: 0.7,
            provider_overrides: BTreeMap::new(),
            image_quality: "standard".into(),
            env_fallback: true,
            log_level: "info".into(),
        }
    }
}

impl GatewayConfig {
    /// Returns the base config directory: `~/.spark/`
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".spark"))
    }

    /// Returns the config file path: `~/.spark/config.json`
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.json"))
    }

    /// Returns the logs directory: `~/.spark/logs/`
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("logs"))
    }

    /// Returns the encrypted key store path: `~/.spark/keys.enc`
    pub fn keys_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("keys.enc"))
    }

    /// Ensures all required directories exist.
    pub fn ensure_dirs() -> Result<()> {
        for dir in [Self::base_dir()?, Self::logs_dir()?] {
            if !dir.exists() {
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
            }
        }
        Ok(())
    }

    /// Loads config from disk, or creates default if missing.
    pub fn load() -> Result<Self> {
        Self::ensure_dirs()?;
        let path = Self::config_path()?;
        Self::load_from_path(&path)
    }

    /// Load config from a specific file path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let config: Self = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            config.validate()?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to_path(path)?;
            info!("Created default config at {}", path.display());
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to_path(&path)
    }

    /// Save config to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Reject values no vendor would accept.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than zero");
        }
        if self.default_max_tokens == 0 {
            anyhow::bail!("default_max_tokens must be greater than zero");
        }
        let temperatures = std::iter::once(("default_temperature", Some(self.default_temperature)))
            .chain(
                self.provider_overrides
                    .iter()
                    .map(|(id, o)| (id.as_str(), o.temperature)),
            );
        for (name, temperature) in temperatures {
            if let Some(t) = temperature {
                if !(0.0..=2.0).contains(&t) {
                    anyhow::bail!("temperature for {name} must be between 0 and 2, got {t}");
                }
            }
        }
        Ok(())
    }

    pub fn override_for(&self, provider_id: &str) -> Option<&ProviderOverride> {
        self.provider_overrides.get(provider_id)
    }
}
