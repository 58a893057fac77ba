//! Encrypted on-disk API keys.
//!
//! `keys.enc` is a JSON object mapping a vendor slug (`openai`, `anthropic`,
//! ...) to the hex ciphertext produced by [`SecureStorage`]. Plaintext keys
//! never touch the disk.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::secure_storage::{self, SecureStorage};

/// Environment variables consulted for vendors missing from the store.
pub const ENV_FALLBACKS: &[(&str, &str)] = &[
    ("openai", "OPENAI_API_KEY"),
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("google", "GOOGLE_API_KEY"),
    ("stability", "STABILITY_API_KEY"),
    ("replicate", "REPLICATE_API_KEY"),
];

pub struct KeyStore {
    path: PathBuf,
    storage: SecureStorage,
}

impl KeyStore {
    /// The store at `~/.spark/keys.enc`.
    pub fn open() -> Result<Self> {
        GatewayConfig::ensure_dirs()?;
        let base = GatewayConfig::base_dir()?;
        Self::with_paths(&GatewayConfig::keys_path()?, &secure_storage::default_salt_path(&base))
    }

    pub fn with_paths(keys_path: &Path, salt_path: &Path) -> Result<Self> {
        Ok(Self {
            path: keys_path.to_path_buf(),
            storage: SecureStorage::with_salt_path(salt_path)?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_sealed(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read key store: {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse key store: {}", self.path.display()))
    }

    fn write_sealed(&self, sealed: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(sealed)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write key store: {}", self.path.display()))
    }

    /// Decrypted vendor slug → key map. Entries that fail to decrypt (for
    /// example after the salt was replaced) are skipped.
    pub fn load(&self) -> Result<BTreeMap<String, String>> {
        let sealed = self.read_sealed()?;
        let mut keys = BTreeMap::new();
        for (vendor, ciphertext) in sealed {
            match self.storage.decrypt(&ciphertext) {
                Ok(key) if !key.is_empty() => {
                    keys.insert(vendor, key);
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping undecryptable key for {vendor}: {e}"),
            }
        }
        debug!(count = keys.len(), "Loaded API keys");
        Ok(keys)
    }

    /// Keys from the store, with vendors it lacks filled from `lookup`.
    pub fn load_with_fallback(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<BTreeMap<String, String>> {
        let mut keys = self.load()?;
        for (vendor, var) in ENV_FALLBACKS {
            if keys.contains_key(*vendor) {
                continue;
            }
            if let Some(value) = lookup(*var).filter(|v| !v.trim().is_empty()) {
                debug!("Using {var} for {vendor}");
                keys.insert((*vendor).to_string(), value.trim().to_string());
            }
        }
        Ok(keys)
    }

    /// Keys from the store, with vendors it lacks filled from the environment.
    pub fn load_with_env(&self) -> Result<BTreeMap<String, String>> {
        self.load_with_fallback(|var| std::env::var(var).ok())
    }

    /// Replace the whole store. Empty keys are dropped.
    pub fn save(&self, keys: &BTreeMap<String, String>) -> Result<()> {
        let mut sealed = BTreeMap::new();
        for (vendor, key) in keys.iter().filter(|(_, k)| !k.is_empty()) {
            sealed.insert(vendor.clone(), self.storage.encrypt(key)?);
        }
        self.write_sealed(&sealed)
    }

    /// Store one key; an empty key removes the entry.
    pub fn set(&self, vendor: &str, key: &str) -> Result<()> {
        if key.is_empty() {
            self.remove(vendor)?;
            return Ok(());
        }
        let mut sealed = self.read_sealed()?;
        sealed.insert(vendor.to_string(), self.storage.encrypt(key)?);
        self.write_sealed(&sealed)?;
        info!("Stored API key for {vendor}");
        Ok(())
    }

    /// Returns whether an entry was present.
    pub fn remove(&self, vendor: &str) -> Result<bool> {
        let mut sealed = self.read_sealed()?;
        let removed = sealed.remove(vendor).is_some();
        if removed {
            self.write_sealed(&sealed)?;
            info!("Removed API key for {vendor}");
        }
        Ok(removed)
    }
}
