//! In-memory API key store.
//!
//! The store is an explicit context object: the dispatcher reads from
//! whichever store it is handed, so concurrent callers (and tests) can hold
//! independent credential sets. Loading and saving keys to disk is done by
//! the caller (see `spark_core::key_store`).

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::types::Vendor;

/// An API key that never shows up in `Debug` output or logs.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(SecretString::from(key.into()))
    }

    /// Only call this when writing the key into an outbound request.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiKey([REDACTED])")
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Vendor-scoped credential mapping.
#[derive(Debug, Default)]
pub struct CredentialStore {
    keys: RwLock<HashMap<Vendor, ApiKey>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the supplied keys into the store. Vendors not present in
    /// `partial` keep their current key.
    pub fn set_credentials<I, K>(&self, partial: I)
    where
        I: IntoIterator<Item = (Vendor, K)>,
        K: Into<String>,
    {
        let mut keys = self.keys.write();
        let mut updated = Vec::new();
        for (vendor, key) in partial {
            keys.insert(vendor, ApiKey::new(key));
            updated.push(vendor.slug());
        }
        info!(vendors = ?updated, "credentials updated");
    }

    /// The key for `vendor`, if one is set and non-empty.
    pub fn get(&self, vendor: Vendor) -> Option<ApiKey> {
        self.keys
            .read()
            .get(&vendor)
            .filter(|k| !k.is_empty())
            .cloned()
    }

    pub fn has(&self, vendor: Vendor) -> bool {
        self.get(vendor).is_some()
    }

    pub fn remove(&self, vendor: Vendor) -> bool {
        let removed = self.keys.write().remove(&vendor).is_some();
        if removed {
            debug!(vendor = vendor.slug(), "credential removed");
        }
        removed
    }

    /// Drop every key (logout / reset).
    pub fn clear(&self) {
        self.keys.write().clear();
        info!("credentials cleared");
    }

    /// Vendors with a usable key, in a stable order.
    pub fn configured_vendors(&self) -> Vec<Vendor> {
        let mut vendors: Vec<Vendor> = self
            .keys
            .read()
            .iter()
            .filter(|(_, k)| !k.is_empty())
            .map(|(v, _)| *v)
            .collect();
        vendors.sort();
        vendors
    }

    /// Plaintext copy of the current mapping, keyed by vendor slug, for
    /// handing to a persistence layer.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.keys
            .read()
            .iter()
            .filter(|(_, k)| !k.is_empty())
            .map(|(v, k)| (v.slug().to_string(), k.expose_secret().to_string()))
            .collect()
    }
}

impl<K: Into<String>> FromIterator<(Vendor, K)> for CredentialStore {
    fn from_iter<I: IntoIterator<Item = (Vendor, K)>>(iter: I) -> Self {
        let store = Self::new();
        store.set_credentials(iter);
        store
    }
}
