use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use anyhow::{Context, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use std::fs;
use std::path::{Path, PathBuf};

const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;
pub const SALT_FILENAME: &str = "storage.salt";

/// AES-256-GCM sealing of short secrets (API keys).
///
/// The key is derived with Argon2id from the current user and home directory
/// plus a random salt persisted next to the data. Ciphertexts are hex
/// strings of `nonce || ciphertext`.
pub struct SecureStorage {
    cipher: Aes256Gcm,
}

impl SecureStorage {
    /// Storage keyed by the salt at `~/.spark/storage.salt`.
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Self::with_salt_path(&home.join(".spark").join(SALT_FILENAME))
    }

    /// Storage keyed by a salt file at a custom path.
    pub fn with_salt_path(salt_path: &Path) -> Result<Self> {
        let salt = load_or_create_salt(salt_path)?;
        let key = derive_key(machine_password().as_bytes(), &salt)?;
        Ok(Self::from_key(&key))
    }

    fn from_key(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Encrypt a plaintext string, returning hex-encoded `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce: [u8; NONCE_LEN] = rand::random();
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("Encryption failed: {e}"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(hex::encode(out))
    }

    pub fn decrypt(&self, hex_ciphertext: &str) -> Result<String> {
        let data = hex::decode(hex_ciphertext.trim()).context("Ciphertext is not valid hex")?;
        if data.len() < NONCE_LEN {
            anyhow::bail!("Ciphertext too short");
        }
        let (nonce, sealed) = data.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|e| anyhow::anyhow!("Decryption failed: {e}"))?;
        String::from_utf8(plaintext).context("Decrypted data is not valid UTF-8")
    }
}

fn machine_password() -> String {
    let username = whoami::username();
    let home = dirs::home_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("spark-secure-storage-v1:{username}:{home}")
}

/// Argon2id, m=19456 KiB, t=2, p=1.
fn derive_key(password: &[u8], salt: &[u8; SALT_LEN]) -> Result<[u8; KEY_LEN]> {
    let params = Params::new(19_456, 2, 1, Some(KEY_LEN))
        .map_err(|e| anyhow::anyhow!("Invalid Argon2 params: {e}"))?;
    let mut key = [0u8; KEY_LEN];
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(password, salt, &mut key)
        .map_err(|e| anyhow::anyhow!("Argon2 key derivation failed: {e}"))?;
    Ok(key)
}

/// Read the salt, or write a fresh one when missing or the wrong length.
fn load_or_create_salt(salt_path: &Path) -> Result<[u8; SALT_LEN]> {
    if let Ok(existing) = fs::read(salt_path) {
        if let Ok(salt) = <[u8; SALT_LEN]>::try_from(existing.as_slice()) {
            return Ok(salt);
        }
    }

    let salt: [u8; SALT_LEN] = rand::random();
    if let Some(parent) = salt_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    fs::write(salt_path, salt)
        .with_context(|| format!("Failed to write salt file {}", salt_path.display()))?;
    Ok(salt)
}

/// Default salt location, exposed for callers that keep it beside other state.
pub fn default_salt_path(base_dir: &Path) -> PathBuf {
    base_dir.join(SALT_FILENAME)
}
