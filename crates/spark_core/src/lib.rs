pub mod config;
pub mod key_store;
pub mod logging;
pub mod secure_storage;

pub use config::{GatewayConfig, ProviderOverride};
pub use key_store::{ENV_FALLBACKS, KeyStore};
pub use secure_storage::SecureStorage;
