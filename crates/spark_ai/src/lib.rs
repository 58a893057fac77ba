pub mod availability;
pub mod credentials;
pub mod dispatch;
pub mod providers;
pub mod registry;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export core types at crate root for convenience.
pub use availability::{is_available, list_available};
pub use credentials::{ApiKey, CredentialStore};
pub use dispatch::{DispatchConfig, Dispatcher, Gateway};
pub use providers::image::{ImageSize, ImageSizeError};
pub use providers::{
    GenerationOverride, GenerationSettings, NormalizeError, TranslateError, WireProtocol,
};
pub use registry::{DEFAULT_IMAGE_PROVIDER, ProviderDescriptor, ProviderRegistry, RegistryError};
pub use transport::{HttpTransport, ReqwestTransport, TransportError, WireRequest, WireResponse};
pub use types::*;
