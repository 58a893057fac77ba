//! Static provider catalog.
//!
//! Provides lookup by id. The catalog is fixed at startup; only endpoints can
//! be redirected (proxies, local test servers).

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::types::{Capability, Vendor};

/// Static metadata describing one offered model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: String,
    pub name: String,
    pub vendor: Vendor,
    /// Model identifier sent on the wire.
    pub model: String,
    pub capability: Capability,
    pub requires_credential: bool,
    pub endpoint: String,
    pub max_tokens: Option<u32>,
    pub supports_streaming: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate provider id: {0}")]
    DuplicateId(String),

    #[error("provider not found: {0}")]
    UnknownProvider(String),
}

/// Id of the provider used for image generation when none is named.
pub const DEFAULT_IMAGE_PROVIDER: &str = "dall-e-3";

#[allow(clippy::too_many_arguments)]
fn descriptor(
    id: &str,
    name: &str,
    vendor: Vendor,
    model: &str,
    capability: Capability,
    endpoint: &str,
    max_tokens: Option<u32>,
    supports_streaming: bool,
) -> ProviderDescriptor {
    ProviderDescriptor {
        id: id.into(),
        name: name.into(),
        vendor,
        model: model.into(),
        capability,
        requires_credential: true,
        endpoint: endpoint.into(),
        max_tokens,
        supports_streaming,
    }
}

/// The built-in catalog.
pub static BUILTIN_PROVIDERS: Lazy<Vec<ProviderDescriptor>> = Lazy::new(|| {
    vec![
        // ---- OpenAI ----
        descriptor(
            "gpt-4-turbo",
            "GPT-4 Turbo",
            Vendor::OpenAi,
            "gpt-4-turbo",
            Capability::Multimodal,
            "https://api.openai.com/v1/chat/completions",
            Some(128_000),
            true,
        ),
        descriptor(
            "gpt-3.5-turbo",
            "GPT-3.5 Turbo",
            Vendor::OpenAi,
            "gpt-3.5-turbo",
            Capability::Text,
            "https://api.openai.com/v1/chat/completions",
            Some(16_385),
            true,
        ),
        // ---- Anthropic ----
        descriptor(
            "claude-3-opus",
            "Claude 3 Opus",
            Vendor::Anthropic,
            "claude-3-opus-20240229",
            Capability::Multimodal,
            "https://api.anthropic.com/v1/messages",
            Some(200_000),
            true,
        ),
        descriptor(
            "claude-3-sonnet",
            "Claude 3 Sonnet",
            Vendor::Anthropic,
            "claude-3-sonnet-20240229",
            Capability::Multimodal,
            "https://api.anthropic.com/v1/messages",
            Some(200_000),
            true,
        ),
        // ---- Google ----
        descriptor(
            "gemini-pro",
            "Gemini Pro",
            Vendor::Google,
            "gemini-pro",
            Capability::Multimodal,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:generateContent",
            Some(32_768),
            true,
        ),
        // ---- Images ----
        descriptor(
            DEFAULT_IMAGE_PROVIDER,
            "DALL-E 3",
            Vendor::OpenAi,
            "dall-e-3",
            Capability::Image,
            "https://api.openai.com/v1/images/generations",
            None,
            false,
        ),
    ]
});

/// Read-only list of provider descriptors with unique ids.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    descriptors: Vec<ProviderDescriptor>,
}

impl ProviderRegistry {
    pub fn new(descriptors: Vec<ProviderDescriptor>) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        for d in &descriptors {
            if !seen.insert(d.id.as_str()) {
                return Err(RegistryError::DuplicateId(d.id.clone()));
            }
        }
        Ok(Self { descriptors })
    }

    /// Registry holding [`BUILTIN_PROVIDERS`].
    pub fn builtin() -> Self {
        Self {
            descriptors: BUILTIN_PROVIDERS.clone(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ProviderDescriptor> {
        self.descriptors.iter().find(|d| d.id == id)
    }

    pub fn all(&self) -> &[ProviderDescriptor] {
        &self.descriptors
    }

    pub fn by_vendor(&self, vendor: Vendor) -> impl Iterator<Item = &ProviderDescriptor> {
        self.descriptors.iter().filter(move |d| d.vendor == vendor)
    }

    /// Point provider `id` at a different endpoint.
    pub fn with_endpoint(mut self, id: &str, endpoint: impl Into<String>) -> Result<Self, RegistryError> {
        let descriptor = self
            .descriptors
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| RegistryError::UnknownProvider(id.to_string()))?;
        descriptor.endpoint = endpoint.into();
        Ok(self)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
