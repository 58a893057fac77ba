//! Per-vendor wire protocols.
//!
//! Each protocol module owns its request translator, response normalizer
//! and stream frame decoder. Everything in this module dispatches on
//! [`WireProtocol`] with exhaustive matches, so adding a vendor family is a
//! compile-time-visible change.

pub mod anthropic;
pub mod gemini;
pub mod image;
pub mod openai;
pub(crate) mod sse;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::registry::ProviderDescriptor;
use crate::types::{ConversationMessage, Vendor};
use self::sse::{Frame, StreamUsage};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Raised before any network call when a request cannot be built.
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("{0} has no supported wire protocol")]
    UnsupportedVendor(Vendor),

    #[error("provider {id} does not support {operation}")]
    UnsupportedOperation { id: String, operation: &'static str },

    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A 2xx body that does not have the shape the vendor documents.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("response is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("response is missing {0}")]
    MissingField(&'static str),

    #[error("usage counters overflow: {input} + {output}")]
    UsageOverflow { input: u64, output: u64 },
}

// ---------------------------------------------------------------------------
// Protocol table
// ---------------------------------------------------------------------------

/// The vendor families that speak a chat protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireProtocol {
    OpenAi,
    Anthropic,
    Google,
}

impl WireProtocol {
    pub fn for_vendor(vendor: Vendor) -> Result<Self, TranslateError> {
        match vendor {
            Vendor::OpenAi => Ok(Self::OpenAi),
            Vendor::Anthropic => Ok(Self::Anthropic),
            Vendor::Google => Ok(Self::Google),
            Vendor::Stability | Vendor::Replicate => Err(TranslateError::UnsupportedVendor(vendor)),
        }
    }

    /// Normalize a successful response body.
    pub fn normalize(self, body: &str) -> Result<Normalized, NormalizeError> {
        match self {
            Self::OpenAi => openai::normalize(body),
            Self::Anthropic => anthropic::normalize(body),
            Self::Google => gemini::normalize(body),
        }
    }

    /// Whether a complete stream carries an explicit terminal frame.
    /// Google simply closes the body.
    pub(crate) fn has_end_marker(self) -> bool {
        matches!(self, Self::OpenAi | Self::Anthropic)
    }

    pub(crate) fn decode_frame(self, data: &str, usage: &mut StreamUsage) -> Result<Frame, NormalizeError> {
        match self {
            Self::OpenAi => openai::decode_frame(data, usage),
            Self::Anthropic => anthropic::decode_frame(data, usage),
            Self::Google => gemini::decode_frame(data, usage),
        }
    }
}

/// Vendor-neutral content of a successful response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub content: String,
    pub tokens_consumed: u64,
}

// ---------------------------------------------------------------------------
// Generation settings
// ---------------------------------------------------------------------------

pub const DEFAULT_MAX_TOKENS: u32 = 4000;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Per-provider override of the generation defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOverride {
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Token ceiling and sampling defaults, overridable per provider id.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub max_tokens: u32,
    pub temperature: f32,
    pub overrides: HashMap<String, GenerationOverride>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            overrides: HashMap::new(),
        }
    }
}

/// Concrete values that go into one request body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    /// `None` means the field is left out of the body.
    pub temperature: Option<f32>,
}

impl GenerationSettings {
    pub fn resolve(&self, descriptor: &ProviderDescriptor) -> GenerationParams {
        let overrides = self.overrides.get(&descriptor.id);
        let requested = overrides
            .and_then(|o| o.max_tokens)
            .unwrap_or(self.max_tokens);
        // Never ask for more than the provider can produce.
        let max_tokens = match descriptor.max_tokens {
            Some(bound) => requested.min(bound),
            None => requested,
        };

        let explicit = overrides.and_then(|o| o.temperature);
        let temperature = match descriptor.vendor {
            // Anthropic's body carries no temperature unless one is configured.
            Vendor::Anthropic => explicit,
            _ => Some(explicit.unwrap_or(self.temperature)),
        };

        GenerationParams {
            max_tokens,
            temperature,
        }
    }
}

// ---------------------------------------------------------------------------
// Translation
// ---------------------------------------------------------------------------

/// Build the vendor request body for a chat dispatch.
pub fn translate(
    descriptor: &ProviderDescriptor,
    conversation: &[ConversationMessage],
    system_prompt: Option<&str>,
    params: GenerationParams,
    stream: bool,
) -> Result<serde_json::Value, TranslateError> {
    let protocol = WireProtocol::for_vendor(descriptor.vendor)?;
    if !descriptor.capability.supports_chat() {
        return Err(TranslateError::UnsupportedOperation {
            id: descriptor.id.clone(),
            operation: "chat",
        });
    }
    if stream && !descriptor.supports_streaming {
        return Err(TranslateError::UnsupportedOperation {
            id: descriptor.id.clone(),
            operation: "streaming",
        });
    }

    let body = match protocol {
        WireProtocol::OpenAi => serde_json::to_value(openai::build_body(
            descriptor,
            conversation,
            system_prompt,
            params,
            stream,
        ))?,
        WireProtocol::Anthropic => serde_json::to_value(anthropic::build_body(
            descriptor,
            conversation,
            system_prompt,
            params,
            stream,
        ))?,
        WireProtocol::Google => serde_json::to_value(gemini::build_body(
            conversation,
            system_prompt,
            params,
        ))?,
    };
    Ok(body)
}

/// URL a request for `descriptor` is sent to, before auth is applied.
pub fn request_url(descriptor: &ProviderDescriptor, stream: bool) -> Result<String, TranslateError> {
    match WireProtocol::for_vendor(descriptor.vendor)? {
        WireProtocol::Google if stream => gemini::stream_endpoint(&descriptor.endpoint),
        _ => Ok(descriptor.endpoint.clone()),
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// How an API key travels with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`.
    Bearer,
    /// `<name>: <key>`.
    Header(&'static str),
    /// `?<name>=<key>`.
    QueryParam(&'static str),
}

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

pub fn auth_scheme(vendor: Vendor) -> AuthScheme {
    match vendor {
        Vendor::OpenAi => AuthScheme::Bearer,
        Vendor::Anthropic => AuthScheme::Header("x-api-key"),
        Vendor::Google => AuthScheme::QueryParam("key"),
        Vendor::Stability | Vendor::Replicate => AuthScheme::Bearer,
    }
}

/// Headers sent on every request to `vendor`, independent of the key.
pub fn fixed_headers(vendor: Vendor) -> &'static [(&'static str, &'static str)] {
    match vendor {
        Vendor::Anthropic => &[("anthropic-version", ANTHROPIC_VERSION)],
        Vendor::OpenAi | Vendor::Google | Vendor::Stability | Vendor::Replicate => &[],
    }
}

/// Apply `vendor`'s auth scheme to a URL and header list.
pub fn apply_auth(
    vendor: Vendor,
    key: Option<&str>,
    url: String,
    headers: &mut Vec<(String, String)>,
) -> Result<String, TranslateError> {
    for (name, value) in fixed_headers(vendor) {
        headers.push(((*name).to_string(), (*value).to_string()));
    }
    let Some(key) = key else {
        return Ok(url);
    };

    match auth_scheme(vendor) {
        AuthScheme::Bearer => {
            headers.push(("Authorization".into(), format!("Bearer {key}")));
            Ok(url)
        }
        AuthScheme::Header(name) => {
            headers.push((name.to_string(), key.to_string()));
            Ok(url)
        }
        AuthScheme::QueryParam(name) => {
            let mut parsed = url::Url::parse(&url).map_err(|e| TranslateError::InvalidEndpoint {
                endpoint: url.clone(),
                reason: e.to_string(),
            })?;
            parsed.query_pairs_mut().append_pair(name, key);
            Ok(parsed.into())
        }
    }
}

// ---------------------------------------------------------------------------
// Error bodies
// ---------------------------------------------------------------------------

/// Best-effort extraction of a vendor error message.
///
/// All three families use `{"error": {"message": "..."}}`; a bare string
/// under `error` or a top-level `message` are accepted too.
pub fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let message = value
        .pointer("/error/message")
        .or_else(|| value.get("error").filter(|e| e.is_string()))
        .or_else(|| value.get("message"))?
        .as_str()?
        .trim();
    if message.is_empty() {
        None
    } else {
        Some(message.to_string())
    }
}

/// Message for a non-2xx response, falling back to a generic one.
pub fn rejection_message(vendor: Vendor, status: u16, body: &str) -> String {
    error_message(body).unwrap_or_else(|| {
        format!(
            "{} API request failed (HTTP {status})",
            vendor.display_name()
        )
    })
}
