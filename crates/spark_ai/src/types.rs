use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Vendors
// ---------------------------------------------------------------------------

/// An upstream AI API vendor. Credentials are scoped per vendor.
///
/// Only `OpenAi`, `Anthropic` and `Google` have a wire protocol; the other
/// vendors can hold credentials but cannot be dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    OpenAi,
    Anthropic,
    Google,
    Stability,
    Replicate,
}

impl Vendor {
    pub const ALL: [Vendor; 5] = [
        Vendor::OpenAi,
        Vendor::Anthropic,
        Vendor::Google,
        Vendor::Stability,
        Vendor::Replicate,
    ];

    /// Lowercase slug used in config files and on the command line.
    pub fn slug(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Stability => "stability",
            Self::Replicate => "replicate",
        }
    }

    /// Company name shown to users.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::Anthropic => "Anthropic",
            Self::Google => "Google",
            Self::Stability => "Stability AI",
            Self::Replicate => "Replicate",
        }
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

impl std::str::FromStr for Vendor {
    type Err = UnknownVendor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|v| v.slug() == needle)
            .ok_or_else(|| UnknownVendor(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown vendor: {0}")]
pub struct UnknownVendor(pub String);

/// What kind of output a provider produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Text,
    Image,
    Multimodal,
}

impl Capability {
    pub fn supports_chat(self) -> bool {
        matches!(self, Self::Text | Self::Multimodal)
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// One turn of a conversation. Order within a conversation is significant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ConversationMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A successful, vendor-neutral completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub tokens_consumed: u64,
    pub provider_id: String,
    /// Display name of the provider that served the request.
    pub provider: String,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

/// Classification of every way a dispatch can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The provider id is not in the registry.
    UnknownProvider,
    /// The provider needs an API key that is not configured.
    MissingCredential,
    /// The provider's vendor or capability cannot serve this operation.
    Unsupported,
    /// Input was rejected locally (bad image size, empty conversation).
    InvalidRequest,
    /// The vendor answered with a non-2xx status.
    ProviderRejected,
    /// The vendor answered 2xx with a body we could not read.
    MalformedResponse,
    /// No HTTP response was received (connect error, timeout).
    TransportError,
}

impl FailureKind {
    /// Whether the failure happened before anything was sent over the wire.
    pub fn is_local(self) -> bool {
        matches!(
            self,
            Self::UnknownProvider | Self::MissingCredential | Self::Unsupported | Self::InvalidRequest
        )
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UnknownProvider => "unknown provider",
            Self::MissingCredential => "missing credential",
            Self::Unsupported => "unsupported",
            Self::InvalidRequest => "invalid request",
            Self::ProviderRejected => "provider rejected",
            Self::MalformedResponse => "malformed response",
            Self::TransportError => "transport error",
        };
        f.write_str(s)
    }
}

/// A classified failure. Always carries a human-readable message and the
/// originating provider's display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{provider}: {kind}: {message}")]
pub struct DispatchFailure {
    pub kind: FailureKind,
    pub message: String,
    pub provider_id: String,
    pub provider: String,
    /// HTTP status, when the vendor answered at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl DispatchFailure {
    pub fn new(
        kind: FailureKind,
        message: impl Into<String>,
        provider_id: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            provider_id: provider_id.into(),
            provider: provider.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// Outcome of one chat dispatch: exactly one of success or failure.
pub type DispatchResult = Result<Completion, DispatchFailure>;

/// A generated image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAsset {
    pub url: String,
    pub provider_id: String,
    pub provider: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub type ImageResult = Result<ImageAsset, DispatchFailure>;

/// One item of a streamed completion. A stream always ends with either
/// `Finished` or `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta(String),
    Finished { tokens_consumed: u64 },
    Failed(DispatchFailure),
}
