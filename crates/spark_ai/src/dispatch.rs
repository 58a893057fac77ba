//! Dispatch coordinator and the gateway facade.
//!
//! A dispatch resolves the descriptor, checks the credential, translates the
//! conversation, sends exactly one request and normalizes the answer. Every
//! failure along the way comes back as a [`DispatchFailure`] value; nothing
//! is retried.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::availability;
use crate::credentials::{ApiKey, CredentialStore};
use crate::providers::image::{self, ImageSize, DEFAULT_IMAGE_QUALITY};
use crate::providers::{
    self, GenerationSettings, NormalizeError, TranslateError, WireProtocol, sse,
};
use crate::registry::{DEFAULT_IMAGE_PROVIDER, ProviderDescriptor, ProviderRegistry};
use crate::transport::{
    HttpTransport, REQUEST_TIMEOUT_SECS, ReqwestTransport, TransportError, WireRequest,
};
use crate::types::{
    Capability, Completion, ConversationMessage, DispatchFailure, DispatchResult, FailureKind,
    ImageAsset, ImageResult, StreamEvent, Vendor,
};

const STREAM_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Runtime knobs for the dispatcher, usually filled from the user's config file.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    pub request_timeout: Duration,
    pub generation: GenerationSettings,
    pub image_quality: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            generation: GenerationSettings::default(),
            image_quality: DEFAULT_IMAGE_QUALITY.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure construction
// ---------------------------------------------------------------------------

fn fail(descriptor: &ProviderDescriptor, kind: FailureKind, message: impl Into<String>) -> DispatchFailure {
    DispatchFailure::new(kind, message, descriptor.id.clone(), descriptor.name.clone())
}

fn translate_failure(descriptor: &ProviderDescriptor, err: TranslateError) -> DispatchFailure {
    let kind = match err {
        TranslateError::UnsupportedVendor(_) | TranslateError::UnsupportedOperation { .. } => {
            FailureKind::Unsupported
        }
        TranslateError::InvalidEndpoint { .. } | TranslateError::Encode(_) => {
            FailureKind::InvalidRequest
        }
    };
    fail(descriptor, kind, err.to_string())
}

fn transport_failure(descriptor: &ProviderDescriptor, err: TransportError) -> DispatchFailure {
    warn!(provider = %descriptor.id, "transport failure: {err}");
    fail(descriptor, FailureKind::TransportError, err.to_string())
}

fn rejected(descriptor: &ProviderDescriptor, status: u16, body: &str) -> DispatchFailure {
    let message = providers::rejection_message(descriptor.vendor, status, body);
    warn!(provider = %descriptor.id, status, "provider rejected request: {message}");
    fail(descriptor, FailureKind::ProviderRejected, message).with_status(status)
}

fn malformed(descriptor: &ProviderDescriptor, status: u16, err: NormalizeError) -> DispatchFailure {
    warn!(provider = %descriptor.id, "unexpected response shape: {err}");
    fail(
        descriptor,
        FailureKind::MalformedResponse,
        format!("{} returned an unexpected response: {err}", descriptor.name),
    )
    .with_status(status)
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Stateless coordinator between the registry, a transport and the
/// per-vendor protocol modules. Credentials are passed in per call.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    transport: Arc<dyn HttpTransport>,
    config: DispatchConfig,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("providers", &self.registry.all().len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Dispatcher backed by a real HTTP client.
    pub fn new(registry: ProviderRegistry, config: DispatchConfig) -> Self {
        let transport = Arc::new(ReqwestTransport::new(config.request_timeout));
        Self::with_transport(registry, transport, config)
    }

    pub fn with_transport(
        registry: ProviderRegistry,
        transport: Arc<dyn HttpTransport>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            transport,
            config,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    fn resolve(&self, provider_id: &str) -> Result<&ProviderDescriptor, DispatchFailure> {
        self.registry.get(provider_id).ok_or_else(|| {
            debug!(provider = %provider_id, "unknown provider id");
            DispatchFailure::new(
                FailureKind::UnknownProvider,
                format!("No provider with id '{provider_id}' is registered"),
                provider_id,
                provider_id,
            )
        })
    }

    /// The key to send, or `None` for credential-free providers.
    fn credential(
        descriptor: &ProviderDescriptor,
        credentials: &CredentialStore,
    ) -> Result<Option<ApiKey>, DispatchFailure> {
        match credentials.get(descriptor.vendor) {
            Some(key) => Ok(Some(key)),
            None if !descriptor.requires_credential => Ok(None),
            None => Err(fail(
                descriptor,
                FailureKind::MissingCredential,
                format!(
                    "No {} API key is configured. Add one to use {}.",
                    descriptor.vendor.display_name(),
                    descriptor.name
                ),
            )),
        }
    }

    fn wire_request(
        descriptor: &ProviderDescriptor,
        key: Option<&ApiKey>,
        body: serde_json::Value,
        stream: bool,
    ) -> Result<WireRequest, DispatchFailure> {
        let url = providers::request_url(descriptor, stream)
            .map_err(|e| translate_failure(descriptor, e))?;
        let mut headers = Vec::new();
        let url = providers::apply_auth(
            descriptor.vendor,
            key.map(ApiKey::expose_secret),
            url,
            &mut headers,
        )
        .map_err(|e| translate_failure(descriptor, e))?;
        Ok(WireRequest { url, headers, body })
    }

    /// Everything up to (not including) the network call.
    fn prepare_chat(
        &self,
        credentials: &CredentialStore,
        provider_id: &str,
        conversation: &[ConversationMessage],
        system_prompt: Option<&str>,
        stream: bool,
    ) -> Result<(ProviderDescriptor, WireProtocol, WireRequest), DispatchFailure> {
        let descriptor = self.resolve(provider_id)?;
        let key = Self::credential(descriptor, credentials)?;

        if conversation.is_empty() {
            return Err(fail(
                descriptor,
                FailureKind::InvalidRequest,
                "Conversation has no messages",
            ));
        }

        let protocol = WireProtocol::for_vendor(descriptor.vendor)
            .map_err(|e| translate_failure(descriptor, e))?;
        let params = self.config.generation.resolve(descriptor);
        let body = providers::translate(descriptor, conversation, system_prompt, params, stream)
            .map_err(|e| translate_failure(descriptor, e))?;
        let request = Self::wire_request(descriptor, key.as_ref(), body, stream)?;

        debug!(
            provider = %descriptor.id,
            vendor = %descriptor.vendor,
            messages = conversation.len(),
            max_tokens = params.max_tokens,
            stream,
            "request translated"
        );
        Ok((descriptor.clone(), protocol, request))
    }

    /// Send one chat request and normalize the answer.
    #[instrument(
        name = "dispatch",
        skip(self, credentials, conversation, system_prompt),
        fields(dispatch_id = %Uuid::new_v4(), provider = %provider_id)
    )]
    pub async fn dispatch(
        &self,
        credentials: &CredentialStore,
        provider_id: &str,
        conversation: &[ConversationMessage],
        system_prompt: Option<&str>,
    ) -> DispatchResult {
        let (descriptor, protocol, request) =
            self.prepare_chat(credentials, provider_id, conversation, system_prompt, false)?;

        let response = self
            .transport
            .execute(request)
            .await
            .map_err(|e| transport_failure(&descriptor, e))?;

        if !response.is_success() {
            return Err(rejected(&descriptor, response.status, &response.body));
        }

        let normalized = protocol
            .normalize(&response.body)
            .map_err(|e| malformed(&descriptor, response.status, e))?;

        info!(
            provider = %descriptor.id,
            tokens = normalized.tokens_consumed,
            "dispatch completed"
        );
        Ok(Completion {
            content: normalized.content,
            tokens_consumed: normalized.tokens_consumed,
            provider_id: descriptor.id.clone(),
            provider: descriptor.name.clone(),
            completed_at: chrono::Utc::now(),
        })
    }

    /// Open a streamed completion.
    ///
    /// Local and HTTP-status failures are returned directly; failures after
    /// the stream has started arrive as a final [`StreamEvent::Failed`].
    #[instrument(
        name = "stream",
        skip(self, credentials, conversation, system_prompt),
        fields(dispatch_id = %Uuid::new_v4(), provider = %provider_id)
    )]
    pub async fn stream(
        &self,
        credentials: &CredentialStore,
        provider_id: &str,
        conversation: &[ConversationMessage],
        system_prompt: Option<&str>,
    ) -> Result<mpsc::Receiver<StreamEvent>, DispatchFailure> {
        let (descriptor, protocol, request) =
            self.prepare_chat(credentials, provider_id, conversation, system_prompt, true)?;

        let response = self
            .transport
            .execute_streaming(request)
            .await
            .map_err(|e| transport_failure(&descriptor, e))?;

        if !response.is_success() {
            let status = response.status;
            let body = response.into_text().await.unwrap_or_default();
            return Err(rejected(&descriptor, status, &body));
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(sse::drive_stream(protocol, descriptor, response.body, tx));
        Ok(rx)
    }

    /// Generate one image with an image-capable provider.
    #[instrument(
        name = "generate_image",
        skip(self, credentials, prompt),
        fields(dispatch_id = %Uuid::new_v4(), provider = %provider_id)
    )]
    pub async fn generate_image(
        &self,
        credentials: &CredentialStore,
        provider_id: &str,
        prompt: &str,
        size: &str,
    ) -> ImageResult {
        let descriptor = self.resolve(provider_id)?;

        let serves_images = descriptor.capability == Capability::Image
            && WireProtocol::for_vendor(descriptor.vendor).ok() == Some(WireProtocol::OpenAi);
        if !serves_images {
            return Err(fail(
                descriptor,
                FailureKind::Unsupported,
                format!("{} does not generate images", descriptor.name),
            ));
        }

        let size = ImageSize::parse(size)
            .map_err(|e| fail(descriptor, FailureKind::InvalidRequest, e.to_string()))?;
        if prompt.trim().is_empty() {
            return Err(fail(descriptor, FailureKind::InvalidRequest, "Image prompt is empty"));
        }

        let key = Self::credential(descriptor, credentials)?;
        let body = serde_json::to_value(image::build_body(
            descriptor,
            prompt,
            size,
            &self.config.image_quality,
        ))
        .map_err(|e| translate_failure(descriptor, e.into()))?;
        let request = Self::wire_request(descriptor, key.as_ref(), body, false)?;

        debug!(provider = %descriptor.id, %size, "image request translated");
        let response = self
            .transport
            .execute(request)
            .await
            .map_err(|e| transport_failure(descriptor, e))?;

        if !response.is_success() {
            return Err(rejected(descriptor, response.status, &response.body));
        }

        let url = image::normalize(&response.body)
            .map_err(|e| malformed(descriptor, response.status, e))?;
        info!(provider = %descriptor.id, "image generated");
        Ok(ImageAsset {
            url,
            provider_id: descriptor.id.clone(),
            provider: descriptor.name.clone(),
            created_at: chrono::Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Gateway facade
// ---------------------------------------------------------------------------

/// What chat and tool surfaces talk to: a registry, the credentials and a
/// dispatcher bundled behind one handle.
#[derive(Debug, Clone)]
pub struct Gateway {
    credentials: Arc<CredentialStore>,
    dispatcher: Dispatcher,
}

impl Gateway {
    pub fn new(registry: ProviderRegistry, credentials: Arc<CredentialStore>, config: DispatchConfig) -> Self {
        Self {
            credentials,
            dispatcher: Dispatcher::new(registry, config),
        }
    }

    pub fn with_dispatcher(dispatcher: Dispatcher, credentials: Arc<CredentialStore>) -> Self {
        Self {
            credentials,
            dispatcher,
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &ProviderRegistry {
        self.dispatcher.registry()
    }

    /// Providers usable with the credentials configured right now.
    pub fn list_available(&self) -> Vec<ProviderDescriptor> {
        availability::list_available(self.dispatcher.registry(), &self.credentials)
    }

    /// Merge keys into the credential store; vendors not listed are untouched.
    pub fn set_credentials<I, K>(&self, partial: I)
    where
        I: IntoIterator<Item = (Vendor, K)>,
        K: Into<String>,
    {
        self.credentials.set_credentials(partial);
    }

    pub async fn dispatch(
        &self,
        provider_id: &str,
        conversation: &[ConversationMessage],
        system_prompt: Option<&str>,
    ) -> DispatchResult {
        self.dispatcher
            .dispatch(&self.credentials, provider_id, conversation, system_prompt)
            .await
    }

    pub async fn stream(
        &self,
        provider_id: &str,
        conversation: &[ConversationMessage],
        system_prompt: Option<&str>,
    ) -> Result<mpsc::Receiver<StreamEvent>, DispatchFailure> {
        self.dispatcher
            .stream(&self.credentials, provider_id, conversation, system_prompt)
            .await
    }

    /// Generate an image with the default image provider.
    pub async fn generate_image(&self, prompt: &str, size: &str) -> ImageResult {
        self.generate_image_with(DEFAULT_IMAGE_PROVIDER, prompt, size)
            .await
    }

    pub async fn generate_image_with(&self, provider_id: &str, prompt: &str, size: &str) -> ImageResult {
        self.dispatcher
            .generate_image(&self.credentials, provider_id, prompt, size)
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
