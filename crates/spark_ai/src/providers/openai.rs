//! OpenAI chat completions protocol (GPT models).
//!
//! The system prompt travels as a prepended `system` message. Usage is a
//! single `total_tokens` counter that is taken as-is.

use serde::{Deserialize, Serialize};

use super::sse::{Frame, StreamUsage};
use super::{GenerationParams, NormalizeError, Normalized};
use crate::registry::ProviderDescriptor;
use crate::types::{ConversationMessage, MessageRole};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct OpenAiChatRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    /// When streaming, ask the API to include usage in the final frame.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Serialize)]
pub struct OpenAiMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: Option<CompletionMessage>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionUsage {
    total_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// Translation
// ---------------------------------------------------------------------------

/// Role table for OpenAI messages.
pub fn role_token(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
    }
}

pub fn build_body(
    descriptor: &ProviderDescriptor,
    conversation: &[ConversationMessage],
    system_prompt: Option<&str>,
    params: GenerationParams,
    stream: bool,
) -> OpenAiChatRequest {
    let mut messages = Vec::with_capacity(conversation.len() + 1);

    if let Some(sys) = system_prompt {
        messages.push(OpenAiMessage {
            role: role_token(MessageRole::System),
            content: sys.to_string(),
        });
    }

    messages.extend(conversation.iter().map(|m| OpenAiMessage {
        role: role_token(m.role),
        content: m.content.clone(),
    }));

    OpenAiChatRequest {
        model: descriptor.model.clone(),
        messages,
        max_tokens: params.max_tokens,
        temperature: params.temperature,
        stream,
        stream_options: stream.then_some(StreamOptions {
            include_usage: true,
        }),
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

pub fn normalize(body: &str) -> Result<Normalized, NormalizeError> {
    let data: ChatCompletionResponse = serde_json::from_str(body)?;

    let content = data
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .ok_or(NormalizeError::MissingField("choices[0].message.content"))?;

    let tokens_consumed = data
        .usage
        .and_then(|u| u.total_tokens)
        .ok_or(NormalizeError::MissingField("usage.total_tokens"))?;

    Ok(Normalized {
        content,
        tokens_consumed,
    })
}

pub(crate) fn decode_frame(data: &str, usage: &mut StreamUsage) -> Result<Frame, NormalizeError> {
    if data == "[DONE]" {
        return Ok(Frame::End);
    }

    let frame: StreamFrame = serde_json::from_str(data)?;
    if let Some(total) = frame.usage.and_then(|u| u.total_tokens) {
        usage.total_tokens = Some(total);
    }

    Ok(frame
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .map_or(Frame::Ignore, Frame::Text))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
