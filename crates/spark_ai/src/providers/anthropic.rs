//! Anthropic Messages protocol (Claude models).
//!
//! The system prompt is a top-level `system` field, never a message. Usage
//! arrives as separate input/output counters which are summed.

use serde::{Deserialize, Serialize};

use super::sse::{Frame, StreamUsage};
use super::{GenerationParams, NormalizeError, Normalized};
use crate::registry::ProviderDescriptor;
use crate::types::{ConversationMessage, MessageRole};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct AnthropicMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

// -- SSE frames, tagged by their `type` field --

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamFrame {
    MessageStart {
        message: Option<StreamMessage>,
    },
    ContentBlockDelta {
        delta: Option<StreamDelta>,
    },
    MessageDelta {
        usage: Option<ApiUsage>,
    },
    MessageStop,
    Error {
        error: Option<StreamError>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(rename = "type")]
    delta_type: Option<String>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: Option<String>,
}

// ---------------------------------------------------------------------------
// Translation
// ---------------------------------------------------------------------------

/// Role table for Anthropic messages. `None` means the turn is lifted out
/// of the message list into the top-level `system` field.
pub fn role_token(role: MessageRole) -> Option<&'static str> {
    match role {
        MessageRole::User => Some("user"),
        MessageRole::Assistant => Some("assistant"),
        MessageRole::System => None,
    }
}

/// Resolve the single top-level system field.
///
/// The explicit prompt is the first candidate, every system-role message in
/// the conversation a later one; the last candidate wins.
pub fn resolve_system(conversation: &[ConversationMessage], system_prompt: Option<&str>) -> Option<String> {
    conversation
        .iter()
        .filter(|m| m.role == MessageRole::System)
        .map(|m| m.content.as_str())
        .last()
        .or(system_prompt)
        .map(str::to_string)
}

pub fn build_body(
    descriptor: &ProviderDescriptor,
    conversation: &[ConversationMessage],
    system_prompt: Option<&str>,
    params: GenerationParams,
    stream: bool,
) -> AnthropicRequest {
    let messages = conversation
        .iter()
        .filter_map(|m| {
            role_token(m.role).map(|role| AnthropicMessage {
                role,
                content: m.content.clone(),
            })
        })
        .collect();

    AnthropicRequest {
        model: descriptor.model.clone(),
        messages,
        max_tokens: params.max_tokens,
        system: resolve_system(conversation, system_prompt),
        temperature: params.temperature,
        stream,
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

pub fn normalize(body: &str) -> Result<Normalized, NormalizeError> {
    let data: AnthropicResponse = serde_json::from_str(body)?;

    let mut texts = data
        .content
        .into_iter()
        .filter(|b| b.block_type.as_deref().unwrap_or("text") == "text")
        .filter_map(|b| b.text)
        .peekable();
    if texts.peek().is_none() {
        return Err(NormalizeError::MissingField("content[].text"));
    }
    let content: String = texts.collect();

    let usage = data.usage.ok_or(NormalizeError::MissingField("usage"))?;
    let input = usage
        .input_tokens
        .ok_or(NormalizeError::MissingField("usage.input_tokens"))?;
    let output = usage
        .output_tokens
        .ok_or(NormalizeError::MissingField("usage.output_tokens"))?;

    let tokens_consumed = input
        .checked_add(output)
        .ok_or(NormalizeError::UsageOverflow { input, output })?;

    Ok(Normalized {
        content,
        tokens_consumed,
    })
}

pub(crate) fn decode_frame(data: &str, usage: &mut StreamUsage) -> Result<Frame, NormalizeError> {
    let frame: StreamFrame = serde_json::from_str(data)?;

    let decoded = match frame {
        StreamFrame::MessageStart { message } => {
            if let Some(u) = message.and_then(|m| m.usage) {
                usage.input_tokens = u.input_tokens.unwrap_or(0);
                usage.output_tokens = u.output_tokens.unwrap_or(0);
            }
            Frame::Ignore
        }
        StreamFrame::ContentBlockDelta { delta } => match delta {
            Some(StreamDelta {
                delta_type,
                text: Some(text),
            }) if delta_type.as_deref() == Some("text_delta") => Frame::Text(text),
            _ => Frame::Ignore,
        },
        StreamFrame::MessageDelta { usage: delta_usage } => {
            // message_delta carries the cumulative output count.
            if let Some(out) = delta_usage.and_then(|u| u.output_tokens) {
                usage.output_tokens = out;
            }
            Frame::Ignore
        }
        StreamFrame::MessageStop => Frame::End,
        StreamFrame::Error { error } => Frame::Error(
            error
                .and_then(|e| e.message)
                .unwrap_or_else(|| "Anthropic stream error".to_string()),
        ),
        StreamFrame::Other => Frame::Ignore,
    };
    Ok(decoded)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
