//! Google Generative Language protocol (Gemini models).
//!
//! Gemini has no system role: the system prompt is sent as a leading `user`
//! turn, and in-conversation system messages are mapped to `user` as well.

use serde::{Deserialize, Serialize};

use super::sse::{Frame, StreamUsage};
use super::{GenerationParams, NormalizeError, Normalized, TranslateError};
use crate::types::{ConversationMessage, MessageRole};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequest {
    pub contents: Vec<GeminiContent>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    total_token_count: Option<u64>,
}

// ---------------------------------------------------------------------------
// Translation
// ---------------------------------------------------------------------------

pub fn role_token(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User | MessageRole::System => "user",
        MessageRole::Assistant => "model",
    }
}

fn content(role: &str, text: &str) -> GeminiContent {
    GeminiContent {
        role: Some(role.to_string()),
        parts: vec![GeminiPart {
            text: Some(text.to_string()),
        }],
    }
}

pub fn build_body(
    conversation: &[ConversationMessage],
    system_prompt: Option<&str>,
    params: GenerationParams,
) -> GeminiRequest {
    let mut contents = Vec::with_capacity(conversation.len() + 1);
    if let Some(sys) = system_prompt {
        contents.push(content(role_token(MessageRole::System), sys));
    }
    contents.extend(
        conversation
            .iter()
            .map(|m| content(role_token(m.role), &m.content)),
    );

    GeminiRequest {
        contents,
        generation_config: GenerationConfig {
            max_output_tokens: params.max_tokens,
            temperature: params.temperature,
        },
    }
}

/// Turn a `:generateContent` endpoint into its SSE streaming counterpart.
pub fn stream_endpoint(endpoint: &str) -> Result<String, TranslateError> {
    let invalid = |reason: &str| TranslateError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };

    let mut url = url::Url::parse(endpoint).map_err(|e| invalid(&e.to_string()))?;
    let path = url.path().to_string();
    let Some(base) = path.strip_suffix(":generateContent") else {
        return Err(invalid("expected a path ending in :generateContent"));
    };
    url.set_path(&format!("{base}:streamGenerateContent"));
    url.query_pairs_mut().append_pair("alt", "sse");
    Ok(url.into())
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

fn candidate_text(candidates: Vec<Candidate>) -> Option<String> {
    let parts = candidates.into_iter().next()?.content?.parts;
    let texts: Vec<String> = parts.into_iter().filter_map(|p| p.text).collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.concat())
    }
}

pub fn normalize(body: &str) -> Result<Normalized, NormalizeError> {
    let data: GeminiResponse = serde_json::from_str(body)?;

    // Gemini omits usage on some responses; treat it as zero.
    let tokens_consumed = data
        .usage_metadata
        .and_then(|u| u.total_token_count)
        .unwrap_or(0);
    let content = candidate_text(data.candidates)
        .ok_or(NormalizeError::MissingField("candidates[0].content.parts[].text"))?;

    Ok(Normalized {
        content,
        tokens_consumed,
    })
}

pub(crate) fn decode_frame(data: &str, usage: &mut StreamUsage) -> Result<Frame, NormalizeError> {
    let frame: GeminiResponse = serde_json::from_str(data)?;
    // Each chunk repeats the running total.
    if let Some(total) = frame.usage_metadata.and_then(|u| u.total_token_count) {
        usage.total_tokens = Some(total);
    }
    Ok(candidate_text(frame.candidates).map_or(Frame::Ignore, Frame::Text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> GenerationParams {
        GenerationParams {
            max_tokens: 4000,
            temperature: Some(0.7),
        }
    }

    #[test]
    fn roles_map_to_user_and_model() {
        assert_eq!(role_token(MessageRole::User), "user");
        assert_eq!(role_token(MessageRole::Assistant), "model");
        assert_eq!(role_token(MessageRole::System), "user");
    }

    #[test]
    fn system_prompt_becomes_leading_user_turn() {
        let conversation = vec![
            ConversationMessage::user("Bonjour"),
            ConversationMessage::assistant("Salut"),
        ];
        let body = build_body(&conversation, Some("Answer in French."), params());
        let json = serde_json::to_value(&body).unwrap();

        let contents = json["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[0]["parts"][0]["text"], "Answer in French.");
        assert_eq!(contents[1]["role"], "user");
        assert_eq!(contents[2]["role"], "model");
        assert_eq!(contents[2]["parts"][0]["text"], "Salut");
    }

    #[test]
    fn generation_config_uses_camel_case() {
        let body = build_body(&[ConversationMessage::user("hi")], None, params());
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 4000);
        let temp = json["generationConfig"]["temperature"].as_f64().unwrap();
        assert!((temp - 0.7).abs() < 0.001);
        assert!(json.get("generation_config").is_none());
    }

    #[test]
    fn stream_endpoint_swaps_method_and_adds_alt() {
        let url = stream_endpoint(
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:generateContent",
        )
        .unwrap();
        assert_eq!(
            url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn stream_endpoint_rejects_unexpected_path() {
        assert!(matches!(
            stream_endpoint("https://example.com/v1/chat"),
            Err(TranslateError::InvalidEndpoint { .. })
        ));
        assert!(stream_endpoint("::nope").is_err());
    }

    #[test]
    fn normalize_concatenates_parts() {
        let body = r#"{
            "candidates": [{
                "content": { "parts": [{ "text": "Hello " }, { "text": "world" }], "role": "model" },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6 }
        }"#;
        let normalized = normalize(body).unwrap();
        assert_eq!(normalized.content, "Hello world");
        assert_eq!(normalized.tokens_consumed, 6);
    }

    #[test]
    fn normalize_defaults_missing_usage_to_zero() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"ok"}]}}]}"#;
        assert_eq!(normalize(body).unwrap().tokens_consumed, 0);
    }

    #[test]
    fn normalize_requires_candidate_text() {
        let blocked = r#"{"candidates":[],"promptFeedback":{"blockReason":"SAFETY"}}"#;
        assert!(matches!(normalize(blocked), Err(NormalizeError::MissingField(_))));

        let no_parts = r#"{"candidates":[{"content":{"parts":[]}}]}"#;
        assert!(normalize(no_parts).is_err());
    }

    #[test]
    fn decode_frame_records_running_total() {
        let mut usage = StreamUsage::default();
        let frame = r#"{"candidates":[{"content":{"parts":[{"text":"Hi"}]}}],"usageMetadata":{"totalTokenCount":3}}"#;
        assert_eq!(decode_frame(frame, &mut usage).unwrap(), Frame::Text("Hi".into()));
        assert_eq!(usage.total_tokens, Some(3));

        let tail = r#"{"candidates":[{"finishReason":"STOP"}],"usageMetadata":{"totalTokenCount":7}}"#;
        assert_eq!(decode_frame(tail, &mut usage).unwrap(), Frame::Ignore);
        assert_eq!(usage.tokens_consumed(), 7);
    }
}
