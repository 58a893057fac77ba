//! Image generation (OpenAI images endpoint).
//!
//! Shares nothing with the chat protocols beyond auth: the body is a prompt
//! plus a size from a fixed allow-list, and the answer is a single URL.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::NormalizeError;
use crate::registry::ProviderDescriptor;

pub const DEFAULT_IMAGE_QUALITY: &str = "standard";

static SIZE_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([1-9][0-9]*)x([1-9][0-9]*)$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageSizeError {
    #[error("image size '{0}' is not of the form <width>x<height>")]
    Malformed(String),

    #[error("image size {0} is not supported (expected one of 1024x1024, 1024x1792, 1792x1024)")]
    NotAllowed(String),
}

/// The sizes the images endpoint accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ImageSize {
    #[default]
    Square,
    Portrait,
    Landscape,
}

impl ImageSize {
    pub const ALL: [ImageSize; 3] = [Self::Square, Self::Portrait, Self::Landscape];

    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::Square => (1024, 1024),
            Self::Portrait => (1024, 1792),
            Self::Landscape => (1792, 1024),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square => "1024x1024",
            Self::Portrait => "1024x1792",
            Self::Landscape => "1792x1024",
        }
    }

    /// Shape check first, then the allow-list.
    pub fn parse(raw: &str) -> Result<Self, ImageSizeError> {
        let trimmed = raw.trim();
        let caps = SIZE_SHAPE
            .captures(trimmed)
            .ok_or_else(|| ImageSizeError::Malformed(raw.to_string()))?;
        let width: u32 = caps[1]
            .parse()
            .map_err(|_| ImageSizeError::Malformed(raw.to_string()))?;
        let height: u32 = caps[2]
            .parse()
            .map_err(|_| ImageSizeError::Malformed(raw.to_string()))?;

        Self::ALL
            .into_iter()
            .find(|s| s.dimensions() == (width, height))
            .ok_or_else(|| ImageSizeError::NotAllowed(trimmed.to_string()))
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageSize {
    type Err = ImageSizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub size: &'static str,
    pub quality: String,
    pub n: u32,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
}

pub fn build_body(
    descriptor: &ProviderDescriptor,
    prompt: &str,
    size: ImageSize,
    quality: &str,
) -> ImageRequest {
    ImageRequest {
        model: descriptor.model.clone(),
        prompt: prompt.to_string(),
        size: size.as_str(),
        quality: quality.to_string(),
        n: 1,
    }
}

/// Extract the single asset URL from a success body.
pub fn normalize(body: &str) -> Result<String, NormalizeError> {
    let data: ImageResponse = serde_json::from_str(body)?;
    data.data
        .into_iter()
        .next()
        .and_then(|d| d.url)
        .filter(|u| !u.is_empty())
        .ok_or(NormalizeError::MissingField("data[0].url"))
}
