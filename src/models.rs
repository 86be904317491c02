//! Data models and structures
//!
//! Defines the canonical request and result shapes shared by every provider,
//! the identifiers used to track jobs, and environment configuration.

use crate::orchestrator::DEFAULT_JOB_RETENTION;
use crate::polling::PollConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Process-assigned job identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Runware,
    Leonardo,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Runware => "runware",
            Self::Leonardo => "leonardo",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "runware" => Ok(Self::Runware),
            "leonardo" => Ok(Self::Leonardo),
            other => Err(Error::Config(format!("Unknown provider '{}'", other))),
        }
    }
}

/// How a provider delivers its final result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mechanism {
    /// One request, image bytes inline in the response body.
    SyncInline,
    /// One request, images referenced by URL in the response body.
    SyncDirect,
    /// Submit returns an id; completion arrives by polling or webhook.
    AsyncPolled,
}

impl Mechanism {
    pub fn is_async(self) -> bool {
        matches!(self, Self::AsyncPolled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "4:3")]
    Wide,
    #[serde(rename = "3:4")]
    Tall,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        Self::Square,
        Self::Landscape,
        Self::Portrait,
        Self::Wide,
        Self::Tall,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
            Self::Wide => "4:3",
            Self::Tall => "3:4",
        }
    }

    /// Width and height terms of the ratio.
    pub fn terms(self) -> (u32, u32) {
        match self {
            Self::Square => (1, 1),
            Self::Landscape => (16, 9),
            Self::Portrait => (9, 16),
            Self::Wide => (4, 3),
            Self::Tall => (3, 4),
        }
    }

    pub fn value(self) -> f64 {
        let (w, h) = self.terms();
        f64::from(w) / f64::from(h)
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }
}

/// Canonical, provider-agnostic generation input. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_images: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<AspectRatio>,
    /// Opaque content handles (provider image ids or URLs).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance_scale: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<ImageFormat>,
    /// Provider-specific model override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_num_images(mut self, num_images: u32) -> Self {
        self.num_images = Some(num_images);
        self
    }

    pub fn with_negative_prompt(mut self, negative_prompt: impl Into<String>) -> Self {
        self.negative_prompt = Some(negative_prompt.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = Some(aspect_ratio);
        self
    }
}

/// Where a produced image can be obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    Url {
        url: String,
    },
    Inline {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    /// Provider-assigned image id, when the provider issues one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_image_id: Option<String>,
    pub source: ImageSource,
    pub format: ImageFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsfw: Option<bool>,
}

/// Opaque provider metadata; keys are preserved as the provider sent them.
pub type UsageMetadata = BTreeMap<String, serde_json::Value>;

/// Canonical result of a completed generation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenerationResult {
    pub images: Vec<GeneratedImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    /// Seed the provider actually used for the whole generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub usage: UsageMetadata,
}

mod base64_bytes {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

// Configuration
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub api_key: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub gemini: Option<ProviderSettings>,
    pub runware: Option<ProviderSettings>,
    pub leonardo: Option<ProviderSettings>,
    pub leonardo_webhook_secret: Option<String>,
    pub listen_addr: SocketAddr,
    pub poll: PollConfig,
    /// How long terminal jobs stay in memory after being persisted.
    pub job_retention: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = PollConfig::default();
        let poll = PollConfig {
            initial_delay: Duration::from_millis(env_or(
                "POLL_INITIAL_DELAY_MS",
                duration_ms(defaults.initial_delay),
            )?),
            max_delay: Duration::from_millis(env_or(
                "POLL_MAX_DELAY_MS",
                duration_ms(defaults.max_delay),
            )?),
            multiplier: env_or("POLL_MULTIPLIER", defaults.multiplier)?,
            jitter: env_or("POLL_JITTER", defaults.jitter)?,
            max_attempts: env_or("POLL_MAX_ATTEMPTS", defaults.max_attempts)?,
            deadline: Duration::from_secs(env_or("POLL_DEADLINE_SECS", defaults.deadline.as_secs())?),
            rate_limit_extension: Duration::from_millis(env_or(
                "POLL_RATE_LIMIT_EXTENSION_MS",
                duration_ms(defaults.rate_limit_extension),
            )?),
            max_concurrent_polls: env_or("MAX_CONCURRENT_POLLS", defaults.max_concurrent_polls)?,
        };

        let config = Self {
            gemini: provider_settings("GEMINI"),
            runware: provider_settings("RUNWARE"),
            leonardo: provider_settings("LEONARDO"),
            leonardo_webhook_secret: std::env::var("LEONARDO_WEBHOOK_SECRET").ok(),
            listen_addr: env_or("WEBHOOK_LISTEN_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            poll,
            job_retention: Duration::from_secs(env_or(
                "JOB_RETENTION_SECS",
                DEFAULT_JOB_RETENTION.as_secs(),
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.gemini.is_none() && self.runware.is_none() && self.leonardo.is_none() {
            return Err(Error::Config(
                "At least one of GEMINI_API_KEY, RUNWARE_API_KEY or LEONARDO_API_KEY must be set"
                    .to_string(),
            ));
        }
        self.poll.validate()
    }
}

fn provider_settings(prefix: &str) -> Option<ProviderSettings> {
    let api_key = std::env::var(format!("{}_API_KEY", prefix))
        .ok()
        .filter(|key| !key.trim().is_empty())?;

    Some(ProviderSettings {
        api_key,
        model: std::env::var(format!("{}_MODEL", prefix)).ok(),
        base_url: std::env::var(format!("{}_BASE_URL", prefix)).ok(),
    })
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("{} has an invalid value: '{}'", key, raw))),
        Err(_) => Ok(default),
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization_omits_unset_fields() {
        let request = GenerationRequest::new("a red fox").with_dimensions(500, 500);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "prompt": "a red fox", "width": 500, "height": 500 })
        );

        let parsed: GenerationRequest = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_aspect_ratio_tokens() {
        let json = serde_json::to_string(&AspectRatio::Landscape).unwrap();
        assert_eq!(json, "\"16:9\"");
        assert_eq!(AspectRatio::Portrait.terms(), (9, 16));
    }

    #[test]
    fn test_provider_kind_parses_case_insensitively() {
        assert_eq!("Leonardo".parse::<ProviderKind>().unwrap(), ProviderKind::Leonardo);
        assert!("midjourney".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_inline_image_serializes_as_base64() {
        let image = GeneratedImage {
            provider_image_id: None,
            source: ImageSource::Inline {
                data: vec![0x89, 0x50, 0x4E, 0x47],
            },
            format: ImageFormat::Png,
            width: Some(1),
            height: Some(1),
            seed: None,
            nsfw: None,
        };

        let json = serde_json::to_value(&image).unwrap();
        assert_eq!(json["source"]["data"], "iVBORw==");

        let parsed: GeneratedImage = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, image);
    }
}
