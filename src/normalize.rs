//! Provider response normalization.
//!
//! Converts provider-native image payloads into [`GeneratedImage`]s and
//! provider failures into the [`AdapterError`] taxonomy. Unknown provider
//! error codes fall back to `ProviderFault`.

use crate::error::AdapterError;
use crate::models::{GeneratedImage, GenerationResult, ImageFormat, ImageSource, ProviderKind, UsageMetadata};
use crate::provider::mime;
use reqwest::StatusCode;
use std::io::Cursor;

const MAX_CAUSE_BODY_CHARS: usize = 512;

/// Build an image from inline bytes, reading dimensions from the header.
pub fn image_from_inline(data: Vec<u8>, mime_hint: Option<&str>) -> GeneratedImage {
    let format = mime::sniff_image_format(&data)
        .or_else(|| mime_hint.and_then(mime::format_from_mime))
        .unwrap_or_else(|| mime::detect_image_format(&data));
    let (width, height) = match header_dimensions(&data) {
        Some((w, h)) => (Some(w), Some(h)),
        None => (None, None),
    };

    GeneratedImage {
        provider_image_id: None,
        source: ImageSource::Inline { data },
        format,
        width,
        height,
        seed: None,
        nsfw: None,
    }
}

/// Build an image referenced by URL; the format comes from the extension
/// unless the provider reported one.
pub fn image_from_url(url: String, format_hint: Option<ImageFormat>) -> GeneratedImage {
    let format = format_hint
        .or_else(|| mime::format_from_url(&url))
        .unwrap_or_default();

    GeneratedImage {
        provider_image_id: None,
        source: ImageSource::Url { url },
        format,
        width: None,
        height: None,
        seed: None,
        nsfw: None,
    }
}

fn header_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Sum the costs a provider reported; `None` when it reported none.
pub fn total_cost(costs: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    costs
        .into_iter()
        .flatten()
        .fold(None, |total, cost| Some(total.unwrap_or(0.0) + cost))
}

/// Keep a provider's usage object as-is; non-object values are stored under
/// `"raw"`.
pub fn usage_from_value(value: Option<serde_json::Value>) -> UsageMetadata {
    match value {
        Some(serde_json::Value::Object(map)) => map.into_iter().collect(),
        Some(serde_json::Value::Null) | None => UsageMetadata::new(),
        Some(other) => UsageMetadata::from([("raw".to_string(), other)]),
    }
}

/// Attach the submission-time cost when completion did not report one.
pub fn merge_submission_cost(mut result: GenerationResult, submission_cost: Option<f64>) -> GenerationResult {
    if result.cost.is_none() {
        result.cost = submission_cost;
    }
    result
}

pub fn adapter_error_from_status(status: StatusCode, body: &str) -> AdapterError {
    let cause = format!("HTTP {}: {}", status.as_u16(), truncate(body));
    match status.as_u16() {
        401 | 403 => AdapterError::auth(cause),
        429 => AdapterError::rate_limited(cause),
        408 => AdapterError::network(cause),
        400 | 404 | 409 | 413 | 422 => AdapterError::invalid_request(cause),
        _ => AdapterError::provider_fault(cause),
    }
}

pub fn adapter_error_from_transport(err: &reqwest::Error) -> AdapterError {
    if err.is_decode() {
        AdapterError::provider_fault(format!("undecodable response: {}", err))
    } else {
        AdapterError::network(err.to_string())
    }
}

pub fn malformed_response(provider: ProviderKind, err: &serde_json::Error) -> AdapterError {
    AdapterError::provider_fault(format!("malformed {} response: {}", provider, err))
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_CAUSE_BODY_CHARS {
        return body.to_string();
    }
    let mut cut: String = body.chars().take(MAX_CAUSE_BODY_CHARS).collect();
    cut.push_str("...");
    cut
}
