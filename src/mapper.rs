//! Canonical request to provider payload translation.
//!
//! [`map_request`] is pure: the same request and capability always produce the
//! same payload and warnings. Out-of-range values are clamped and unsupported
//! fields dropped, each with a [`MappingWarning`]; only violations of the
//! canonical contract itself fail with a [`ValidationError`].

use crate::error::ValidationError;
use crate::models::{AspectRatio, GenerationRequest, ImageFormat};
use crate::provider::{DimensionBounds, ProviderCapability};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_PROMPT_CHARS: usize = 3000;
pub const DEFAULT_DIMENSION: u32 = 512;
const ASPECT_RATIO_BASE: u32 = 512;

/// Provider-ready parameters. Every present field lies inside the target
/// provider's capability bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderPayload {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub aspect_ratio: Option<AspectRatio>,
    pub num_images: u32,
    pub seed: Option<u64>,
    pub steps: Option<u32>,
    pub guidance_scale: Option<f32>,
    pub reference_images: Vec<String>,
    pub output_format: Option<ImageFormat>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MappingWarning {
    FieldDropped {
        field: String,
    },
    ValueClamped {
        field: String,
        requested: f64,
        applied: f64,
    },
    ReferenceImagesTruncated {
        supplied: usize,
        kept: usize,
    },
    DimensionsConverted {
        width: u32,
        height: u32,
        aspect_ratio: AspectRatio,
    },
}

impl MappingWarning {
    fn dropped(field: &str) -> Self {
        Self::FieldDropped {
            field: field.to_string(),
        }
    }

    fn clamped(field: &str, requested: f64, applied: f64) -> Self {
        Self::ValueClamped {
            field: field.to_string(),
            requested,
            applied,
        }
    }
}

impl fmt::Display for MappingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldDropped { field } => write!(f, "{} is not supported and was dropped", field),
            Self::ValueClamped {
                field,
                requested,
                applied,
            } => write!(f, "{} {} was clamped to {}", field, requested, applied),
            Self::ReferenceImagesTruncated { supplied, kept } => {
                write!(f, "{} reference images supplied, kept {}", supplied, kept)
            }
            Self::DimensionsConverted {
                width,
                height,
                aspect_ratio,
            } => write!(
                f,
                "{}x{} converted to aspect ratio {}",
                width, height, aspect_ratio
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappedRequest {
    pub payload: ProviderPayload,
    pub warnings: Vec<MappingWarning>,
}

pub fn map_request(
    request: &GenerationRequest,
    capability: &ProviderCapability,
) -> Result<MappedRequest, ValidationError> {
    validate(request, capability)?;

    let mut warnings = Vec::new();

    let negative_prompt = keep_if_supported(
        request.negative_prompt.clone(),
        capability.supports_negative_prompt,
        "negative_prompt",
        &mut warnings,
    );
    let seed = keep_if_supported(request.seed, capability.supports_seed, "seed", &mut warnings);

    let (width, height, aspect_ratio) = match capability.dimensions {
        Some(bounds) => {
            let (width, height) = map_dimensions(request, &bounds, &mut warnings);
            (Some(width), Some(height), None)
        }
        None => (None, None, map_aspect_ratio(request, capability, &mut warnings)),
    };

    let steps = match (request.steps, &capability.steps) {
        (Some(steps), Some(range)) => {
            let applied = steps.clamp(*range.start(), *range.end());
            if applied != steps {
                warnings.push(MappingWarning::clamped(
                    "steps",
                    f64::from(steps),
                    f64::from(applied),
                ));
            }
            Some(applied)
        }
        (Some(_), None) => {
            warnings.push(MappingWarning::dropped("steps"));
            None
        }
        (None, _) => None,
    };

    let guidance_scale = match (request.guidance_scale, &capability.guidance) {
        (Some(scale), Some(range)) => {
            let applied = scale.clamp(*range.start(), *range.end());
            if applied != scale {
                warnings.push(MappingWarning::clamped(
                    "guidance_scale",
                    f64::from(scale),
                    f64::from(applied),
                ));
            }
            Some(applied)
        }
        (Some(_), None) => {
            warnings.push(MappingWarning::dropped("guidance_scale"));
            None
        }
        (None, _) => None,
    };

    let mut reference_images = request.reference_images.clone();
    if reference_images.len() > capability.max_reference_images {
        if capability.max_reference_images == 0 {
            warnings.push(MappingWarning::dropped("reference_images"));
        } else {
            warnings.push(MappingWarning::ReferenceImagesTruncated {
                supplied: reference_images.len(),
                kept: capability.max_reference_images,
            });
        }
        reference_images.truncate(capability.max_reference_images);
    }

    let output_format = match request.output_format {
        Some(format) if !capability.output_formats.contains(&format) => {
            warnings.push(MappingWarning::dropped("output_format"));
            None
        }
        other => other,
    };

    Ok(MappedRequest {
        payload: ProviderPayload {
            prompt: request.prompt.trim().to_string(),
            negative_prompt,
            width,
            height,
            aspect_ratio,
            num_images: request.num_images.unwrap_or(1),
            seed,
            steps,
            guidance_scale,
            reference_images,
            output_format,
            model: request.model.clone(),
        },
        warnings,
    })
}

fn validate(
    request: &GenerationRequest,
    capability: &ProviderCapability,
) -> Result<(), ValidationError> {
    let prompt = request.prompt.trim();
    if prompt.is_empty() {
        return Err(ValidationError::EmptyPrompt);
    }
    let length = prompt.chars().count();
    if length > MAX_PROMPT_CHARS {
        return Err(ValidationError::PromptLength {
            length,
            max: MAX_PROMPT_CHARS,
        });
    }

    if let Some(negative) = &request.negative_prompt {
        let length = negative.chars().count();
        if length > MAX_PROMPT_CHARS {
            return Err(ValidationError::NegativePromptLength {
                length,
                max: MAX_PROMPT_CHARS,
            });
        }
    }

    let requested = request.num_images.unwrap_or(1);
    if requested == 0 || requested > capability.max_images {
        return Err(ValidationError::ImageCount {
            requested,
            max: capability.max_images,
        });
    }

    for (field, value) in [("width", request.width), ("height", request.height)] {
        if value == Some(0) {
            return Err(ValidationError::NonPositiveDimension {
                field: field.to_string(),
            });
        }
    }

    Ok(())
}

fn keep_if_supported<T>(
    value: Option<T>,
    supported: bool,
    field: &str,
    warnings: &mut Vec<MappingWarning>,
) -> Option<T> {
    if value.is_some() && !supported {
        warnings.push(MappingWarning::dropped(field));
        return None;
    }
    value
}

fn map_dimensions(
    request: &GenerationRequest,
    bounds: &DimensionBounds,
    warnings: &mut Vec<MappingWarning>,
) -> (u32, u32) {
    let (width, height) = match (request.width, request.height, request.aspect_ratio) {
        (None, None, Some(ratio)) => dimensions_for_aspect_ratio(ratio, ASPECT_RATIO_BASE),
        (width, height, ratio) => {
            if ratio.is_some() {
                warnings.push(MappingWarning::dropped("aspect_ratio"));
            }
            (
                width.unwrap_or(DEFAULT_DIMENSION),
                height.unwrap_or(DEFAULT_DIMENSION),
            )
        }
    };

    let mut fit = |field: &str, value: u32| {
        let applied = normalize_dimension(value, bounds);
        if value < bounds.min || value > bounds.max {
            warnings.push(MappingWarning::clamped(
                field,
                f64::from(value),
                f64::from(applied),
            ));
        }
        applied
    };

    (fit("width", width), fit("height", height))
}

fn map_aspect_ratio(
    request: &GenerationRequest,
    capability: &ProviderCapability,
    warnings: &mut Vec<MappingWarning>,
) -> Option<AspectRatio> {
    if let Some(ratio) = request.aspect_ratio {
        for (field, value) in [("width", request.width), ("height", request.height)] {
            if value.is_some() {
                warnings.push(MappingWarning::dropped(field));
            }
        }
        if capability.aspect_ratios.contains(&ratio) {
            return Some(ratio);
        }
        warnings.push(MappingWarning::dropped("aspect_ratio"));
        return None;
    }

    match (request.width, request.height) {
        (Some(width), Some(height)) => {
            let ratio = closest_aspect_ratio(width, height, capability.aspect_ratios);
            match ratio {
                Some(aspect_ratio) => warnings.push(MappingWarning::DimensionsConverted {
                    width,
                    height,
                    aspect_ratio,
                }),
                None => {
                    warnings.push(MappingWarning::dropped("width"));
                    warnings.push(MappingWarning::dropped("height"));
                }
            }
            ratio
        }
        (Some(_), None) => {
            warnings.push(MappingWarning::dropped("width"));
            None
        }
        (None, Some(_)) => {
            warnings.push(MappingWarning::dropped("height"));
            None
        }
        (None, None) => None,
    }
}

/// Round to the nearest allowed multiple (ties round down), then clamp into
/// the largest multiple-aligned range inside the bounds.
///
/// Nearest rather than floor: flooring would send 500 to 448 on a 64 grid
/// where 512 is the closer size the caller asked for.
pub fn normalize_dimension(value: u32, bounds: &DimensionBounds) -> u32 {
    let step = bounds.multiple_of.max(1);
    let floor = value / step * step;
    let rounded = if value - floor > step / 2 {
        floor.saturating_add(step)
    } else {
        floor
    };
    let min = bounds.min.div_ceil(step) * step;
    let max = bounds.max / step * step;
    rounded.clamp(min, max.max(min))
}

/// Dimensions for `ratio` with the longer side at `base`.
pub fn dimensions_for_aspect_ratio(ratio: AspectRatio, base: u32) -> (u32, u32) {
    let (w, h) = ratio.terms();
    if w >= h {
        (base, base * h / w)
    } else {
        (base * w / h, base)
    }
}

pub fn closest_aspect_ratio(
    width: u32,
    height: u32,
    allowed: &[AspectRatio],
) -> Option<AspectRatio> {
    let target = f64::from(width) / f64::from(height);
    allowed
        .iter()
        .copied()
        .min_by(|a, b| (a.value() - target).abs().total_cmp(&(b.value() - target).abs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{GEMINI_CAPABILITY, LEONARDO_CAPABILITY, RUNWARE_CAPABILITY};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_in_range_dimension_rounds_to_nearest_multiple_without_warning() {
        let request = GenerationRequest::new("a red fox").with_dimensions(500, 500);

        let mapped = map_request(&request, &RUNWARE_CAPABILITY).unwrap();

        assert_eq!(mapped.payload.width, Some(512));
        assert_eq!(mapped.payload.height, Some(512));
        assert!(mapped.warnings.is_empty());
    }

    #[test]
    fn test_out_of_range_dimensions_clamp_with_warning() {
        let request = GenerationRequest::new("a red fox").with_dimensions(4000, 100);

        let mapped = map_request(&request, &RUNWARE_CAPABILITY).unwrap();

        assert_eq!(mapped.payload.width, Some(2048));
        assert_eq!(mapped.payload.height, Some(128));
        assert_eq!(
            mapped.warnings,
            vec![
                MappingWarning::clamped("width", 4000.0, 2048.0),
                MappingWarning::clamped("height", 100.0, 128.0),
            ]
        );
    }

    #[test]
    fn test_normalized_dimensions_always_satisfy_bounds() {
        for capability in [&RUNWARE_CAPABILITY, &LEONARDO_CAPABILITY] {
            let bounds = capability.dimensions.unwrap();
            for value in (1..=5000).step_by(37) {
                let applied = normalize_dimension(value, &bounds);
                assert!(bounds.contains(applied), "{} -> {}", value, applied);
            }
        }
    }

    #[test]
    fn test_missing_dimensions_default() {
        let mapped = map_request(&GenerationRequest::new("a red fox"), &LEONARDO_CAPABILITY).unwrap();

        assert_eq!(mapped.payload.width, Some(DEFAULT_DIMENSION));
        assert_eq!(mapped.payload.height, Some(DEFAULT_DIMENSION));
        assert_eq!(mapped.payload.num_images, 1);
    }

    #[test]
    fn test_aspect_ratio_derives_dimensions_for_sized_provider() {
        let request = GenerationRequest::new("a red fox").with_aspect_ratio(AspectRatio::Landscape);

        let mapped = map_request(&request, &RUNWARE_CAPABILITY).unwrap();

        assert_eq!(mapped.payload.width, Some(512));
        assert_eq!(mapped.payload.height, Some(256));
        assert_eq!(mapped.payload.aspect_ratio, None);
        assert!(mapped.warnings.is_empty());
    }

    #[test]
    fn test_explicit_dimensions_win_over_aspect_ratio() {
        let request = GenerationRequest::new("a red fox")
            .with_dimensions(768, 512)
            .with_aspect_ratio(AspectRatio::Portrait);

        let mapped = map_request(&request, &LEONARDO_CAPABILITY).unwrap();

        assert_eq!(mapped.payload.width, Some(768));
        assert_eq!(mapped.payload.height, Some(512));
        assert_eq!(mapped.warnings, vec![MappingWarning::dropped("aspect_ratio")]);
    }

    #[test]
    fn test_dimensions_convert_to_aspect_ratio_for_token_provider() {
        let request = GenerationRequest::new("a red fox").with_dimensions(1920, 1080);

        let mapped = map_request(&request, &GEMINI_CAPABILITY).unwrap();

        assert_eq!(mapped.payload.width, None);
        assert_eq!(mapped.payload.aspect_ratio, Some(AspectRatio::Landscape));
        assert_eq!(
            mapped.warnings,
            vec![MappingWarning::DimensionsConverted {
                width: 1920,
                height: 1080,
                aspect_ratio: AspectRatio::Landscape,
            }]
        );
    }

    #[test]
    fn test_unsupported_fields_are_dropped_with_warnings() {
        let request = GenerationRequest {
            steps: Some(30),
            guidance_scale: Some(7.0),
            reference_images: vec!["ref-1".to_string()],
            ..GenerationRequest::new("a red fox")
                .with_negative_prompt("blurry")
                .with_seed(42)
        };

        let mapped = map_request(&request, &GEMINI_CAPABILITY).unwrap();

        assert_eq!(mapped.payload.negative_prompt, None);
        assert_eq!(mapped.payload.seed, None);
        assert_eq!(mapped.payload.steps, None);
        assert!(mapped.payload.reference_images.is_empty());
        assert_eq!(
            mapped.warnings,
            vec![
                MappingWarning::dropped("negative_prompt"),
                MappingWarning::dropped("seed"),
                MappingWarning::dropped("steps"),
                MappingWarning::dropped("guidance_scale"),
                MappingWarning::dropped("reference_images"),
            ]
        );
    }

    #[test]
    fn test_steps_and_guidance_clamp_to_provider_range() {
        let request = GenerationRequest {
            steps: Some(200),
            guidance_scale: Some(0.5),
            ..GenerationRequest::new("a red fox")
        };

        let mapped = map_request(&request, &LEONARDO_CAPABILITY).unwrap();

        assert_eq!(mapped.payload.steps, Some(60));
        assert_eq!(mapped.payload.guidance_scale, Some(1.0));
        assert_eq!(mapped.warnings.len(), 2);
    }

    #[test]
    fn test_reference_images_truncate_to_capability() {
        let request = GenerationRequest {
            reference_images: vec!["a".into(), "b".into(), "c".into()],
            ..GenerationRequest::new("a red fox")
        };

        let mapped = map_request(&request, &RUNWARE_CAPABILITY).unwrap();

        assert_eq!(mapped.payload.reference_images, vec!["a".to_string()]);
        assert_eq!(
            mapped.warnings,
            vec![MappingWarning::ReferenceImagesTruncated {
                supplied: 3,
                kept: 1
            }]
        );
    }

    #[test]
    fn test_blank_prompt_is_rejected() {
        let err = map_request(&GenerationRequest::new("   \n"), &RUNWARE_CAPABILITY).unwrap_err();
        assert_eq!(err, ValidationError::EmptyPrompt);
    }

    #[test]
    fn test_overlong_prompts_are_rejected() {
        let long = "x".repeat(MAX_PROMPT_CHARS + 1);

        let err = map_request(&GenerationRequest::new(long.clone()), &RUNWARE_CAPABILITY).unwrap_err();
        assert_eq!(
            err,
            ValidationError::PromptLength {
                length: MAX_PROMPT_CHARS + 1,
                max: MAX_PROMPT_CHARS
            }
        );

        let request = GenerationRequest::new("a red fox").with_negative_prompt(long);
        let err = map_request(&request, &RUNWARE_CAPABILITY).unwrap_err();
        assert!(matches!(err, ValidationError::NegativePromptLength { .. }));
    }

    #[test]
    fn test_image_count_outside_capability_is_rejected() {
        let request = GenerationRequest::new("a red fox").with_num_images(2);
        let err = map_request(&request, &GEMINI_CAPABILITY).unwrap_err();
        assert_eq!(
            err,
            ValidationError::ImageCount {
                requested: 2,
                max: 1
            }
        );

        let request = GenerationRequest::new("a red fox").with_num_images(0);
        assert!(map_request(&request, &RUNWARE_CAPABILITY).is_err());
    }

    #[test]
    fn test_zero_dimension_is_rejected() {
        let request = GenerationRequest::new("a red fox").with_dimensions(0, 512);
        let err = map_request(&request, &RUNWARE_CAPABILITY).unwrap_err();
        assert_eq!(
            err,
            ValidationError::NonPositiveDimension {
                field: "width".to_string()
            }
        );
    }

    #[test]
    fn test_mapping_is_deterministic() {
        let request = GenerationRequest::new("  a red fox  ")
            .with_dimensions(1000, 700)
            .with_seed(7);

        let first = map_request(&request, &LEONARDO_CAPABILITY).unwrap();
        let second = map_request(&request, &LEONARDO_CAPABILITY).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.payload.prompt, "a red fox");
    }

    #[test]
    fn test_closest_aspect_ratio() {
        assert_eq!(
            closest_aspect_ratio(1000, 1300, &AspectRatio::ALL),
            Some(AspectRatio::Tall)
        );
        assert_eq!(closest_aspect_ratio(10, 10, &[]), None);
    }
}
