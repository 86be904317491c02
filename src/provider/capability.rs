//! Static per-adapter capability descriptors.

use crate::models::{AspectRatio, ImageFormat, Mechanism, ProviderKind};
use std::ops::RangeInclusive;

/// Width/height domain and divisibility rule for providers that take
/// explicit pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimensionBounds {
    pub min: u32,
    pub max: u32,
    pub multiple_of: u32,
}

impl DimensionBounds {
    pub fn contains(&self, value: u32) -> bool {
        (self.min..=self.max).contains(&value) && value % self.multiple_of.max(1) == 0
    }
}

/// What a provider accepts and how it completes.
///
/// Read-only after adapter registration; the parameter mapper validates and
/// clamps against it before anything is sent.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCapability {
    pub provider: ProviderKind,
    pub mechanism: Mechanism,
    /// `None` means the provider sizes output from an aspect-ratio token.
    pub dimensions: Option<DimensionBounds>,
    pub aspect_ratios: &'static [AspectRatio],
    pub max_images: u32,
    pub steps: Option<RangeInclusive<u32>>,
    pub guidance: Option<RangeInclusive<f32>>,
    pub supports_negative_prompt: bool,
    pub supports_seed: bool,
    pub supports_webhook: bool,
    pub max_reference_images: usize,
    pub output_formats: &'static [ImageFormat],
}
