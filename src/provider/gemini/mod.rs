mod image;
pub mod types;

pub use image::{GeminiImageAdapter, DEFAULT_MODEL, GEMINI_CAPABILITY};
