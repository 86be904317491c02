mod image;
pub mod types;

pub use image::{LeonardoImageAdapter, DEFAULT_MODEL, LEONARDO_CAPABILITY};
