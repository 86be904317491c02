//! Generation orchestration layer for image providers.
//!
//! Accepts provider-agnostic generation requests, adapts them to each
//! provider's capabilities, and drives every job to exactly one terminal
//! outcome whether the provider answers synchronously, by polling, or by
//! webhook.

pub mod app;
pub mod error;
pub mod mapper;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod polling;
pub mod provider;
pub mod store;
pub mod webhook;

pub use error::{Error, Result};
