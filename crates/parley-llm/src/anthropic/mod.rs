//! Anthropic Messages API adapter.

pub mod converter;
pub mod provider;
pub mod stream;

pub use provider::{AnthropicProvider, DEFAULT_BASE_URL};
