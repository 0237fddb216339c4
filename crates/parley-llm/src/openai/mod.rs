//! OpenAI Chat Completions adapter, also used for compatible vendors.

pub mod converter;
pub mod provider;
pub mod stream;

pub use provider::{ApiFlavor, OpenAiCompatConfig, OpenAiProvider, DEFAULT_BASE_URL};
