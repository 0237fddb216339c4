pub mod anthropic;
pub mod models;
pub mod openai;
pub mod registry;
pub mod retry;
pub mod sse;
pub mod stream;

pub mod mock;

pub use anthropic::AnthropicProvider;
pub use mock::{MockProvider, MockResponse};
pub use models::ModelRef;
pub use openai::{ApiFlavor, OpenAiCompatConfig, OpenAiProvider};
pub use registry::ProviderRegistry;
pub use retry::RetryConfig;
