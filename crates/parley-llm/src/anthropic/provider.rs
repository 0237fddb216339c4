use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, instrument};

use parley_core::{
    ChatOptions, ChatResult, Message, ModelInfo, ProviderAdapter, ProviderError, ToolReplay,
    ToolRound,
};

use super::converter;
use super::stream::AnthropicStream;
use crate::models::{self, ANTHROPIC_MODELS};
use crate::retry::{with_overload_retry, RetryConfig};
use crate::stream::{drive_stream, send_request, CONNECT_TIMEOUT, SSE_IDLE_TIMEOUT};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const NAME: &str = "anthropic";

pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: RwLock<Option<SecretString>>,
    retry: RetryConfig,
    idle_timeout: Duration,
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl AnthropicProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: RwLock::new(None),
            retry: RetryConfig::default(),
            idle_timeout: SSE_IDLE_TIMEOUT,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    fn api_key(&self) -> Result<SecretString, ProviderError> {
        self.api_key
            .read()
            .clone()
            .ok_or_else(|| ProviderError::NotInitialized(NAME.into()))
    }

    async fn request(
        &self,
        messages: &[Message],
        rounds: &[ToolRound],
        options: &ChatOptions,
    ) -> Result<ChatResult, ProviderError> {
        let key = self.api_key()?;
        let catalog = models::find_model(ANTHROPIC_MODELS, &options.model);
        let max_tokens = options
            .max_tokens
            .unwrap_or_else(|| models::max_output_for(ANTHROPIC_MODELS, &options.model));
        let body = converter::build_request_body(
            messages,
            rounds,
            &options.model,
            &options.system_prompt,
            &options.tools,
            max_tokens,
            catalog.map_or(true, |m| m.supports_images),
        );
        debug!(
            model = %options.model,
            rounds = rounds.len(),
            tools = options.tools.len(),
            max_tokens,
            "sending messages request"
        );

        let (key, body) = (&key, &body);
        with_overload_retry(NAME, &self.retry, &options.cancel, move |_| {
            self.attempt(key, body, options)
        })
        .await
    }

    async fn attempt(
        &self,
        key: &SecretString,
        body: &Value,
        options: &ChatOptions,
    ) -> Result<ChatResult, ProviderError> {
        let req = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("accept", "text/event-stream")
            .header("content-type", "application/json")
            .json(body);

        let Some(resp) = send_request(req, &options.cancel).await? else {
            return Ok(ChatResult::cancelled());
        };
        drive_stream(resp.bytes_stream(), AnthropicStream::new(), options, self.idle_timeout).await
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn initialize(&self, credential: SecretString) -> Result<(), ProviderError> {
        if credential.expose_secret().trim().is_empty() {
            return Err(ProviderError::AuthenticationFailed("empty API key".into()));
        }
        *self.api_key.write() = Some(credential);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.api_key.read().is_some()
    }

    #[instrument(skip_all, fields(provider = NAME, model = %options.model))]
    async fn send_message(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChatResult, ProviderError> {
        self.request(messages, &[], options).await
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        ANTHROPIC_MODELS.iter().map(|m| m.to_info()).collect()
    }

    fn tool_replay(&self) -> Option<&dyn ToolReplay> {
        Some(self)
    }

    fn title_model(&self) -> Option<String> {
        Some("claude-haiku-4-5".into())
    }
}

#[async_trait]
impl ToolReplay for AnthropicProvider {
    #[instrument(skip_all, fields(provider = NAME, model = %options.model, rounds = rounds.len()))]
    async fn send_message_with_tool_results(
        &self,
        messages: &[Message],
        rounds: &[ToolRound],
        options: &ChatOptions,
    ) -> Result<ChatResult, ProviderError> {
        self.request(messages, rounds, options).await
    }
}
