use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use parley_core::{
    ChatOptions, ChatResult, Message, ModelInfo, ProviderAdapter, ProviderError, ToolReplay,
    ToolRound,
};
use parley_settings::CompatibleVendorSettings;

use super::converter;
use super::stream::OpenAiStream;
use crate::models::{self, DEFAULT_MAX_OUTPUT, OPENAI_MODELS};
use crate::retry::{with_overload_retry, RetryConfig};
use crate::stream::{drive_stream, send_request, CONNECT_TIMEOUT, SSE_IDLE_TIMEOUT};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Which dialect of Chat Completions an endpoint speaks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ApiFlavor {
    /// api.openai.com: built-in catalog, `stream_options`, per-model output caps.
    OpenAi,
    /// Third-party server speaking the common subset only.
    #[default]
    Compatible,
}

/// Identity and capabilities of a Chat Completions endpoint.
#[derive(Clone, Debug)]
pub struct OpenAiCompatConfig {
    pub name: String,
    pub flavor: ApiFlavor,
    pub base_url: String,
    pub supports_tools: bool,
    pub supports_images: bool,
    /// Catalog for compatible vendors. Ignored for [`ApiFlavor::OpenAi`].
    pub models: Vec<ModelInfo>,
}

impl OpenAiCompatConfig {
    pub fn openai(base_url: impl Into<String>) -> Self {
        Self {
            name: "openai".into(),
            flavor: ApiFlavor::OpenAi,
            base_url: base_url.into(),
            supports_tools: true,
            supports_images: true,
            models: Vec::new(),
        }
    }
}

impl From<&CompatibleVendorSettings> for OpenAiCompatConfig {
    fn from(s: &CompatibleVendorSettings) -> Self {
        Self {
            name: s.name.clone(),
            flavor: ApiFlavor::Compatible,
            base_url: s.base_url.clone(),
            supports_tools: s.supports_tools,
            supports_images: s.supports_images,
            models: s
                .models
                .iter()
                .map(|id| ModelInfo {
                    id: id.clone(),
                    display_name: id.clone(),
                    context_window: 128_000,
                    max_output_tokens: DEFAULT_MAX_OUTPUT,
                    supports_tools: s.supports_tools,
                    supports_images: s.supports_images,
                })
                .collect(),
        }
    }
}

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiCompatConfig,
    api_key: RwLock<Option<SecretString>>,
    retry: RetryConfig,
    idle_timeout: Duration,
}

impl Default for OpenAiProvider {
    fn default() -> Self {
        Self::new(OpenAiCompatConfig::openai(DEFAULT_BASE_URL))
    }
}

impl OpenAiProvider {
    pub fn new(mut config: OpenAiCompatConfig) -> Self {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            config,
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

    pub fn config(&self) -> &OpenAiCompatConfig {
        &self.config
    }

    fn is_openai(&self) -> bool {
        self.config.flavor == ApiFlavor::OpenAi
    }

    fn supports_images(&self, model: &str) -> bool {
        if !self.config.supports_images {
            return false;
        }
        if self.is_openai() {
            return models::find_model(OPENAI_MODELS, model).map_or(true, |m| m.supports_images);
        }
        true
    }

    fn max_tokens(&self, options: &ChatOptions) -> Option<u32> {
        options.max_tokens.or_else(|| {
            self.is_openai()
                .then(|| models::max_output_for(OPENAI_MODELS, &options.model))
        })
    }

    fn api_key(&self) -> Result<SecretString, ProviderError> {
        self.api_key
            .read()
            .clone()
            .ok_or_else(|| ProviderError::NotInitialized(self.config.name.clone()))
    }

    async fn request(
        &self,
        messages: &[Message],
        rounds: &[ToolRound],
        options: &ChatOptions,
    ) -> Result<ChatResult, ProviderError> {
        let key = self.api_key()?;
        let tools = if self.config.supports_tools {
            options.tools.as_slice()
        } else {
            &[]
        };
        let mut body = converter::build_request_body(
            messages,
            rounds,
            &options.model,
            &options.system_prompt,
            tools,
            self.max_tokens(options),
            self.supports_images(&options.model),
        );
        if self.is_openai() {
            body["stream_options"] = json!({ "include_usage": true });
        }
        debug!(
            provider = %self.config.name,
            model = %options.model,
            rounds = rounds.len(),
            tools = tools.len(),
            "sending chat completions request"
        );

        let (key, body) = (&key, &body);
        with_overload_retry(&self.config.name, &self.retry, &options.cancel, move |_| {
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
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(key.expose_secret())
            .header("accept", "text/event-stream")
            .json(body);

        let Some(resp) = send_request(req, &options.cancel).await? else {
            return Ok(ChatResult::cancelled());
        };
        drive_stream(
            resp.bytes_stream(),
            OpenAiStream::new(self.config.name.clone()),
            options,
            self.idle_timeout,
        )
        .await
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiProvider {
    fn name(&self) -> &str {
        &self.config.name
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

    #[instrument(skip_all, fields(provider = %self.config.name, model = %options.model))]
    async fn send_message(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChatResult, ProviderError> {
        self.request(messages, &[], options).await
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        if self.is_openai() {
            OPENAI_MODELS.iter().map(|m| m.to_info()).collect()
        } else {
            self.config.models.clone()
        }
    }

    fn tool_replay(&self) -> Option<&dyn ToolReplay> {
        if self.config.supports_tools {
            Some(self)
        } else {
            None
        }
    }

    fn title_model(&self) -> Option<String> {
        if self.is_openai() {
            Some("gpt-4o-mini".into())
        } else {
            self.config.models.first().map(|m| m.id.clone())
        }
    }
}

#[async_trait]
impl ToolReplay for OpenAiProvider {
    #[instrument(skip_all, fields(provider = %self.config.name, model = %options.model, rounds = rounds.len()))]
    async fn send_message_with_tool_results(
        &self,
        messages: &[Message],
        rounds: &[ToolRound],
        options: &ChatOptions,
    ) -> Result<ChatResult, ProviderError> {
        self.request(messages, rounds, options).await
    }
}
