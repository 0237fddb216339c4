//! Provider endpoint settings.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersSettings {
    pub anthropic: VendorSettings,
    pub openai: VendorSettings,
    /// Vendors speaking the OpenAI chat-completions dialect (OpenRouter, Groq, local servers).
    pub compatible: Vec<CompatibleVendorSettings>,
}

impl Default for ProvidersSettings {
    fn default() -> Self {
        Self {
            anthropic: VendorSettings {
                enabled: true,
                api_key_env: "ANTHROPIC_API_KEY".into(),
                base_url: "https://api.anthropic.com".into(),
                default_model: "claude-sonnet-4-5".into(),
            },
            openai: VendorSettings {
                enabled: true,
                api_key_env: "OPENAI_API_KEY".into(),
                base_url: "https://api.openai.com/v1".into(),
                default_model: "gpt-4o".into(),
            },
            compatible: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VendorSettings {
    pub enabled: bool,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub base_url: String,
    pub default_model: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompatibleVendorSettings {
    /// Provider prefix used in model strings (`name/model-id`).
    pub name: String,
    pub base_url: String,
    pub api_key_env: String,
    pub supports_tools: bool,
    pub supports_images: bool,
    pub models: Vec<String>,
}

impl Default for CompatibleVendorSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_url: String::new(),
            api_key_env: String::new(),
            supports_tools: true,
            supports_images: false,
            models: Vec::new(),
        }
    }
}
