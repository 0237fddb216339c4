use std::fmt;

use parley_core::{ModelInfo, ProviderError};

/// Output cap for model ids missing from a catalog.
pub const DEFAULT_MAX_OUTPUT: u32 = 4_096;

/// A `provider/model-id` string split at the first `/`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

impl ModelRef {
    pub fn parse(s: &str) -> Result<Self, ProviderError> {
        match s.split_once('/') {
            Some((provider, model)) if !provider.trim().is_empty() && !model.trim().is_empty() => {
                Ok(Self {
                    provider: provider.trim().to_string(),
                    model: model.trim().to_string(),
                })
            }
            _ => Err(ProviderError::InvalidModelString(s.to_string())),
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Static catalog row.
#[derive(Clone, Debug)]
pub struct CatalogEntry {
    pub id: &'static str,
    pub display_name: &'static str,
    pub context_window: u32,
    pub max_output: u32,
    pub supports_tools: bool,
    pub supports_images: bool,
}

impl CatalogEntry {
    pub fn to_info(&self) -> ModelInfo {
        ModelInfo {
            id: self.id.to_string(),
            display_name: self.display_name.to_string(),
            context_window: self.context_window,
            max_output_tokens: self.max_output,
            supports_tools: self.supports_tools,
            supports_images: self.supports_images,
        }
    }
}

pub static ANTHROPIC_MODELS: &[CatalogEntry] = &[
    CatalogEntry {
        id: "claude-sonnet-4-5",
        display_name: "Claude Sonnet 4.5",
        context_window: 200_000,
        max_output: 64_000,
        supports_tools: true,
        supports_images: true,
    },
    CatalogEntry {
        id: "claude-opus-4-1",
        display_name: "Claude Opus 4.1",
        context_window: 200_000,
        max_output: 32_000,
        supports_tools: true,
        supports_images: true,
    },
    CatalogEntry {
        id: "claude-haiku-4-5",
        display_name: "Claude Haiku 4.5",
        context_window: 200_000,
        max_output: 64_000,
        supports_tools: true,
        supports_images: true,
    },
];

pub static OPENAI_MODELS: &[CatalogEntry] = &[
    CatalogEntry {
        id: "gpt-4o",
        display_name: "GPT-4o",
        context_window: 128_000,
        max_output: 16_384,
        supports_tools: true,
        supports_images: true,
    },
    CatalogEntry {
        id: "gpt-4o-mini",
        display_name: "GPT-4o mini",
        context_window: 128_000,
        max_output: 16_384,
        supports_tools: true,
        supports_images: true,
    },
    CatalogEntry {
        id: "gpt-4.1",
        display_name: "GPT-4.1",
        context_window: 1_047_576,
        max_output: 32_768,
        supports_tools: true,
        supports_images: true,
    },
];

pub fn find_model<'a>(catalog: &'a [CatalogEntry], id: &str) -> Option<&'a CatalogEntry> {
    catalog.iter().find(|m| m.id == id)
}

/// Output cap for `id`: the catalog value, or [`DEFAULT_MAX_OUTPUT`] for unknown ids.
pub fn max_output_for(catalog: &[CatalogEntry], id: &str) -> u32 {
    find_model(catalog, id).map_or(DEFAULT_MAX_OUTPUT, |m| m.max_output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_at_first_slash() {
        let r = ModelRef::parse("openrouter/meta-llama/llama-3.1-70b").unwrap();
        assert_eq!(r.provider, "openrouter");
        assert_eq!(r.model, "meta-llama/llama-3.1-70b");
        assert_eq!(r.to_string(), "openrouter/meta-llama/llama-3.1-70b");
    }

    #[test]
    fn parse_rejects_malformed() {
        for bad in ["claude-sonnet-4-5", "/gpt-4o", "openai/", "", "  /  "] {
            assert!(
                matches!(ModelRef::parse(bad), Err(ProviderError::InvalidModelString(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn catalog_lookup() {
        assert!(find_model(ANTHROPIC_MODELS, "claude-sonnet-4-5").is_some());
        assert!(find_model(OPENAI_MODELS, "claude-sonnet-4-5").is_none());
        assert_eq!(max_output_for(OPENAI_MODELS, "gpt-4o"), 16_384);
        assert_eq!(max_output_for(OPENAI_MODELS, "gpt-9"), DEFAULT_MAX_OUTPUT);
    }

    #[test]
    fn found_entry_outlives_lookup_key() {
        let entry = {
            let id = String::from("gpt-4o");
            find_model(OPENAI_MODELS, &id)
        };
        assert_eq!(entry.map(|m| m.id), Some("gpt-4o"));
    }

    #[test]
    fn entry_converts_to_info() {
        let info = ANTHROPIC_MODELS[0].to_info();
        assert_eq!(info.id, "claude-sonnet-4-5");
        assert!(info.supports_tools);
        assert_eq!(info.context_window, 200_000);
    }
}
