use parley_core::ProviderError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("context error: {0}")]
    Context(String),
}

impl EngineError {
    /// The provider error underneath, if any.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Provider(e) => Some(e),
            _ => None,
        }
    }
}
