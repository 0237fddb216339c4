//! Settings types. JSON field names are camelCase.

mod providers;
mod runtime;

pub use providers::{CompatibleVendorSettings, ProvidersSettings, VendorSettings};
pub use runtime::{
    ContextSettings, CouncilSettings, ExecutorSettings, LoggingSettings, RetrySettings,
    SchedulerSettings,
};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParleySettings {
    pub providers: ProvidersSettings,
    pub context: ContextSettings,
    pub executor: ExecutorSettings,
    pub scheduler: SchedulerSettings,
    pub retry: RetrySettings,
    pub council: CouncilSettings,
    pub logging: LoggingSettings,
}

impl ParleySettings {
    /// Reject values that deserialize fine but would stall the runtime.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.tick_secs == 0 {
            return Err(SettingsError::InvalidValue("scheduler.tickSecs must be > 0".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(SettingsError::InvalidValue("retry.maxAttempts must be > 0".into()));
        }
        if self.context.response_reserve >= self.context.total_tokens {
            return Err(SettingsError::InvalidValue(
                "context.responseReserve must be smaller than context.totalTokens".into(),
            ));
        }
        if let Some(v) = self.providers.compatible.iter().find(|v| v.name.is_empty()) {
            return Err(SettingsError::InvalidValue(format!(
                "compatible provider at {} has no name",
                v.base_url
            )));
        }
        Ok(())
    }
}
