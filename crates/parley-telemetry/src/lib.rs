//! Tracing subscriber setup for parley hosts.

use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG when set.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "parley_llm" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build from the textual settings form. An unparseable level falls back to INFO.
    pub fn from_settings(level: &str, json: bool) -> Self {
        Self {
            log_level: parse_level(level).unwrap_or(Level::INFO),
            json,
            ..Self::default()
        }
    }

    pub fn with_module_level(mut self, module: impl Into<String>, level: Level) -> Self {
        self.module_levels.push((module.into(), level));
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("a global subscriber is already installed")]
    AlreadyInitialized,
    #[error("filter reload failed: {0}")]
    Reload(String),
}

/// Handle to the installed subscriber; allows adjusting module levels at runtime.
pub struct TelemetryGuard {
    base_level: Level,
    module_levels: Arc<RwLock<Vec<(String, Level)>>>,
    handle: reload::Handle<EnvFilter, Registry>,
}

impl TelemetryGuard {
    /// Change the log level for a specific module at runtime.
    pub fn set_module_level(&self, module: &str, level: Level) -> Result<(), TelemetryError> {
        let directive = {
            let mut levels = self.module_levels.write();
            if let Some(entry) = levels.iter_mut().find(|(m, _)| m == module) {
                entry.1 = level;
            } else {
                levels.push((module.to_string(), level));
            }
            filter_directive(self.base_level, &levels)
        };
        self.handle
            .reload(EnvFilter::new(directive))
            .map_err(|e| TelemetryError::Reload(e.to_string()))
    }

    pub fn module_levels(&self) -> Vec<(String, Level)> {
        self.module_levels.read().clone()
    }
}

/// Install the global subscriber. Call once at startup; a second call reports
/// [`TelemetryError::AlreadyInitialized`] and leaves the first subscriber in place.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let directive = filter_directive(config.log_level, &config.module_levels);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));
    let (filter_layer, handle) = reload::Layer::new(env_filter);

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
    });
    let text_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|_| TelemetryError::AlreadyInitialized)?;

    Ok(TelemetryGuard {
        base_level: config.log_level,
        module_levels: Arc::new(RwLock::new(config.module_levels)),
        handle,
    })
}

/// `EnvFilter` directive for a base level plus module overrides.
pub fn filter_directive(level: Level, module_levels: &[(String, Level)]) -> String {
    let mut directive = level.to_string().to_lowercase();
    for (module, level) in module_levels {
        directive.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    directive
}

pub fn parse_level(s: &str) -> Option<Level> {
    Level::from_str(s.trim()).ok()
}
