//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ParleySettings::default()`]
//! 2. If `~/.parley/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `PARLEY_*` environment overrides (highest priority)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::ParleySettings;

/// `~/.parley/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".parley").join("settings.json")
}

pub fn load_settings() -> Result<ParleySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; malformed JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ParleySettings> {
    let defaults = serde_json::to_value(ParleySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ParleySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, arrays and primitives are replaced by `source`,
/// and nulls in `source` leave the target untouched.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

pub fn apply_env_overrides(settings: &mut ParleySettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`. Empty or unparseable values are ignored.
pub fn apply_overrides_from(settings: &mut ParleySettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("PARLEY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("PARLEY_LOG_JSON") {
        settings.logging.json = v;
    }

    // ── Context & executor ──────────────────────────────────────────
    if let Some(v) = env.usize("PARLEY_TOTAL_TOKENS", 1_000, 10_000_000) {
        settings.context.total_tokens = v;
    }
    if let Some(v) = env.usize("PARLEY_RESPONSE_RESERVE", 0, 1_000_000) {
        settings.context.response_reserve = v;
    }
    if let Some(v) = env.u64("PARLEY_MAX_ITERATIONS", 1, 100) {
        settings.executor.max_iterations = v as u32;
    }
    if let Some(v) = env.u64("PARLEY_TRIGGER_MAX_ITERATIONS", 1, 100) {
        settings.executor.trigger_max_iterations = v as u32;
    }

    // ── Scheduler & retry ───────────────────────────────────────────
    if let Some(v) = env.u64("PARLEY_TICK_SECS", 1, 86_400) {
        settings.scheduler.tick_secs = v;
    }
    if let Some(v) = env.u64("PARLEY_RETRY_ATTEMPTS", 1, 10) {
        settings.retry.max_attempts = v as u32;
    }
    if let Some(v) = env.u64("PARLEY_RETRY_BASE_DELAY_MS", 0, 60_000) {
        settings.retry.base_delay_ms = v;
    }
    if let Some(v) = env.u64("PARLEY_RETRY_MAX_DELAY_MS", 0, 600_000) {
        settings.retry.max_delay_ms = v;
    }

    // ── Providers & council ─────────────────────────────────────────
    if let Some(v) = env.string("PARLEY_ANTHROPIC_BASE_URL") {
        settings.providers.anthropic.base_url = v;
    }
    if let Some(v) = env.string("PARLEY_OPENAI_BASE_URL") {
        settings.providers.openai.base_url = v;
    }
    if let Some(v) = env.string("PARLEY_CHAIRMAN_MODEL") {
        settings.council.chairman_model = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"scheduler": {"tickSecs": 60, "contextMessages": 8}});
        let source = serde_json::json!({"scheduler": {"tickSecs": 5}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["scheduler"]["tickSecs"], 5);
        assert_eq!(merged["scheduler"]["contextMessages"], 8);
    }

    #[test]
    fn merge_skips_nulls() {
        let target = serde_json::json!({"a": 1});
        let merged = deep_merge(target, serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_replaces_arrays() {
        let target = serde_json::json!({"members": ["a", "b", "c"]});
        let merged = deep_merge(target, serde_json::json!({"members": ["z"]}));
        assert_eq!(merged["members"], serde_json::json!(["z"]));
    }

    // ── file loading ────────────────────────────────────────────────

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_settings_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(s.context.total_tokens, 100_000);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
                "context": {"totalTokens": 16000},
                "providers": {"compatible": [{"name": "groq", "baseUrl": "https://api.groq.com/openai/v1", "models": ["llama-3.1-70b"]}]},
                "council": {"chairmanModel": "openai/gpt-4o"}
            }"#,
        )
        .unwrap();
        let s = load_settings_from_path(&path).unwrap();
        assert_eq!(s.context.total_tokens, 16_000);
        assert_eq!(s.context.response_reserve, 4_000);
        assert_eq!(s.providers.compatible.len(), 1);
        assert_eq!(s.providers.compatible[0].models, vec!["llama-3.1-70b"]);
        assert_eq!(s.council.chairman_model, "openai/gpt-4o");
        assert_eq!(s.providers.anthropic.api_key_env, "ANTHROPIC_API_KEY");
    }

    #[test]
    fn malformed_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_settings_from_path(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn invalid_values_in_file_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"scheduler": {"tickSecs": 0}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn overrides_apply() {
        let mut s = ParleySettings::default();
        apply_overrides_from(
            &mut s,
            lookup(&[
                ("PARLEY_LOG_LEVEL", "debug"),
                ("PARLEY_LOG_JSON", "yes"),
                ("PARLEY_TOTAL_TOKENS", "16000"),
                ("PARLEY_MAX_ITERATIONS", "4"),
                ("PARLEY_TICK_SECS", "15"),
                ("PARLEY_CHAIRMAN_MODEL", "openai/gpt-4o"),
            ]),
        );
        assert_eq!(s.logging.level, "debug");
        assert!(s.logging.json);
        assert_eq!(s.context.total_tokens, 16_000);
        assert_eq!(s.executor.max_iterations, 4);
        assert_eq!(s.scheduler.tick_secs, 15);
        assert_eq!(s.council.chairman_model, "openai/gpt-4o");
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut s = ParleySettings::default();
        apply_overrides_from(
            &mut s,
            lookup(&[
                ("PARLEY_TICK_SECS", "0"),
                ("PARLEY_MAX_ITERATIONS", "lots"),
                ("PARLEY_LOG_JSON", "maybe"),
                ("PARLEY_LOG_LEVEL", ""),
            ]),
        );
        assert_eq!(s.scheduler.tick_secs, 60);
        assert_eq!(s.executor.max_iterations, 10);
        assert!(!s.logging.json);
        assert_eq!(s.logging.level, "info");
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("2"), None);
        assert_eq!(parse_u64_range("10", 1, 100), Some(10));
        assert_eq!(parse_u64_range("101", 1, 100), None);
        assert_eq!(parse_usize_range("-1", 0, 5), None);
    }
}
