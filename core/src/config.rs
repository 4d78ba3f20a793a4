//! Engine options.
//!
//! Options come from three layers: built-in defaults, an optional TOML
//! document, and process environment overrides. The process-wide snapshot is
//! computed once on first use.

use std::path::PathBuf;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub const SHARED_GET_THRESHOLD_ENV: &str = "SCOPELINK_SHARED_GET_THRESHOLD";
pub const SHARED_CALL_THRESHOLD_ENV: &str = "SCOPELINK_SHARED_CALL_THRESHOLD";
pub const DUMP_DIR_ENV: &str = "SCOPELINK_DUMP_DIR";

/// Gets are far more common than calls, so sharing them only pays off much later.
pub const DEFAULT_SHARED_GET_THRESHOLD: u32 = 100;
pub const DEFAULT_SHARED_CALL_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineOptions {
    /// Number of identical scope-get sites that must be exceeded before a shared unit is used.
    pub shared_get_threshold: u32,
    /// Number of identical scope-call sites that must be exceeded before a shared unit is used.
    pub shared_call_threshold: u32,
    /// Directory receiving adapter class dumps, if any.
    pub dump_dir: Option<PathBuf>,
    /// Whether the compiler emits speculatively typed scope accesses.
    pub optimistic_types: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            shared_get_threshold: DEFAULT_SHARED_GET_THRESHOLD,
            shared_call_threshold: DEFAULT_SHARED_CALL_THRESHOLD,
            dump_dir: None,
            optimistic_types: true,
        }
    }
}

static PROCESS_OPTIONS: Lazy<EngineOptions> = Lazy::new(EngineOptions::from_env);

impl EngineOptions {
    /// Process-wide options: defaults overlaid with environment overrides.
    pub fn global() -> &'static EngineOptions {
        &PROCESS_OPTIONS
    }

    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_toml_str(src: &str) -> Result<Self> {
        toml::from_str(src).context("parse engine options")
    }

    pub fn from_toml_file(path: &std::path::Path) -> Result<Self> {
        let src = std::fs::read_to_string(path).with_context(|| format!("read options file {}", path.display()))?;
        Self::from_toml_str(&src)
    }

    /// Apply overrides from `lookup`. Unparseable numbers keep the current value.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(SHARED_GET_THRESHOLD_ENV) {
            self.shared_get_threshold = parse_threshold(SHARED_GET_THRESHOLD_ENV, &raw, self.shared_get_threshold);
        }
        if let Some(raw) = lookup(SHARED_CALL_THRESHOLD_ENV) {
            self.shared_call_threshold = parse_threshold(SHARED_CALL_THRESHOLD_ENV, &raw, self.shared_call_threshold);
        }
        if let Some(raw) = lookup(DUMP_DIR_ENV) {
            let trimmed = raw.trim();
            self.dump_dir = if trimmed.is_empty() { None } else { Some(PathBuf::from(trimmed)) };
        }
        self
    }
}

fn parse_threshold(key: &str, raw: &str, fallback: u32) -> u32 {
    match raw.trim().parse::<u32>() {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!("ignoring {}={:?}: {}; keeping {}", key, raw, err, fallback);
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_prefer_calls() {
        let opts = EngineOptions::default();
        assert_eq!(opts.shared_call_threshold, 5);
        assert_eq!(opts.shared_get_threshold, 100);
        assert!(opts.shared_get_threshold > opts.shared_call_threshold);
        assert!(opts.dump_dir.is_none());
    }

    #[test]
    fn test_toml_partial_document() {
        let opts = EngineOptions::from_toml_str("shared-get-threshold = 7\ndump-dir = \"/tmp/dumps\"\n").unwrap();
        assert_eq!(opts.shared_get_threshold, 7);
        assert_eq!(opts.shared_call_threshold, DEFAULT_SHARED_CALL_THRESHOLD);
        assert_eq!(opts.dump_dir, Some(PathBuf::from("/tmp/dumps")));
        assert!(opts.optimistic_types);
    }

    #[test]
    fn test_toml_disables_optimism() {
        let opts = EngineOptions::from_toml_str("optimistic-types = false").unwrap();
        assert!(!opts.optimistic_types);
    }

    #[test]
    fn test_toml_rejects_wrong_type() {
        assert!(EngineOptions::from_toml_str("shared-call-threshold = \"many\"").is_err());
    }

    #[test]
    fn test_env_overrides_and_bad_values() {
        let env: HashMap<&str, &str> = [
            (SHARED_GET_THRESHOLD_ENV, "5"),
            (SHARED_CALL_THRESHOLD_ENV, "lots"),
            (DUMP_DIR_ENV, "  "),
        ]
        .into_iter()
        .collect();
        let opts = EngineOptions::default().with_env_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(opts.shared_get_threshold, 5);
        assert_eq!(opts.shared_call_threshold, DEFAULT_SHARED_CALL_THRESHOLD);
        assert!(opts.dump_dir.is_none());
    }
}
