//! Runner configuration.
//!
//! Loaded from an optional TOML file; missing keys take their defaults. The
//! `IMBLOCK_BASE_URL` environment variable overrides the file, and command
//! line flags override both.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

pub const BASE_URL_ENV: &str = "IMBLOCK_BASE_URL";

/// What happens to a run when a device action fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Bind an error value in the program and keep going.
    #[default]
    Continue,
    /// Halt the run with a failure banner.
    Abort,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Microscope server address, e.g. `http://127.0.0.1:8000`.
    pub base_url: String,
    /// Path prefix for property reads.
    pub property_prefix: String,
    /// Positioner addressed by single-axis moves.
    pub positioner_name: String,
    pub poll_interval_ms: u64,
    /// Polls before an unsettled action fails; `None` polls forever.
    pub max_polls: Option<u32>,
    /// Delay between continuations while running or waiting on an action.
    pub run_tick_ms: u64,
    /// Controls stay disabled this long after a run ends.
    pub cooldown_ms: u64,
    /// Interpreter units per continuation before yielding.
    pub slice_budget: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            property_prefix: "api/v2".to_string(),
            positioner_name: "ESP32Stage".to_string(),
            poll_interval_ms: 1000,
            max_polls: Some(600),
            run_tick_ms: 10,
            cooldown_ms: 2000,
            slice_budget: 10_000,
            failure_policy: FailurePolicy::Continue,
        }
    }
}

impl RunnerConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("invalid runner configuration")
    }

    /// Load from an optional file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))?
            }
            None => Self::default(),
        };
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            config.base_url = url;
        }
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn run_tick(&self) -> Duration {
        Duration::from_millis(self.run_tick_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = RunnerConfig::from_toml_str(
            "base_url = \"http://scope.local:5000\"\nfailure_policy = \"abort\"\n",
        )
        .unwrap();
        assert_eq!(config.base_url, "http://scope.local:5000");
        assert_eq!(config.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.max_polls, Some(600));
        assert_eq!(config.cooldown(), Duration::from_secs(2));
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        assert!(RunnerConfig::from_toml_str("failure_policy = \"retry\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.toml");
        std::fs::write(&path, "run_tick_ms = 50\nslice_budget = 100\n").unwrap();
        let config = RunnerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.run_tick(), Duration::from_millis(50));
        assert_eq!(config.slice_budget, 100);
    }
}
