//! Runtime configuration
//!
//! Everything has a default; a JSON file may override any subset:
//!
//! ```text
//! {
//!   "planner":  {"searchRounds": 12, "model": {"restore": {"restorePerThread": 0.05}}},
//!   "executor": {"spacing": {"betweenBatchesMs": 4, "betweenJobsMs": 1}, "launchBufferMs": 10}
//! }
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use volley_core::application::{ExecutorConfig, PlannerConfig};

/// Default world file location (tilde expanded)
pub const DEFAULT_WORLD_PATH: &str = "~/.volley/world.json";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VolleyConfig {
    pub planner: PlannerConfig,
    pub executor: ExecutorConfig,
}

impl VolleyConfig {
    /// Load from `path`, or defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Expand `~` in a user-supplied path
pub fn expand_path(raw: &str) -> String {
    shellexpand::tilde(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = VolleyConfig::load(None).unwrap();
        assert_eq!(config.planner.search_rounds, PlannerConfig::default().search_rounds);
        assert_eq!(
            config.executor.completion_grace_ms,
            ExecutorConfig::default().completion_grace_ms
        );
    }

    #[test]
    fn test_partial_override() {
        let config = VolleyConfig::parse(
            r#"{"executor": {"launchBufferMs": 25}, "planner": {"model": {"restore": {"restorePerThread": 0.1}}}}"#,
        )
        .unwrap();
        assert_eq!(config.planner.model.restore.restore_per_thread, 0.1);
        assert_eq!(config.executor.launch_buffer_ms, 25.0);
        assert_eq!(config.executor.spacing, ExecutorConfig::default().spacing);
        assert_eq!(config.planner.search_rounds, PlannerConfig::default().search_rounds);
    }

    #[test]
    fn test_malformed_config_is_error() {
        assert!(VolleyConfig::parse("{planner:").is_err());
        assert!(VolleyConfig::load(Some(Path::new("/nonexistent/volley.json"))).is_err());
    }

    #[test]
    fn test_expand_path() {
        assert_eq!(expand_path("/tmp/world.json"), "/tmp/world.json");
    }
}
