//! Configuration management for kiln.
//!
//! Loads configuration from a TOML file with sensible defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Permission mode for tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Ask before each write/shell/commit operation.
    #[default]
    Normal,
    /// Accept all operations without asking.
    AutoAccept,
    /// Read-only exploration until a plan is approved.
    PlanMode,
}

impl PermissionMode {
    /// Advances to the next mode in the fixed cycle.
    pub fn cycle(self) -> Self {
        match self {
            PermissionMode::Normal => PermissionMode::AutoAccept,
            PermissionMode::AutoAccept => PermissionMode::PlanMode,
            PermissionMode::PlanMode => PermissionMode::Normal,
        }
    }

    /// Returns the short display name for status lines.
    pub fn display_name(self) -> &'static str {
        match self {
            PermissionMode::Normal => "normal",
            PermissionMode::AutoAccept => "auto",
            PermissionMode::PlanMode => "plan",
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model identifier passed to the provider.
    pub model: String,

    /// Maximum context window size in tokens.
    pub max_context_tokens: usize,

    /// Tokens held back for response generation.
    pub reserve_tokens: usize,

    /// Fraction of the context window at which history is compacted.
    pub compact_threshold: f64,

    /// Number of recent exchange pairs kept verbatim during compaction.
    pub keep_recent: usize,

    /// Maximum model/tool iterations within a single user turn.
    pub max_iterations: usize,

    /// Timeout for tool execution in seconds (0 disables).
    pub tool_timeout_secs: u32,

    /// Require confirmation for file writes and commits.
    pub confirm_writes: bool,

    /// Require confirmation for shell commands.
    pub confirm_commands: bool,

    /// Sampling temperature forwarded to the provider.
    pub temperature: f64,
}

impl Config {
    const DEFAULT_MODEL: &str = "qwen2.5-coder:32b";
    const DEFAULT_MAX_CONTEXT_TOKENS: usize = 32_768;
    const DEFAULT_RESERVE_TOKENS: usize = 4096;
    const DEFAULT_COMPACT_THRESHOLD: f64 = 0.75;
    const DEFAULT_KEEP_RECENT: usize = 4;
    const DEFAULT_MAX_ITERATIONS: usize = 10;
    const DEFAULT_TOOL_TIMEOUT_SECS: u32 = 120;
    const DEFAULT_TEMPERATURE: f64 = 0.3;

    /// Loads configuration from a specific path.
    /// Returns defaults if the file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        if self.tool_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(u64::from(self.tool_timeout_secs)))
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: Self::DEFAULT_MODEL.to_string(),
            max_context_tokens: Self::DEFAULT_MAX_CONTEXT_TOKENS,
            reserve_tokens: Self::DEFAULT_RESERVE_TOKENS,
            compact_threshold: Self::DEFAULT_COMPACT_THRESHOLD,
            keep_recent: Self::DEFAULT_KEEP_RECENT,
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
            tool_timeout_secs: Self::DEFAULT_TOOL_TIMEOUT_SECS,
            confirm_writes: true,
            confirm_commands: true,
            temperature: Self::DEFAULT_TEMPERATURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_context_tokens, 32_768);
        assert!((config.compact_threshold - 0.75).abs() < f64::EPSILON);
        assert_eq!(config.keep_recent, 4);
        assert_eq!(config.max_iterations, 10);
        assert!(config.confirm_writes);
        assert!(config.confirm_commands);
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.model, Config::DEFAULT_MODEL);
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "model = \"llama3\"\nmax_iterations = 5\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.model, "llama3");
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.keep_recent, 4);
    }

    #[test]
    fn test_tool_timeout_zero_disables() {
        let config = Config {
            tool_timeout_secs: 0,
            ..Config::default()
        };
        assert!(config.tool_timeout().is_none());

        let config = Config {
            tool_timeout_secs: 30,
            ..Config::default()
        };
        assert_eq!(config.tool_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_permission_mode_cycle() {
        let mode = PermissionMode::Normal;
        let mode = mode.cycle();
        assert_eq!(mode, PermissionMode::AutoAccept);
        let mode = mode.cycle();
        assert_eq!(mode, PermissionMode::PlanMode);
        let mode = mode.cycle();
        assert_eq!(mode, PermissionMode::Normal);
    }
}
