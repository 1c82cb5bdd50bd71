//! Permission gating for mutating tools.
//!
//! Approvals are granted per directory for the lifetime of the session and
//! cover everything beneath the approved directory. Classification is by
//! tool name: file writes, shell commands, and commits each check their own
//! config switch.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::config::PermissionMode;

/// Shell commands that never require confirmation, matched on the first
/// whitespace-separated word.
pub const SAFE_COMMANDS: &[&str] = &[
    "ls", "cat", "head", "tail", "grep", "find", "pwd", "echo", "which", "type", "file", "wc",
    "du", "df", "date", "whoami", "uname", "env", "printenv", "test", "[",
];

/// Session-lifetime directory approvals plus the confirmation switches.
#[derive(Debug)]
pub struct PermissionGate {
    approved_dirs: Vec<PathBuf>,
    confirm_writes: bool,
    confirm_commands: bool,
}

impl PermissionGate {
    pub fn new(confirm_writes: bool, confirm_commands: bool) -> Self {
        Self {
            approved_dirs: Vec::new(),
            confirm_writes,
            confirm_commands,
        }
    }

    /// Decides whether a tool call needs user confirmation before running.
    pub fn requires_confirmation(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
        mode: PermissionMode,
    ) -> bool {
        if mode == PermissionMode::AutoAccept {
            return false;
        }

        match tool_name {
            "write_file" | "edit_file" => {
                self.confirm_writes && !self.is_approved(&self.resolve_target_dir(tool_name, arguments))
            }
            "bash" => {
                if !self.confirm_commands {
                    return false;
                }
                let command = arguments
                    .get("command")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                if is_safe_command(command) {
                    return false;
                }
                !self.is_approved(&self.resolve_target_dir(tool_name, arguments))
            }
            "git_commit" => {
                self.confirm_writes && !self.is_approved(&self.resolve_target_dir(tool_name, arguments))
            }
            _ => false,
        }
    }

    /// Derives the directory a tool call will touch. Never fails; anything
    /// unresolvable degrades to the current working directory.
    pub fn resolve_target_dir(&self, tool_name: &str, arguments: &Map<String, Value>) -> PathBuf {
        let raw = match tool_name {
            "write_file" | "edit_file" => arguments
                .get("path")
                .and_then(Value::as_str)
                .and_then(|p| Path::new(p).parent())
                .map(Path::to_path_buf),
            "bash" => arguments
                .get("working_dir")
                .or_else(|| arguments.get("cwd"))
                .and_then(Value::as_str)
                .map(PathBuf::from),
            "git_commit" => arguments
                .get("repo_path")
                .and_then(Value::as_str)
                .map(PathBuf::from),
            _ => None,
        };

        // A bare relative filename has `Some("")` as its parent; treat any
        // empty path as unresolvable.
        let dir = raw
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(fallback_cwd);
        dir.canonicalize().unwrap_or(dir)
    }

    /// Records a session-lifetime approval for a directory and everything
    /// beneath it.
    pub fn approve_directory(&mut self, dir: &Path) {
        if dir.as_os_str().is_empty() {
            return;
        }
        let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        if !self.approved_dirs.contains(&dir) {
            self.approved_dirs.push(dir);
        }
    }

    /// True when the directory is inside any previously approved directory.
    /// An empty path never approves anything; `starts_with` would otherwise
    /// make it match every directory.
    pub fn is_approved(&self, dir: &Path) -> bool {
        self.approved_dirs
            .iter()
            .any(|approved| !approved.as_os_str().is_empty() && dir.starts_with(approved))
    }
}

fn is_safe_command(command: &str) -> bool {
    command
        .split_whitespace()
        .next()
        .is_some_and(|word| SAFE_COMMANDS.contains(&word))
}

fn fallback_cwd() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
