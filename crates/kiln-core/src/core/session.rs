//! Session persistence for saving and resuming conversations.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::providers::{Message, Role};

/// Metadata about a saved session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub id: String,
    pub model: String,
    pub created_at: String,
    pub updated_at: String,
    pub message_count: usize,
    pub title: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    id: String,
    model: String,
    created_at: String,
    updated_at: String,
    title: String,
    messages: Vec<Message>,
}

/// File-backed conversation store. One JSON file per session.
#[derive(Debug)]
pub struct SessionStore {
    session_dir: PathBuf,
    current_session_id: Option<String>,
}

impl SessionStore {
    pub fn new(session_dir: impl Into<PathBuf>) -> Result<Self> {
        let session_dir = session_dir.into();
        fs::create_dir_all(&session_dir).with_context(|| {
            format!("failed to create session dir {}", session_dir.display())
        })?;
        Ok(Self {
            session_dir,
            current_session_id: None,
        })
    }

    pub fn current_session_id(&self) -> Option<&str> {
        self.current_session_id.as_deref()
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.session_dir.join(format!("{session_id}.json"))
    }

    /// Saves a conversation, creating a new session when no id is given.
    /// Returns the session id.
    pub fn save(
        &mut self,
        messages: &[Message],
        model: &str,
        session_id: Option<&str>,
    ) -> Result<String> {
        let session_id = session_id.map_or_else(
            || Local::now().format("%Y%m%d_%H%M%S").to_string(),
            str::to_string,
        );
        let path = self.session_path(&session_id);

        let title = messages
            .iter()
            .find(|m| m.role == Role::User)
            .map_or_else(
                || "New conversation".to_string(),
                |m| truncate_title(&m.content),
            );

        let now = Local::now().to_rfc3339();
        // Keep the original creation timestamp when overwriting.
        let created_at = read_session_file(&path)
            .map_or_else(|| now.clone(), |existing| existing.created_at);

        let data = SessionFile {
            id: session_id.clone(),
            model: model.to_string(),
            created_at,
            updated_at: now,
            title,
            messages: messages.to_vec(),
        };

        let json = serde_json::to_string_pretty(&data)?;
        fs::write(&path, json)
            .with_context(|| format!("failed to write session {}", path.display()))?;

        self.current_session_id = Some(session_id.clone());
        Ok(session_id)
    }

    /// Loads a session. None when the session does not exist or is
    /// unreadable.
    pub fn load(&mut self, session_id: &str) -> Option<(Vec<Message>, String)> {
        let data = read_session_file(&self.session_path(session_id))?;
        self.current_session_id = Some(session_id.to_string());
        Some((data.messages, data.model))
    }

    /// Lists recent sessions, newest first. Unreadable files are skipped.
    pub fn list(&self, limit: usize) -> Vec<SessionMetadata> {
        let Ok(entries) = fs::read_dir(&self.session_dir) else {
            return Vec::new();
        };

        let mut sessions: Vec<SessionMetadata> = entries
            .flatten()
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .filter_map(|e| read_session_file(&e.path()))
            .map(|data| SessionMetadata {
                id: data.id,
                model: data.model,
                created_at: data.created_at,
                updated_at: data.updated_at,
                message_count: data.messages.len(),
                title: data.title,
            })
            .collect();

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(limit);
        sessions
    }

    /// Deletes a session. False when it did not exist.
    pub fn delete(&self, session_id: &str) -> bool {
        fs::remove_file(self.session_path(session_id)).is_ok()
    }

    /// The most recently updated session id, if any.
    pub fn last_session_id(&self) -> Option<String> {
        self.list(1).into_iter().next().map(|s| s.id)
    }
}

fn read_session_file(path: &Path) -> Option<SessionFile> {
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

fn truncate_title(content: &str) -> String {
    let mut title: String = content.chars().take(50).collect();
    if content.chars().count() > 50 {
        title.push_str("...");
    }
    title
}
