//! Session persistence: one pretty-printed JSON file per conversation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tern_agent::ConversationState;
use thiserror::Error;

/// Errors from the session store
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Invalid session id: {0}")]
    InvalidId(String),

    #[error("Session I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt session file: {0}")]
    Json(#[from] serde_json::Error),
}

/// A stored conversation and where it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub working_dir: String,
    pub state: ConversationState,
}

impl Session {
    /// Start a new session with a fresh id
    pub fn new(provider: &str, model: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            provider: provider.to_string(),
            model: model.to_string(),
            working_dir: std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| ".".to_string()),
            state: ConversationState::default(),
        }
    }

    /// First characters of the id, for display
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

/// Information about a saved session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub id: String,
    pub updated_at: DateTime<Utc>,
    pub model: String,
    pub working_dir: String,
    pub message_count: usize,
}

impl SessionInfo {
    /// Format the timestamp for display
    pub fn updated_at_display(&self) -> String {
        self.updated_at.format("%Y-%m-%d %H:%M").to_string()
    }
}

/// Directory of `<id>.json` session files
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Get the default sessions directory
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tern")
            .join("sessions")
    }

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File for a session id. Only UUIDs are accepted, so an id can never
    /// name a path outside the store.
    fn path_for(&self, id: &str) -> Result<PathBuf, SessionError> {
        let uuid =
            uuid::Uuid::parse_str(id).map_err(|_| SessionError::InvalidId(id.to_string()))?;
        Ok(self.dir.join(format!("{}.json", uuid.hyphenated())))
    }

    /// Write a session, replacing any earlier save of the same id
    pub fn save(&self, session: &mut Session) -> Result<PathBuf, SessionError> {
        let path = self.path_for(&session.id)?;
        fs::create_dir_all(&self.dir)?;
        session.updated_at = Utc::now();

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(session)?)?;
        fs::rename(&tmp, &path)?;

        tracing::debug!("Saved session {} to {}", session.id, path.display());
        Ok(path)
    }

    /// Load a session by id
    pub fn load(&self, id: &str) -> Result<Session, SessionError> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Err(SessionError::NotFound(id.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// List all sessions, newest first. Unreadable files are skipped.
    pub fn list(&self) -> Result<Vec<SessionInfo>, SessionError> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }

        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match Self::read_info(&path) {
                Ok(info) => sessions.push(info),
                Err(e) => tracing::warn!("Skipping session file {}: {}", path.display(), e),
            }
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    fn read_info(path: &Path) -> Result<SessionInfo, SessionError> {
        let session: Session = serde_json::from_str(&fs::read_to_string(path)?)?;
        Ok(SessionInfo {
            id: session.id,
            updated_at: session.updated_at,
            model: session.model,
            working_dir: session.working_dir,
            message_count: session.state.messages.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_ai::Message;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions"));

        let mut session = Session::new("anthropic", "claude-test");
        session.state.system_prompt = Some("be brief".into());
        session.state.messages.push(Message::user("hi"));
        session.state.messages.push(Message::assistant("hello"));
        session.state.input_tokens = 12;
        session.state.turn_count = 1;

        let path = store.save(&mut session).unwrap();
        assert!(path.ends_with(format!("{}.json", session.id)));

        let loaded = store.load(&session.id).unwrap();
        assert_eq!(loaded, session);
    }

    #[test]
    fn test_load_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let id = uuid::Uuid::new_v4().to_string();
        assert!(matches!(
            store.load(&id),
            Err(SessionError::NotFound(missing)) if missing == id
        ));
    }

    #[test]
    fn test_load_rejects_non_uuid_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions"));

        // A readable session file just outside the store
        let mut outside = Session::new("anthropic", "m");
        fs::write(
            dir.path().join("outside.json"),
            serde_json::to_string(&outside).unwrap(),
        )
        .unwrap();

        for id in ["../outside", "/tmp/x", "does-not-exist", ""] {
            assert!(
                matches!(store.load(id), Err(SessionError::InvalidId(bad)) if bad == id),
                "accepted {:?}",
                id
            );
        }

        outside.id = "../outside".into();
        assert!(matches!(
            store.save(&mut outside),
            Err(SessionError::InvalidId(_))
        ));
    }

    #[test]
    fn test_list_newest_first_and_skips_junk() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        assert!(store.list().unwrap().is_empty());

        let mut older = Session::new("openai", "gpt-test");
        store.save(&mut older).unwrap();

        let mut newer = Session::new("anthropic", "claude-test");
        newer.state.messages.push(Message::user("one"));
        store.save(&mut newer).unwrap();
        // Force ordering independent of clock resolution
        newer.updated_at = older.updated_at + chrono::Duration::seconds(5);
        fs::write(
            store.dir().join(format!("{}.json", newer.id)),
            serde_json::to_string(&newer).unwrap(),
        )
        .unwrap();

        fs::write(dir.path().join("broken.json"), "{").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let sessions = store.list().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, newer.id);
        assert_eq!(sessions[0].message_count, 1);
        assert_eq!(sessions[1].id, older.id);
    }

    #[test]
    fn test_short_id() {
        let session = Session::new("anthropic", "m");
        assert_eq!(session.short_id().len(), 8);
        assert!(session.id.starts_with(session.short_id()));
    }
}
