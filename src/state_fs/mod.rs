//! Flat-file session persistence.
//!
//! Directory layout:
//! ```text
//! <sessions_dir>/
//!   <thread_id>/
//!     session.yaml   # SessionRecord (listing index)
//!     state.json     # serialized AgentState, treated as an opaque blob
//! ```
//!
//! Writes for one thread id always come from that session's single thread
//! of execution, so no cross-process locking is needed. The `persist`
//! toggle turns the store into a no-op for tests and CI without touching
//! call sites.

use crate::engine::state::AgentState;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const META_FILE: &str = "session.yaml";
const STATE_FILE: &str = "state.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub thread_id: String,
    pub created_at: u64,
    pub updated_at: u64,
    pub message_count: usize,
}

pub struct SessionStore {
    sessions_dir: PathBuf,
    persist: bool,
}

impl SessionStore {
    pub fn new(sessions_dir: PathBuf, persist: bool) -> Self {
        Self {
            sessions_dir,
            persist,
        }
    }

    /// Persist a session's full state. A failed write is logged, never
    /// fatal: the in-memory state stays valid for the process lifetime.
    pub fn save(&self, state: &AgentState) {
        if !self.persist {
            debug!("Session persistence disabled, skipping save");
            return;
        }
        if let Err(e) = self.save_inner(state) {
            warn!("Failed to persist session {}: {}", state.thread_id, e);
        }
    }

    fn save_inner(&self, state: &AgentState) -> Result<()> {
        validate_id(&state.thread_id)?;
        let dir = self.session_dir(&state.thread_id);
        std::fs::create_dir_all(&dir)?;

        let created_at = self
            .read_record(&state.thread_id)
            .map(|r| r.created_at)
            .unwrap_or_else(now_secs);
        let record = SessionRecord {
            thread_id: state.thread_id.clone(),
            created_at,
            updated_at: now_secs(),
            message_count: state.messages.len(),
        };
        std::fs::write(dir.join(META_FILE), serde_yml::to_string(&record)?)?;
        std::fs::write(dir.join(STATE_FILE), serde_json::to_string(state)?)?;
        Ok(())
    }

    /// Load a session's state; `None` if it was never saved.
    pub fn load(&self, thread_id: &str) -> Result<Option<AgentState>> {
        validate_id(thread_id)?;
        let path = self.session_dir(thread_id).join(STATE_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// All saved sessions, most recently updated first.
    pub fn list(&self) -> Result<Vec<SessionRecord>> {
        if !self.sessions_dir.exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for entry in std::fs::read_dir(&self.sessions_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let meta_path = entry.path().join(META_FILE);
            if !meta_path.exists() {
                continue;
            }
            let content = std::fs::read_to_string(&meta_path)?;
            match serde_yml::from_str::<SessionRecord>(&content) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("Skipping corrupt {}: {}", meta_path.display(), e);
                }
            }
        }
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }

    pub fn remove(&self, thread_id: &str) -> Result<()> {
        validate_id(thread_id)?;
        let dir = self.session_dir(thread_id);
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    fn read_record(&self, thread_id: &str) -> Option<SessionRecord> {
        let content = std::fs::read_to_string(self.session_dir(thread_id).join(META_FILE)).ok()?;
        serde_yml::from_str(&content).ok()
    }

    fn session_dir(&self, thread_id: &str) -> PathBuf {
        self.sessions_dir.join(thread_id)
    }
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        bail!("thread id must not be empty");
    }
    if id.contains("..") || id.contains('/') || id.contains('\\') {
        bail!("thread id contains invalid characters: {}", id);
    }
    Ok(())
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::message::Message;
    use crate::engine::state::{TodoItem, TodoPriority, TodoStatus};

    fn temp_store() -> (SessionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions"), true);
        (store, dir)
    }

    fn sample_state(thread_id: &str) -> AgentState {
        let mut state = AgentState::new(thread_id, 100);
        state.messages.push(Message::user_text("hello"));
        state.messages.push(Message::assistant("hi"));
        state.todos.push(TodoItem {
            id: "1".into(),
            content: "write the report".into(),
            status: TodoStatus::InProgress,
            priority: TodoPriority::High,
        });
        state.cumulative_prompt_tokens = 4200;
        state
    }

    #[test]
    fn test_save_load_roundtrip() {
        let (store, _dir) = temp_store();
        let state = sample_state("t1");
        store.save(&state);
        let loaded = store.load("t1").unwrap().unwrap();
        assert_eq!(loaded.thread_id, state.thread_id);
        assert_eq!(loaded.messages, state.messages);
        assert_eq!(loaded.todos, state.todos);
        assert_eq!(
            loaded.cumulative_prompt_tokens,
            state.cumulative_prompt_tokens
        );
    }

    #[test]
    fn test_load_missing_is_none() {
        let (store, _dir) = temp_store();
        assert!(store.load("never-saved").unwrap().is_none());
    }

    #[test]
    fn test_list_indexes_records() {
        let (store, _dir) = temp_store();
        store.save(&sample_state("t1"));
        store.save(&sample_state("t2"));
        let records = store.list().unwrap();
        assert_eq!(records.len(), 2);
        let t1 = records.iter().find(|r| r.thread_id == "t1").unwrap();
        assert_eq!(t1.message_count, 2);
        assert!(t1.created_at > 0);
    }

    #[test]
    fn test_save_preserves_created_at() {
        let (store, _dir) = temp_store();
        let state = sample_state("t1");
        store.save(&state);
        let first = store.list().unwrap()[0].created_at;
        store.save(&state);
        let second = store.list().unwrap()[0].created_at;
        assert_eq!(first, second);
    }

    #[test]
    fn test_persist_toggle_disables_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions"), false);
        store.save(&sample_state("t1"));
        assert!(store.load("t1").unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_remove_session() {
        let (store, _dir) = temp_store();
        store.save(&sample_state("t1"));
        store.remove("t1").unwrap();
        assert!(store.load("t1").unwrap().is_none());
    }

    #[test]
    fn test_invalid_thread_ids_rejected() {
        let (store, _dir) = temp_store();
        assert!(store.load("../escape").is_err());
        assert!(store.remove("a/b").is_err());
    }
}
