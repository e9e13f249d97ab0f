//! Bounded per-conversation history.
//!
//! A session's turn history is a fixed-size sliding window, not a
//! summarizing compactor: once `max_history` is exceeded the oldest
//! turns are evicted and their information is gone. The handle a
//! [`SessionManager`] gives out doubles as the session's generation
//! slot: whoever holds the lock is the only writer.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::runtime::ChatMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message within a session. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatSession {
    pub id: String,
    turns: VecDeque<Turn>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl ChatSession {
    fn new<S: Into<String>>(id: S) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            turns: VecDeque::new(),
            created_at: now,
            last_active: now,
        }
    }

    /// Append a turn, evicting from the front until the window fits.
    pub fn push_turn(&mut self, turn: Turn, max_history: usize) {
        self.turns.push_back(turn);
        while self.turns.len() > max_history {
            self.turns.pop_front();
        }
        self.last_active = Utc::now();
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.last_active = Utc::now();
    }

    /// Serialize stored turns plus the new user text into the
    /// runtime's chat format. Stored turns are never mutated.
    pub fn build_messages(&self, system_prompt: &str, new_user_text: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.turns.len() + 2);
        if !system_prompt.is_empty() {
            messages.push(ChatMessage::system(system_prompt));
        }
        for turn in &self.turns {
            messages.push(match turn.role {
                Role::User => ChatMessage::user(&turn.content),
                Role::Assistant => ChatMessage::assistant(&turn.content),
            });
        }
        messages.push(ChatMessage::user(new_user_text));
        messages
    }
}

pub type SessionHandle = Arc<Mutex<ChatSession>>;

pub struct SessionManager {
    sessions: Mutex<HashMap<String, SessionHandle>>,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Idempotent lookup-or-create. The returned handle is the
    /// session's generation slot.
    pub async fn get_or_create(&self, session_id: &str) -> SessionHandle {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ChatSession::new(session_id))))
            .clone()
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.lock().await;
        sessions.get(session_id).cloned()
    }

    /// Clear a session's history. Waits for any in-flight generation
    /// to release the slot first, so history is never reset under a
    /// running request.
    pub async fn reset(&self, session_id: &str) -> bool {
        let handle = self.get(session_id).await;
        match handle {
            Some(handle) => {
                handle.lock().await.clear();
                true
            }
            None => false,
        }
    }

    /// Drop sessions idle past the threshold. Sessions with an
    /// in-flight generation are skipped. Called from a background
    /// interval task, never on the request path.
    pub async fn expire(&self, now: DateTime<Utc>) -> usize {
        let idle = chrono::Duration::from_std(self.idle_timeout)
            .unwrap_or_else(|_| chrono::Duration::MAX);
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|id, handle| match handle.try_lock() {
            Ok(session) => {
                let keep = now - session.last_active < idle;
                if !keep {
                    tracing::debug!(session_id = %id, "expiring idle session");
                }
                keep
            }
            // Slot held: a generation is running, session is live.
            Err(_) => true,
        });
        before - sessions.len()
    }

    pub async fn count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
