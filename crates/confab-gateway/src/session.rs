//! Per-connection session state and the session registry.
//!
//! A session is owned by its connection task; all mutation happens there,
//! in frame-arrival order. The registry exists so admin surfaces can count
//! and inspect sessions; those reads may be stale by design.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use confab_core::types::session::SessionFileRef;
use confab_core::MessageHistory;
use tokio::sync::{Mutex, RwLock};
use tracing::info;
use uuid::Uuid;

pub struct Session {
    pub id: String,
    pub user: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: MessageHistory,
    /// Logical filename -> stored object reference. Never holds bytes.
    pub files: BTreeMap<String, SessionFileRef>,
    pub active: bool,
}

impl Session {
    pub fn new(user: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user: user.into(),
            created_at: now,
            updated_at: now,
            history: MessageHistory::new(),
            files: BTreeMap::new(),
            active: true,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Clear history and file references, preserving id and identity. The
    /// stored objects survive and remain listable by the user; the next
    /// turn simply no longer sees them in the manifest.
    pub fn reset(&mut self) {
        self.history.clear();
        self.files.clear();
        self.touch();
    }
}

pub type SharedSession = Arc<Mutex<Session>>;

/// Registry of live sessions.
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, SharedSession>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect(&self, user: &str) -> SharedSession {
        let session = Arc::new(Mutex::new(Session::new(user)));
        let id = session.lock().await.id.clone();
        self.sessions.write().await.insert(id.clone(), session.clone());
        let total = self.sessions.read().await.len();
        info!(user, session_id = %id, total, "session started");
        session
    }

    pub async fn disconnect(&self, session_id: &str) {
        if let Some(session) = self.sessions.write().await.remove(session_id) {
            let mut session = session.lock().await;
            session.active = false;
            info!(user = %session.user, session_id, "session removed");
        }
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn ids_for_user(&self, user: &str) -> Vec<String> {
        let sessions = self.sessions.read().await;
        let mut ids = Vec::new();
        for (id, session) in sessions.iter() {
            if session.lock().await.user == user {
                ids.push(id.clone());
            }
        }
        ids
    }
}
