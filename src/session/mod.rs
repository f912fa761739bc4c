//! Conversation session tracking
//!
//! Sessions are ephemeral and memory-resident: each user has an opaque
//! session id, a monotone message counter, and a bounded ring of recent
//! exchanges. A reset replaces the whole session under a new id; history
//! never crosses a reset. Nothing here is persisted, so a process restart
//! starts every user from a cold session.

use crate::models::Exchange;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Configuration for session tracking
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum exchanges kept in the recent-history ring. The message
    /// counter keeps counting past this bound.
    pub max_recent: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { max_recent: 50 }
    }
}

/// One user's active session
#[derive(Debug)]
struct UserSession {
    session_id: Uuid,
    message_count: u64,
    recent: VecDeque<Exchange>,
}

impl UserSession {
    fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            message_count: 0,
            recent: VecDeque::new(),
        }
    }
}

/// Tracks per-user conversation sessions.
///
/// Each user gets their own `Mutex<UserSession>`; appends and counter
/// increments for one user are serialized through it while different users
/// proceed in parallel. The outer map lock is held only long enough to find
/// or create the per-user entry.
pub struct SessionTracker {
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<UserSession>>>>,
    config: SessionConfig,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Start a fresh session for the user, replacing any existing one
    /// wholesale. Returns the new opaque session id.
    pub async fn start_session(&self, user_id: Uuid) -> Uuid {
        let session = UserSession::new();
        let session_id = session.session_id;

        let mut sessions = self.sessions.write().await;
        sessions.insert(user_id, Arc::new(Mutex::new(session)));

        session_id
    }

    async fn session_handle(&self, user_id: Uuid) -> Arc<Mutex<UserSession>> {
        {
            let sessions = self.sessions.read().await;
            if let Some(handle) = sessions.get(&user_id) {
                return handle.clone();
            }
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(UserSession::new())))
            .clone()
    }

    /// Record one exchange, implicitly starting a session if none exists.
    /// Returns the new message number (1-based) and the exchange id.
    pub async fn record_exchange(
        &self,
        user_id: Uuid,
        user_text: &str,
        bot_text: &str,
    ) -> (u64, Uuid) {
        let handle = self.session_handle(user_id).await;
        let mut session = handle.lock().await;

        session.message_count += 1;
        let exchange = Exchange {
            id: Uuid::new_v4(),
            number: session.message_count,
            user_text: user_text.to_string(),
            bot_text: bot_text.to_string(),
            timestamp: Utc::now(),
        };
        let result = (exchange.number, exchange.id);

        session.recent.push_back(exchange);
        while session.recent.len() > self.config.max_recent {
            session.recent.pop_front();
        }

        result
    }

    /// Up to `limit` most recent exchanges of the current session,
    /// oldest-first. Empty when the user has no session yet.
    pub async fn get_history(&self, user_id: Uuid, limit: usize) -> Vec<Exchange> {
        let handle = {
            let sessions = self.sessions.read().await;
            match sessions.get(&user_id) {
                Some(handle) => handle.clone(),
                None => return Vec::new(),
            }
        };

        let session = handle.lock().await;
        let skip = session.recent.len().saturating_sub(limit);
        session.recent.iter().skip(skip).cloned().collect()
    }

    /// Current message count; 0 when the user has no session.
    pub async fn message_count(&self, user_id: Uuid) -> u64 {
        let sessions = self.sessions.read().await;
        match sessions.get(&user_id) {
            Some(handle) => handle.lock().await.message_count,
            None => 0,
        }
    }

    /// Current session id, if a session exists.
    pub async fn session_id(&self, user_id: Uuid) -> Option<Uuid> {
        let sessions = self.sessions.read().await;
        match sessions.get(&user_id) {
            Some(handle) => Some(handle.lock().await.session_id),
            None => None,
        }
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}
