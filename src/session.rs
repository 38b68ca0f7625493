//! Per-client session state.
//!
//! The session is the only carrier of state between requests: conversation
//! log, generation config and the current stream session all hang off it.
//! Sessions live in a process-wide map keyed by the `sid` cookie and are
//! created lazily on first touch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

use crate::chat::log::ChatLog;
use crate::chat::stream::StreamSession;
use crate::types::ChatConfig;

pub struct ChatState {
    pub log: ChatLog,
    pub config: ChatConfig,
}

pub struct Session {
    pub id: String,
    authenticated: AtomicBool,
    /// Log + config. All log mutations go through this lock, which
    /// serializes foreground edits against background stream commits.
    pub chat: AsyncMutex<ChatState>,
    /// The current stream session, if a streaming submit is live.
    pub stream: AsyncMutex<Option<Arc<StreamSession>>>,
}

impl Session {
    fn new(id: String, config: ChatConfig) -> Self {
        Self {
            id,
            authenticated: AtomicBool::new(false),
            chat: AsyncMutex::new(ChatState {
                log: ChatLog::new(),
                config,
            }),
            stream: AsyncMutex::new(None),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    pub fn set_authenticated(&self) {
        self.authenticated.store(true, Ordering::SeqCst);
    }
}

pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    defaults: ChatConfig,
    no_auth: bool,
}

impl SessionStore {
    pub fn new(defaults: ChatConfig, no_auth: bool) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            defaults,
            no_auth,
        }
    }

    /// Resolve the session for a request cookie, creating one when the id is
    /// absent or unknown. Returns the session and whether it is new (new
    /// sessions need a Set-Cookie on the response).
    pub fn get_or_create(&self, sid: Option<&str>) -> (Arc<Session>, bool) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(sid) = sid {
            if let Some(existing) = sessions.get(sid) {
                return (existing.clone(), false);
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(id.clone(), self.defaults.clone()));
        if self.no_auth {
            session.set_authenticated();
        }
        sessions.insert(id, session.clone());
        log::debug!(target: "session", "created session {}", session.id);
        (session, true)
    }

    /// Drop a session outright (logout). The next request starts fresh.
    pub fn invalidate(&self, sid: &str) -> bool {
        self.sessions.lock().unwrap().remove(sid).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_sid_creates_a_fresh_session() {
        let store = SessionStore::new(ChatConfig::default(), false);
        let (first, created) = store.get_or_create(None);
        assert!(created);
        let (again, created) = store.get_or_create(Some(&first.id));
        assert!(!created);
        assert_eq!(first.id, again.id);
    }

    #[test]
    fn sessions_start_unauthenticated_unless_no_auth() {
        let store = SessionStore::new(ChatConfig::default(), false);
        let (session, _) = store.get_or_create(None);
        assert!(!session.is_authenticated());

        let open = SessionStore::new(ChatConfig::default(), true);
        let (session, _) = open.get_or_create(None);
        assert!(session.is_authenticated());
    }

    #[test]
    fn invalidate_forgets_the_session() {
        let store = SessionStore::new(ChatConfig::default(), false);
        let (session, _) = store.get_or_create(None);
        session.set_authenticated();
        assert!(store.invalidate(&session.id));
        let (fresh, created) = store.get_or_create(Some(&session.id));
        assert!(created);
        assert!(!fresh.is_authenticated());
    }
}
