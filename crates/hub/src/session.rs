//! Download sessions: one logical download spanning several files.
//!
//! A session is opened by the first file download that names it and closed
//! exactly once by [`HubClient::notify_model_download_complete`]. State is
//! owned by the client instance, so two clients never see each other's
//! sessions.
//!
//! [`HubClient::notify_model_download_complete`]: crate::HubClient::notify_model_download_complete

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Session {
    pub started: Instant,
    pub engine_id: String,
    pub feature_id: Option<String>,
    pub model: String,
    pub revision: String,
    /// Any file in the session failed.
    pub failed: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Sessions {
    open: Mutex<HashMap<String, Session>>,
}
impl Sessions {
    /// Open a session unless it is already open. Returns `true` if it was
    /// opened by this call.
    pub fn start(&self, id: &str, session: impl FnOnce() -> Session) -> bool {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if open.contains_key(id) {
            return false;
        }
        open.insert(id.to_string(), session());
        true
    }

    pub fn record_file(&self, id: &str, ok: bool) {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = open.get_mut(id) {
            session.failed |= !ok;
        }
    }

    /// Close a session, handing back its state. `None` if it was never
    /// opened or has already been closed.
    pub fn finish(&self, id: &str) -> Option<Session> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner).remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session {
            started: Instant::now(),
            engine_id: "e1".to_string(),
            feature_id: None,
            model: "org/m".to_string(),
            revision: "v1".to_string(),
            failed: false,
        }
    }

    #[test]
    fn test_lifecycle() {
        let sessions = Sessions::default();
        assert!(sessions.start("s1", session));
        assert!(!sessions.start("s1", session));
        sessions.record_file("s1", true);
        sessions.record_file("s1", false);
        sessions.record_file("s1", true);
        assert!(sessions.finish("s1").unwrap().failed);
        assert_eq!(sessions.finish("s1"), None);
        // Reopening after close starts a fresh session.
        assert!(sessions.start("s1", session));
        assert!(!sessions.finish("s1").unwrap().failed);
    }

    #[test]
    fn test_unknown_session() {
        let sessions = Sessions::default();
        sessions.record_file("nope", false);
        assert_eq!(sessions.finish("nope"), None);
    }
}
