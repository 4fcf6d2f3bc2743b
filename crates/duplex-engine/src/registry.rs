//! Session registry: tracks every live session by id and decides what
//! happens when a new connection arrives claiming an id already in use
//! (§4.1, §9 Open Question — resolved as `TakeOver`; see DESIGN.md).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::session::Session;

/// What to do when a session is created with an id that is already live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionConflictPolicy {
    /// Tear down the existing session and let the new connection take its
    /// place. Matches a client reconnecting after a dropped socket.
    TakeOver,
    /// Refuse the new session outright, leaving the existing one running.
    Reject,
}

impl Default for SessionConflictPolicy {
    fn default() -> Self {
        SessionConflictPolicy::TakeOver
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConflict;

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    policy: SessionConflictPolicy,
}

impl SessionRegistry {
    pub fn new(policy: SessionConflictPolicy) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            policy,
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(id).cloned()
    }

    /// Registers `session` under its own id, first tearing down any
    /// existing session with that id per the configured conflict policy.
    pub async fn insert(&self, session: Arc<Session>) -> Result<(), SessionConflict> {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(&session.id) {
            match self.policy {
                SessionConflictPolicy::Reject => return Err(SessionConflict),
                SessionConflictPolicy::TakeOver => {
                    let existing = existing.clone();
                    // Drop the map lock before awaiting teardown so a
                    // worker calling back into the registry can't deadlock.
                    drop(sessions);
                    existing.close().await;
                    sessions = self.sessions.lock().await;
                }
            }
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    pub async fn close(&self, id: &str) {
        let session = self.sessions.lock().await.remove(id);
        if let Some(session) = session {
            session.close().await;
        }
    }

    pub async fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_and_get_round_trips() {
        let registry = SessionRegistry::new(SessionConflictPolicy::TakeOver);
        let session = Session::new("s1");
        registry.insert(session.clone()).await.unwrap();
        assert!(registry.get("s1").await.is_some());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn take_over_closes_the_previous_session_with_the_same_id() {
        let registry = SessionRegistry::new(SessionConflictPolicy::TakeOver);
        let first = Session::new("dup");
        registry.insert(first.clone()).await.unwrap();

        let second = Session::new("dup");
        registry.insert(second.clone()).await.unwrap();

        assert!(first.runtime.is_shutdown());
        assert_eq!(registry.len().await, 1);
        let current = registry.get("dup").await.unwrap();
        assert!(!current.runtime.is_shutdown());
    }

    #[tokio::test]
    async fn reject_policy_refuses_a_conflicting_id() {
        let registry = SessionRegistry::new(SessionConflictPolicy::Reject);
        let first = Session::new("dup");
        registry.insert(first.clone()).await.unwrap();

        let second = Session::new("dup");
        let result = registry.insert(second).await;

        assert_eq!(result, Err(SessionConflict));
        assert!(!first.runtime.is_shutdown());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn close_removes_and_tears_down() {
        let registry = SessionRegistry::new(SessionConflictPolicy::TakeOver);
        let session = Session::new("s1");
        registry.insert(session.clone()).await.unwrap();
        registry.close("s1").await;
        assert!(registry.get("s1").await.is_none());
        assert!(session.runtime.is_shutdown());
    }

    #[tokio::test]
    async fn close_all_tears_down_every_session() {
        let registry = SessionRegistry::new(SessionConflictPolicy::TakeOver);
        let a = Session::new("a");
        let b = Session::new("b");
        registry.insert(a.clone()).await.unwrap();
        registry.insert(b.clone()).await.unwrap();
        registry.close_all().await;
        assert_eq!(registry.len().await, 0);
        assert!(a.runtime.is_shutdown());
        assert!(b.runtime.is_shutdown());
    }
}
