//! Session Store
//!
//! The store owns sessions between turns. It is injected into the turn
//! processor as a trait object so the in-memory map can be replaced by a
//! durable backend without touching the progression logic.
//!
//! Turns on the same session must not interleave. The store hands out a
//! per-session lock that the caller holds for the duration of a turn; turns on
//! different sessions proceed in parallel.

use crate::curriculum::Curriculum;
use crate::session::SessionState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Held for the duration of one turn on one session.
pub type SessionGuard = OwnedMutexGuard<()>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Session store backend failure: {0}")]
    Backend(String),
}

/// Settings applied when a new session is seeded.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub track_phase: bool,
    pub student_background: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the stored state for `session_id`, if any.
    async fn get(&self, session_id: &str) -> Result<Option<SessionState>, StoreError>;

    /// Persists `state`, replacing whatever was stored under its id.
    async fn put(&self, state: SessionState) -> Result<(), StoreError>;

    /// Seeds a fresh session from `curriculum`. A random id is generated when
    /// `session_id` is `None`. Nothing is stored until the first `put`, so a
    /// turn that fails before persisting leaves no session behind.
    async fn create(
        &self,
        session_id: Option<String>,
        curriculum: &Curriculum,
        options: &SessionOptions,
    ) -> Result<SessionState, StoreError>;

    /// Acquires the turn lock for `session_id`.
    async fn lock(&self, session_id: &str) -> SessionGuard;
}

/// Process-local store. Sessions live until the process exits.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionState>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionState>, StoreError> {
        let state = self.sessions.read().await.get(session_id).cloned();
        match &state {
            Some(s) => debug!(
                session_id,
                messages = s.transcript.len(),
                current_milestone = ?s.current_milestone,
                "Retrieved session"
            ),
            None => debug!(session_id, "Session not found"),
        }
        Ok(state)
    }

    async fn put(&self, mut state: SessionState) -> Result<(), StoreError> {
        state.updated_at = chrono::Utc::now();
        debug!(
            session_id = %state.session_id,
            messages = state.transcript.len(),
            current_milestone = ?state.current_milestone,
            "Updating session"
        );
        self.sessions
            .write()
            .await
            .insert(state.session_id.clone(), state);
        Ok(())
    }

    async fn create(
        &self,
        session_id: Option<String>,
        curriculum: &Curriculum,
        options: &SessionOptions,
    ) -> Result<SessionState, StoreError> {
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        debug!(session_id = %session_id, "Seeded session");
        Ok(SessionState::new(
            session_id,
            curriculum,
            options.track_phase,
            options.student_background.clone(),
        ))
    }

    async fn lock(&self, session_id: &str) -> SessionGuard {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Drop idle locks whose turn never persisted a session.
            let sessions = self.sessions.read().await;
            locks.retain(|id, lock| Arc::strong_count(lock) > 1 || sessions.contains_key(id));
            drop(sessions);
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fresh(session_id: &str) -> SessionState {
        SessionState::new(session_id, &Curriculum::tic_tac_toe(), true, "new to Python")
    }

    fn options() -> SessionOptions {
        SessionOptions {
            track_phase: true,
            student_background: "new to Python".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_seeds_without_storing() {
        let store = InMemorySessionStore::new();
        let curriculum = Curriculum::tic_tac_toe();

        let state = store.create(None, &curriculum, &options()).await.unwrap();
        assert!(Uuid::parse_str(&state.session_id).is_ok());
        assert_eq!(state.current_milestone.as_deref(), Some("m1"));
        assert_eq!(state.student_background, "new to Python");
        assert!(store.is_empty().await);

        let named = store
            .create(Some("abc".to_string()), &curriculum, &options())
            .await
            .unwrap();
        assert_eq!(named.session_id, "abc");
        assert!(store.get("abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_then_get_returns_session() {
        let store = InMemorySessionStore::new();
        store.put(fresh("abc")).await.unwrap();

        let fetched = store.get("abc").await.unwrap().unwrap();
        assert_eq!(fetched.session_id, "abc");
        assert_eq!(fetched.current_milestone.as_deref(), Some("m1"));
        assert_eq!(fetched.student_background, "new to Python");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_unknown_returns_none() {
        let store = InMemorySessionStore::new();
        assert!(store.get("missing").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_put_replaces_and_touches_timestamp() {
        let store = InMemorySessionStore::new();
        let mut state = fresh("s");
        let created = state.updated_at;
        store.put(state.clone()).await.unwrap();

        state.push_user("hello");
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.put(state).await.unwrap();

        let fetched = store.get("s").await.unwrap().unwrap();
        assert_eq!(fetched.transcript.len(), 1);
        assert!(fetched.updated_at > created);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_lock_serializes_same_session() {
        let store = Arc::new(InMemorySessionStore::new());
        let guard = store.lock("s").await;

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let _guard = store.lock("s").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // A different session is not blocked.
        let _other = tokio::time::timeout(Duration::from_millis(100), store.lock("t"))
            .await
            .expect("independent session lock should not block");

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("contender should acquire the lock once released")
            .unwrap();
    }

    #[tokio::test]
    async fn test_idle_locks_without_session_are_dropped() {
        let store = InMemorySessionStore::new();
        store.put(fresh("kept")).await.unwrap();

        drop(store.lock("kept").await);
        drop(store.lock("abandoned").await);
        let held = store.lock("held").await;
        assert_eq!(store.locks.lock().await.len(), 2);

        let _next = store.lock("next").await;
        let mut ids: Vec<String> = store.locks.lock().await.keys().cloned().collect();
        ids.sort();
        assert_eq!(ids, vec!["held", "kept", "next"]);
        drop(held);
    }
}
