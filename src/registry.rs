//! The session registry: known sessions and the active-session pointer.
//!
//! State lives in a watch channel.  Every mutation computes the next list inside the channel's
//! write lock and swaps it in whole, so an observer sees either the old list or the new one.

use std::sync::Arc;

use tokio::sync::watch;

use crate::backend::SessionBackend;
use crate::notify::NotificationChannel;
use crate::observability::REGISTRY_BACKEND_ERRORS;
use crate::session::{Session, SessionStats, SessionUpdate};
use crate::{Error, Result};

/// A snapshot of the registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryState {
    /// All known sessions, most recently created first.
    pub sessions: Arc<Vec<Session>>,
    /// The selected session, by identifier.
    pub active_id: Option<String>,
}

impl RegistryState {
    /// The session with identifier `id`.
    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    /// The selected session.
    pub fn active(&self) -> Option<&Session> {
        self.active_id.as_deref().and_then(|id| self.get(id))
    }

    /// True when a session with identifier `id` is held.
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }
}

struct Inner {
    backend: Arc<dyn SessionBackend>,
    state: watch::Sender<RegistryState>,
    notifier: NotificationChannel,
}

/// The session registry.  Clones share state.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl SessionRegistry {
    /// Create an empty registry backed by `backend`.
    pub fn new(backend: Arc<dyn SessionBackend>, notifier: NotificationChannel) -> Self {
        let (state, _) = watch::channel(RegistryState::default());
        Self {
            inner: Arc::new(Inner {
                backend,
                state,
                notifier,
            }),
        }
    }

    /// Replace the list with what the backend holds.
    ///
    /// The active pointer survives if its session is still listed.
    pub async fn load(&self) -> Result<()> {
        let sessions = self
            .inner
            .backend
            .list_sessions()
            .await
            .map_err(|err| self.backend_failed("load sessions", err))?;
        tracing::debug!(count = sessions.len(), "sessions loaded");
        self.inner.state.send_modify(|state| {
            state.sessions = Arc::new(sessions);
            if let Some(id) = &state.active_id
                && !state.contains(id)
            {
                state.active_id = None;
            }
        });
        Ok(())
    }

    /// All sessions in the order held.
    pub fn list(&self) -> Arc<Vec<Session>> {
        Arc::clone(&self.inner.state.borrow().sessions)
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> RegistryState {
        self.inner.state.borrow().clone()
    }

    /// Observe changes.
    pub fn subscribe(&self) -> watch::Receiver<RegistryState> {
        self.inner.state.subscribe()
    }

    /// The session with identifier `id`.
    pub fn get(&self, id: &str) -> Option<Session> {
        self.inner.state.borrow().get(id).cloned()
    }

    /// Identifier of the selected session.
    pub fn active_id(&self) -> Option<String> {
        self.inner.state.borrow().active_id.clone()
    }

    /// The selected session.
    pub fn active_session(&self) -> Option<Session> {
        self.inner.state.borrow().active().cloned()
    }

    /// Statistics over the held sessions.
    pub fn stats(&self) -> SessionStats {
        SessionStats::from_sessions(&self.inner.state.borrow().sessions)
    }

    /// Create a session, put it first, and select it.
    pub async fn create(&self, title_hint: Option<&str>) -> Result<Session> {
        let session = self
            .inner
            .backend
            .create_session(title_hint)
            .await
            .map_err(|err| self.backend_failed("create session", err))?;
        tracing::debug!(session_id = %session.id, title = %session.title, "session created");
        let created = session.clone();
        self.inner.state.send_modify(move |state| {
            let mut sessions = Vec::with_capacity(state.sessions.len() + 1);
            sessions.push(created);
            sessions.extend(state.sessions.iter().cloned());
            state.active_id = Some(sessions[0].id.clone());
            state.sessions = Arc::new(sessions);
        });
        Ok(session)
    }

    /// Delete a session.  Clears the active pointer if it pointed there.
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.inner
            .backend
            .delete_session(id)
            .await
            .map_err(|err| self.backend_failed("delete session", err))?;
        self.inner.state.send_modify(|state| {
            let sessions: Vec<Session> = state
                .sessions
                .iter()
                .filter(|s| s.id != id)
                .cloned()
                .collect();
            state.sessions = Arc::new(sessions);
            if state.active_id.as_deref() == Some(id) {
                state.active_id = None;
            }
        });
        tracing::debug!(session_id = %id, "session deleted");
        self.inner.notifier.success("Session deleted");
        Ok(())
    }

    /// Point the active pointer at a held session.
    pub fn select(&self, id: &str) -> Result<()> {
        let mut missing = false;
        self.inner.state.send_if_modified(|state| {
            if !state.contains(id) {
                missing = true;
                return false;
            }
            if state.active_id.as_deref() == Some(id) {
                return false;
            }
            state.active_id = Some(id.to_string());
            true
        });
        if missing {
            return Err(Error::not_found(
                "cannot select a session that is not listed",
                Some(id.to_string()),
            ));
        }
        tracing::debug!(session_id = %id, "session selected");
        Ok(())
    }

    /// Rename and/or pin a session.
    pub async fn update(&self, id: &str, update: SessionUpdate) -> Result<Session> {
        if update.is_empty() {
            return Err(Error::validation(
                "at least one of title or pinned must be set",
                Some("update".to_string()),
            ));
        }
        let session = self
            .inner
            .backend
            .update_session(id, &update)
            .await
            .map_err(|err| self.backend_failed("update session", err))?;
        self.replace(session.clone());
        self.inner.notifier.success("Session updated");
        Ok(session)
    }

    /// Fold the messages of a finished turn into the entry with the same identifier.
    ///
    /// Only the messages and the update time come from `session`; title and pin state stay as
    /// the registry holds them, since either may have been changed while the response streamed.
    /// Returns the merged entry, or `None` when the session is no longer held, e.g. because it
    /// was deleted while a response was streaming into it.
    pub(crate) fn settle(&self, session: &Session) -> Option<Session> {
        let mut merged = None;
        self.inner.state.send_if_modified(|state| {
            let Some(index) = state.sessions.iter().position(|s| s.id == session.id) else {
                return false;
            };
            let mut sessions = Vec::clone(&state.sessions);
            let entry = &mut sessions[index];
            entry.messages = session.messages.clone();
            entry.updated_at = entry.updated_at.max(session.updated_at);
            merged = Some(entry.clone());
            state.sessions = Arc::new(sessions);
            true
        });
        if merged.is_none() {
            tracing::debug!(session_id = %session.id, "settled session is no longer listed; dropping it");
        }
        merged
    }

    fn replace(&self, session: Session) -> bool {
        let mut replacement = Some(session);
        self.inner.state.send_if_modified(|state| {
            let Some(index) = state
                .sessions
                .iter()
                .position(|s| Some(&s.id) == replacement.as_ref().map(|r| &r.id))
            else {
                return false;
            };
            let mut sessions = Vec::clone(&state.sessions);
            if let Some(session) = replacement.take() {
                sessions[index] = session;
            }
            state.sessions = Arc::new(sessions);
            true
        })
    }

    fn backend_failed(&self, what: &str, err: Error) -> Error {
        REGISTRY_BACKEND_ERRORS.click();
        tracing::warn!(error = %err, "failed to {what}");
        self.inner.notifier.error(err.to_string());
        err
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::notify::NotificationKind;
    use crate::session::Message;

    /// A session backend that keeps sessions in memory and hands out sequential ids.
    #[derive(Default)]
    pub(crate) struct FakeSessions {
        sessions: Mutex<Vec<Session>>,
        next_id: Mutex<u32>,
        pub(crate) fail: Mutex<bool>,
    }

    impl FakeSessions {
        fn check(&self) -> Result<()> {
            if *self.fail.lock().unwrap() {
                Err(Error::transport("backend unavailable", Some(503), None))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait::async_trait]
    impl SessionBackend for FakeSessions {
        async fn list_sessions(&self) -> Result<Vec<Session>> {
            self.check()?;
            Ok(self.sessions.lock().unwrap().clone())
        }

        async fn create_session(&self, title_hint: Option<&str>) -> Result<Session> {
            self.check()?;
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            let session = Session::new(
                format!("s{next_id}"),
                title_hint.unwrap_or("New Chat"),
            );
            self.sessions.lock().unwrap().insert(0, session.clone());
            Ok(session)
        }

        async fn delete_session(&self, id: &str) -> Result<()> {
            self.check()?;
            let mut sessions = self.sessions.lock().unwrap();
            let before = sessions.len();
            sessions.retain(|s| s.id != id);
            if sessions.len() == before {
                return Err(Error::transport("Session not found", Some(404), None));
            }
            Ok(())
        }

        async fn update_session(&self, id: &str, update: &SessionUpdate) -> Result<Session> {
            self.check()?;
            let mut sessions = self.sessions.lock().unwrap();
            let Some(session) = sessions.iter_mut().find(|s| s.id == id) else {
                return Err(Error::transport("Session not found", Some(404), None));
            };
            if let Some(title) = &update.title {
                session.title = title.clone();
            }
            if let Some(pinned) = update.pinned {
                session.pinned = pinned;
            }
            Ok(session.clone())
        }
    }

    fn registry() -> (SessionRegistry, Arc<FakeSessions>, NotificationChannel) {
        let backend = Arc::new(FakeSessions::default());
        let notifier = NotificationChannel::default();
        (
            SessionRegistry::new(backend.clone(), notifier.clone()),
            backend,
            notifier,
        )
    }

    #[tokio::test]
    async fn create_prepends_and_selects() {
        let (registry, _, _) = registry();
        registry.create(Some("first")).await.unwrap();
        let second = registry.create(None).await.unwrap();
        let ids: Vec<String> = registry.list().iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec!["s2", "s1"]);
        assert_eq!(registry.active_id(), Some(second.id));
        assert_eq!(registry.list()[1].title, "first");
    }

    #[tokio::test]
    async fn deleting_active_session_clears_pointer() {
        let (registry, _, _) = registry();
        registry.create(None).await.unwrap();
        registry.create(None).await.unwrap();
        assert_eq!(registry.active_id().as_deref(), Some("s2"));

        registry.remove("s2").await.unwrap();
        assert_eq!(registry.active_id(), None);
        assert_eq!(registry.list().len(), 1);
    }

    #[tokio::test]
    async fn deleting_other_session_keeps_pointer() {
        let (registry, _, _) = registry();
        registry.create(None).await.unwrap();
        registry.create(None).await.unwrap();
        registry.remove("s1").await.unwrap();
        assert_eq!(registry.active_id().as_deref(), Some("s2"));
    }

    #[tokio::test]
    async fn select_requires_listed_session() {
        let (registry, _, _) = registry();
        registry.create(None).await.unwrap();
        registry.create(None).await.unwrap();
        registry.select("s1").unwrap();
        assert_eq!(registry.active_id().as_deref(), Some("s1"));
        let err = registry.select("nope").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(registry.active_id().as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn update_replaces_entry_in_place() {
        let (registry, _, _) = registry();
        registry.create(None).await.unwrap();
        registry.create(None).await.unwrap();
        registry
            .update("s1", SessionUpdate::title("Renamed"))
            .await
            .unwrap();
        registry.update("s1", SessionUpdate::pinned(true)).await.unwrap();
        let list = registry.list();
        assert_eq!(list[1].id, "s1");
        assert_eq!(list[1].title, "Renamed");
        assert!(list[1].pinned);
        assert_eq!(registry.stats().pinned_sessions, 1);

        let err = registry
            .update("s1", SessionUpdate::default())
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn backend_failure_raises_notification() {
        let (registry, backend, notifier) = registry();
        *backend.fail.lock().unwrap() = true;
        let err = registry.create(None).await.unwrap_err();
        assert!(err.is_transport());
        assert!(registry.list().is_empty());
        let text = notifier
            .current()
            .get(NotificationKind::Error)
            .map(|n| n.text.clone());
        assert_eq!(text, Some(err.to_string()));
    }

    #[tokio::test]
    async fn load_drops_stale_active_pointer() {
        let (registry, backend, _) = registry();
        registry.create(None).await.unwrap();
        backend.sessions.lock().unwrap().clear();
        registry.load().await.unwrap();
        assert!(registry.list().is_empty());
        assert_eq!(registry.active_id(), None);
    }

    #[tokio::test]
    async fn observers_keep_their_snapshot() {
        let (registry, _, _) = registry();
        registry.create(None).await.unwrap();
        let before = registry.list();
        registry.create(None).await.unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(registry.list().len(), 2);
    }

    #[tokio::test]
    async fn settle_ignores_removed_sessions() {
        let (registry, _, _) = registry();
        let session = registry.create(None).await.unwrap();
        registry.remove(&session.id).await.unwrap();
        assert!(registry.settle(&session).is_none());
        assert!(registry.list().is_empty());
    }

    #[tokio::test]
    async fn settle_keeps_title_and_pin() {
        let (registry, _, _) = registry();
        let session = registry.create(Some("orig")).await.unwrap();
        let finished = session.clone().append_message(Message::user("hi"));
        registry
            .update(&session.id, SessionUpdate::title("Renamed"))
            .await
            .unwrap();
        registry
            .update(&session.id, SessionUpdate::pinned(true))
            .await
            .unwrap();

        let merged = registry.settle(&finished).unwrap();
        assert_eq!(merged.title, "Renamed");
        assert!(merged.pinned);
        assert_eq!(merged.message_count(), 1);
        assert_eq!(registry.get(&session.id), Some(merged));
    }
}
