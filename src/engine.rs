//! The engine: one state container the UI talks to.
//!
//! [`Engine`] composes the session registry, the preference store, the notification channel and
//! the stream reconciler.  Every observable is a snapshot or a watch receiver; every entry point
//! raises its own notification on failure and still returns the error.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;

use crate::backend::{ChatBackend, JsonFilePreferences, SessionBackend};
use crate::client::{DEFAULT_BASE_URL, DEFAULT_CONNECT_TIMEOUT, HttpBackend};
use crate::notify::{DEFAULT_ERROR_TTL, DEFAULT_SUCCESS_TTL, NotificationChannel, Notifications};
use crate::preferences::{PreferenceKey, PreferenceStore};
use crate::reconciler::{FragmentCallback, InFlight, StreamHandle, StreamReconciler, TurnPhase};
use crate::registry::{RegistryState, SessionRegistry};
use crate::session::{Session, SessionStats, SessionUpdate};
use crate::Result;

//////////////////////////////////////////// EngineConfig ///////////////////////////////////////

/// Resolved configuration for an [`Engine`] talking to the HTTP backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Base URL of the REST API.
    pub base_url: String,

    /// Connect timeout for every request.  Response bodies have no timeout.
    pub connect_timeout: Duration,

    /// How long an error notification stays visible.
    pub error_ttl: Duration,

    /// How long a success notification stays visible.
    pub success_ttl: Duration,

    /// Where preferences persist.  `None` keeps them in memory.
    pub preferences_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    ///
    /// Defaults:
    /// - Base URL: `http://localhost:8000/api/`
    /// - Connect timeout: 10s
    /// - Error/success TTL: 5s/3s
    /// - Preferences: in memory
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            error_ttl: DEFAULT_ERROR_TTL,
            success_ttl: DEFAULT_SUCCESS_TTL,
            preferences_path: None,
        }
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the error notification TTL.
    pub fn with_error_ttl(mut self, ttl: Duration) -> Self {
        self.error_ttl = ttl;
        self
    }

    /// Sets the success notification TTL.
    pub fn with_success_ttl(mut self, ttl: Duration) -> Self {
        self.success_ttl = ttl;
        self
    }

    /// Sets the preferences file.
    pub fn with_preferences_path(mut self, path: Option<PathBuf>) -> Self {
        self.preferences_path = path;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/////////////////////////////////////////////// Engine //////////////////////////////////////////

/// The state container.  Clones share state.
#[derive(Clone, Debug)]
pub struct Engine {
    registry: SessionRegistry,
    preferences: PreferenceStore,
    notifier: NotificationChannel,
    reconciler: StreamReconciler,
}

impl Engine {
    /// Assemble an engine from its collaborators.
    pub fn new(
        sessions: Arc<dyn SessionBackend>,
        chat: Arc<dyn ChatBackend>,
        preferences: PreferenceStore,
        notifier: NotificationChannel,
    ) -> Self {
        let registry = SessionRegistry::new(sessions, notifier.clone());
        let reconciler = StreamReconciler::new(registry.clone(), chat, notifier.clone());
        Self {
            registry,
            preferences,
            notifier,
            reconciler,
        }
    }

    /// Build an engine against the HTTP backend described by `config`.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let http = Arc::new(HttpBackend::with_options(
            &config.base_url,
            Some(config.connect_timeout),
        )?);
        let preferences = match &config.preferences_path {
            Some(path) => PreferenceStore::with_backend(Arc::new(JsonFilePreferences::new(path))),
            None => PreferenceStore::in_memory(),
        };
        let notifier = NotificationChannel::new(config.error_ttl, config.success_ttl);
        tracing::debug!(
            base_url = %http.base_url(),
            durable = preferences.is_durable(),
            "engine configured"
        );
        Ok(Self::new(http.clone(), http, preferences, notifier))
    }

    /// The session registry.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// The preference store.
    pub fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    /// The notification channel.
    pub fn notifier(&self) -> &NotificationChannel {
        &self.notifier
    }

    /// The stream reconciler.
    pub fn reconciler(&self) -> &StreamReconciler {
        &self.reconciler
    }

    // Observables.

    /// All sessions in display order.
    pub fn sessions(&self) -> Arc<Vec<Session>> {
        self.registry.list()
    }

    /// The selected session's identifier.
    pub fn active_id(&self) -> Option<String> {
        self.registry.active_id()
    }

    /// The selected session.  While a turn is in flight its messages are the ones being written
    /// to; everything else comes from the registry.
    pub fn active_session(&self) -> Option<Session> {
        let id = self.registry.active_id()?;
        let mut session = self.registry.get(&id)?;
        if let Some(turn) = self.reconciler.turn(&id) {
            session.messages = turn.session.messages.clone();
        }
        Some(session)
    }

    /// True while any turn is in flight.
    pub fn is_streaming(&self) -> bool {
        self.reconciler.is_streaming()
    }

    /// Phase of the selected session's turn, if one is in flight.
    pub fn active_phase(&self) -> Option<TurnPhase> {
        let id = self.registry.active_id()?;
        self.reconciler.turn(&id).map(|turn| turn.phase)
    }

    /// Text streamed so far into the selected session.
    pub fn streaming_text(&self) -> Option<String> {
        let id = self.registry.active_id()?;
        self.reconciler.turn(&id).map(|turn| turn.text)
    }

    /// Visible notifications.
    pub fn notifications(&self) -> Notifications {
        self.notifier.current()
    }

    /// Statistics over the held sessions.
    pub fn stats(&self) -> SessionStats {
        self.registry.stats()
    }

    /// Observe the session list and active pointer.
    pub fn subscribe_sessions(&self) -> watch::Receiver<RegistryState> {
        self.registry.subscribe()
    }

    /// Observe in-flight turns.
    pub fn subscribe_turns(&self) -> watch::Receiver<InFlight> {
        self.reconciler.subscribe()
    }

    /// Observe notifications.
    pub fn subscribe_notifications(&self) -> watch::Receiver<Notifications> {
        self.notifier.subscribe()
    }

    // Entry points.

    /// Fetch the session list from the backend.
    pub async fn load(&self) -> Result<()> {
        self.registry.load().await
    }

    /// Send `prompt` to the selected session using the preferred model.
    pub fn send(
        &self,
        prompt: &str,
        on_fragment: Option<FragmentCallback>,
    ) -> Result<StreamHandle> {
        let model = self.preferences.model_selection();
        self.reconciler.send(prompt, Some(&model), on_fragment)
    }

    /// Stop the selected session's turn.  Returns false when nothing was streaming.
    pub fn stop(&self) -> bool {
        match self.registry.active_id() {
            Some(id) => self.reconciler.cancel(&id),
            None => false,
        }
    }

    /// Create a session and select it.
    pub async fn create_session(&self, title_hint: Option<&str>) -> Result<Session> {
        self.registry.create(title_hint).await
    }

    /// Delete a session, stopping its turn if one is in flight.
    pub async fn delete_session(&self, id: &str) -> Result<()> {
        self.registry.remove(id).await?;
        if self.reconciler.cancel(id) {
            tracing::debug!(session_id = %id, "cancelled turn of deleted session");
        }
        Ok(())
    }

    /// Select a session.
    pub fn select_session(&self, id: &str) -> Result<()> {
        self.registry.select(id).inspect_err(|err| self.notifier.error(err.to_string()))
    }

    /// Rename and/or pin a session.
    pub async fn update_session(&self, id: &str, update: SessionUpdate) -> Result<Session> {
        self.registry.update(id, update).await.inspect_err(|err| {
            if err.is_validation() {
                self.notifier.error(err.to_string());
            }
        })
    }

    /// Read a preference.
    pub fn preference(&self, key: PreferenceKey) -> Value {
        self.preferences.get(key)
    }

    /// Write a preference.
    pub fn set_preference(&self, key: PreferenceKey, value: impl Into<Value>) -> Result<()> {
        self.preferences
            .set(key, value)
            .inspect_err(|err| self.notifier.error(err.to_string()))
    }
}
