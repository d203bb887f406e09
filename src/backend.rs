//! Collaborators the engine consumes.
//!
//! The engine never talks to the network or the disk directly.  It holds trait objects for the
//! session backend, the streaming chat backend and the preference persistence backend;
//! [`crate::HttpBackend`] implements the first two against the REST surface and
//! [`JsonFilePreferences`] the third.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::session::{Session, SessionUpdate};
use crate::{Error, Result};

/// A response body as it arrives from the transport.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Provider and model a request is routed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    /// Provider display name, e.g. `Anthropic`.
    pub provider: String,
    /// Provider-specific model id.
    pub model: String,
}

impl ModelSelection {
    /// Create a selection.
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

/// A single chat turn request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    /// The session the turn belongs to.  Sent in the URL, not the body.
    #[serde(skip)]
    pub session_id: String,

    /// What the user typed.
    pub prompt: String,

    /// Provider override.
    pub model_provider: Option<String>,

    /// Model override.
    pub model_name: Option<String>,
}

impl ChatRequest {
    /// Create a request without model overrides.
    pub fn new(session_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            prompt: prompt.into(),
            model_provider: None,
            model_name: None,
        }
    }

    /// Route the request to a specific model.
    pub fn with_model(mut self, model: Option<&ModelSelection>) -> Self {
        self.model_provider = model.map(|m| m.provider.clone());
        self.model_name = model.map(|m| m.model.clone());
        self
    }
}

/// Session CRUD on the remote source of truth.
#[async_trait::async_trait]
pub trait SessionBackend: Send + Sync {
    /// All sessions the backend knows, most recent first.
    async fn list_sessions(&self) -> Result<Vec<Session>>;

    /// Create a session, optionally titled.
    async fn create_session(&self, title_hint: Option<&str>) -> Result<Session>;

    /// Delete a session.
    async fn delete_session(&self, id: &str) -> Result<()>;

    /// Rename and/or pin a session.
    async fn update_session(&self, id: &str, update: &SessionUpdate) -> Result<Session>;
}

/// The streaming half of the chat API.
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send a turn and return the response body once the backend has accepted it.
    ///
    /// An error here means the request never reached the streaming state.
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream>;
}

/// Durable key/value storage for preferences.
///
/// Values are JSON.  Implementations are last-writer-wins and do no conflict detection.
pub trait PreferenceBackend: Send + Sync {
    /// Read a stored value.
    fn read(&self, key: &str) -> Result<Option<Value>>;

    /// Store a value, replacing whatever was there.
    fn write(&self, key: &str, value: &Value) -> Result<()>;
}

///////////////////////////////////////// MemoryPreferences /////////////////////////////////////

/// Preferences kept in memory and shared between clones.
///
/// Useful as a stand-in for durable storage: two stores built on clones of the same value see
/// each other's writes, the way two runs of a process see the same file.
#[derive(Debug, Clone, Default)]
pub struct MemoryPreferences {
    values: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryPreferences {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceBackend for MemoryPreferences {
    fn read(&self, key: &str) -> Result<Option<Value>> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn write(&self, key: &str, value: &Value) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.clone());
        Ok(())
    }
}

//////////////////////////////////////// JsonFilePreferences ////////////////////////////////////

/// Preferences stored as one JSON object in a file.
///
/// Every write rewrites the whole file through a temporary sibling and a rename, so a reader
/// never observes a half-written file.
#[derive(Debug)]
pub struct JsonFilePreferences {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFilePreferences {
    /// Use the file at `path`.  The file need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Map<String, Value>> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| {
                Error::serialization(
                    format!("failed to parse preferences in {}", self.path.display()),
                    Some(Box::new(err)),
                )
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Map::new()),
            Err(err) => Err(Error::io("failed to read preferences file", err)),
        }
    }
}

impl PreferenceBackend for JsonFilePreferences {
    fn read(&self, key: &str) -> Result<Option<Value>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.load()?.get(key).cloned())
    }

    fn write(&self, key: &str, value: &Value) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        // An unreadable file is replaced rather than blocking every later write.
        let mut values = self.load().unwrap_or_default();
        values.insert(key.to_string(), value.clone());
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|err| Error::io("failed to create preferences directory", err))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(&values)?;
        fs::write(&tmp, bytes).map_err(|err| Error::io("failed to write preferences file", err))?;
        fs::rename(&tmp, &self.path)
            .map_err(|err| Error::io("failed to replace preferences file", err))
    }
}
