//! User preferences with an optional durable backing store.
//!
//! Reads come from memory.  Writes update memory and then write through to the persistence
//! backend; the last write wins and nothing is merged.  Without a backend the store is
//! memory-only.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::backend::{ModelSelection, PreferenceBackend};
use crate::observability::{PREFERENCE_WRITES, PREFERENCE_WRITE_ERRORS};
use crate::{Error, Result};

/// Provider selected when nothing is stored.
pub const DEFAULT_PROVIDER: &str = "Anthropic";
/// Model selected when nothing is stored.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
/// Sampling temperature when nothing is stored.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
/// Response token limit when nothing is stored.
pub const DEFAULT_MAX_TOKENS: u64 = 4096;

/// A known preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreferenceKey {
    /// Model provider.
    SelectedProvider,
    /// Model id.
    SelectedModel,
    /// Sampling temperature.
    Temperature,
    /// Response token limit.
    MaxTokens,
    /// Sidebar visibility.
    SidebarOpen,
    /// Color theme.
    Theme,
}

impl PreferenceKey {
    /// Every key, in storage order.
    pub const ALL: [PreferenceKey; 6] = [
        PreferenceKey::SelectedProvider,
        PreferenceKey::SelectedModel,
        PreferenceKey::Temperature,
        PreferenceKey::MaxTokens,
        PreferenceKey::SidebarOpen,
        PreferenceKey::Theme,
    ];

    /// The storage key.
    pub fn as_str(self) -> &'static str {
        match self {
            PreferenceKey::SelectedProvider => "selectedProvider",
            PreferenceKey::SelectedModel => "selectedModel",
            PreferenceKey::Temperature => "temperature",
            PreferenceKey::MaxTokens => "maxTokens",
            PreferenceKey::SidebarOpen => "sidebarOpen",
            PreferenceKey::Theme => "theme",
        }
    }

    /// The value returned before anything is set.
    pub fn default_value(self) -> Value {
        match self {
            PreferenceKey::SelectedProvider => json!(DEFAULT_PROVIDER),
            PreferenceKey::SelectedModel => json!(DEFAULT_MODEL),
            PreferenceKey::Temperature => json!(DEFAULT_TEMPERATURE),
            PreferenceKey::MaxTokens => json!(DEFAULT_MAX_TOKENS),
            PreferenceKey::SidebarOpen => json!(true),
            PreferenceKey::Theme => Value::from(Theme::Dark),
        }
    }

    fn validate(self, value: &Value) -> Result<()> {
        let ok = match self {
            PreferenceKey::SelectedProvider | PreferenceKey::SelectedModel => value.is_string(),
            PreferenceKey::Temperature => value.as_f64().is_some_and(|t| (0.0..=2.0).contains(&t)),
            PreferenceKey::MaxTokens => value.as_u64().is_some_and(|n| n > 0),
            PreferenceKey::SidebarOpen => value.is_boolean(),
            PreferenceKey::Theme => serde_json::from_value::<Theme>(value.clone()).is_ok(),
        };
        if ok {
            Ok(())
        } else {
            Err(Error::validation(
                format!("invalid value {value} for preference {self}"),
                Some(self.as_str().to_string()),
            ))
        }
    }
}

impl fmt::Display for PreferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PreferenceKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PreferenceKey::ALL
            .into_iter()
            .find(|key| key.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                Error::validation(
                    format!("unknown preference {s}"),
                    Some("key".to_string()),
                )
            })
    }
}

/// Color theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Dark theme.
    Dark,
    /// Light theme.
    Light,
}

impl Theme {
    /// The stored name.
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Dark => "dark",
            Theme::Light => "light",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Theme> for Value {
    fn from(theme: Theme) -> Self {
        Value::String(theme.as_str().to_string())
    }
}

struct Inner {
    values: Mutex<HashMap<PreferenceKey, Value>>,
    backend: Option<Arc<dyn PreferenceBackend>>,
}

/// The preference store.  Clones share state.
#[derive(Clone)]
pub struct PreferenceStore {
    inner: Arc<Inner>,
}

impl PreferenceStore {
    /// A store with no durable backing.
    pub fn in_memory() -> Self {
        Self::build(HashMap::new(), None)
    }

    /// A store that loads from and writes through to `backend`.
    ///
    /// Stored values that cannot be read or do not fit their key are logged and replaced by the
    /// default.
    pub fn with_backend(backend: Arc<dyn PreferenceBackend>) -> Self {
        let mut values = HashMap::new();
        for key in PreferenceKey::ALL {
            match backend.read(key.as_str()) {
                Ok(Some(value)) => match key.validate(&value) {
                    Ok(()) => {
                        values.insert(key, value);
                    }
                    Err(err) => {
                        tracing::warn!(%key, error = %err, "ignoring stored preference");
                    }
                },
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(%key, error = %err, "failed to read stored preference");
                }
            }
        }
        Self::build(values, Some(backend))
    }

    fn build(values: HashMap<PreferenceKey, Value>, backend: Option<Arc<dyn PreferenceBackend>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                values: Mutex::new(values),
                backend,
            }),
        }
    }

    /// The current value of `key`, or its default.
    pub fn get(&self, key: PreferenceKey) -> Value {
        let values = self.inner.values.lock().unwrap_or_else(|e| e.into_inner());
        values
            .get(&key)
            .cloned()
            .unwrap_or_else(|| key.default_value())
    }

    /// Set `key` to `value` and write it through.
    ///
    /// Fails only when the value does not fit the key.  A failed durable write is logged and
    /// the in-memory value stays in effect.
    pub fn set(&self, key: PreferenceKey, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        key.validate(&value)?;
        {
            let mut values = self.inner.values.lock().unwrap_or_else(|e| e.into_inner());
            values.insert(key, value.clone());
        }
        if let Some(backend) = &self.inner.backend {
            PREFERENCE_WRITES.click();
            if let Err(err) = backend.write(key.as_str(), &value) {
                PREFERENCE_WRITE_ERRORS.click();
                tracing::warn!(%key, error = %err, "failed to persist preference");
            }
        }
        Ok(())
    }

    /// True when writes reach durable storage.
    pub fn is_durable(&self) -> bool {
        self.inner.backend.is_some()
    }

    /// Provider and model to route turns to.
    pub fn model_selection(&self) -> ModelSelection {
        ModelSelection::new(
            self.string(PreferenceKey::SelectedProvider, DEFAULT_PROVIDER),
            self.string(PreferenceKey::SelectedModel, DEFAULT_MODEL),
        )
    }

    /// Change provider and model together.
    pub fn set_model_selection(&self, selection: &ModelSelection) -> Result<()> {
        self.set(PreferenceKey::SelectedProvider, selection.provider.as_str())?;
        self.set(PreferenceKey::SelectedModel, selection.model.as_str())
    }

    /// Sampling temperature.
    pub fn temperature(&self) -> f32 {
        self.get(PreferenceKey::Temperature)
            .as_f64()
            .unwrap_or(DEFAULT_TEMPERATURE) as f32
    }

    /// Response token limit.
    pub fn max_tokens(&self) -> u32 {
        self.get(PreferenceKey::MaxTokens)
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(DEFAULT_MAX_TOKENS as u32)
    }

    /// Sidebar visibility.
    pub fn sidebar_open(&self) -> bool {
        self.get(PreferenceKey::SidebarOpen).as_bool().unwrap_or(true)
    }

    /// Color theme.
    pub fn theme(&self) -> Theme {
        serde_json::from_value(self.get(PreferenceKey::Theme)).unwrap_or(Theme::Dark)
    }

    fn string(&self, key: PreferenceKey, default: &str) -> String {
        match self.get(key) {
            Value::String(s) => s,
            _ => default.to_string(),
        }
    }
}

impl Default for PreferenceStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl fmt::Debug for PreferenceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self.inner.values.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("PreferenceStore")
            .field("values", &*values)
            .field("durable", &self.inner.backend.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryPreferences;

    struct BrokenBackend;

    impl PreferenceBackend for BrokenBackend {
        fn read(&self, _: &str) -> Result<Option<Value>> {
            Err(Error::io(
                "disk on fire",
                std::io::Error::other("disk on fire"),
            ))
        }

        fn write(&self, _: &str, _: &Value) -> Result<()> {
            Err(Error::io(
                "disk on fire",
                std::io::Error::other("disk on fire"),
            ))
        }
    }

    #[test]
    fn defaults_before_set() {
        let prefs = PreferenceStore::in_memory();
        assert_eq!(prefs.get(PreferenceKey::Theme), json!("dark"));
        assert_eq!(prefs.theme(), Theme::Dark);
        assert_eq!(prefs.max_tokens(), 4096);
        assert!((prefs.temperature() - 0.7).abs() < f32::EPSILON);
        assert!(prefs.sidebar_open());
        assert_eq!(
            prefs.model_selection(),
            ModelSelection::new(DEFAULT_PROVIDER, DEFAULT_MODEL)
        );
        assert!(!prefs.is_durable());
    }

    #[test]
    fn set_then_get_in_process() {
        let prefs = PreferenceStore::in_memory();
        prefs.set(PreferenceKey::Theme, "light").unwrap();
        assert_eq!(prefs.get(PreferenceKey::Theme), json!("light"));
        assert_eq!(prefs.theme(), Theme::Light);
    }

    #[test]
    fn survives_restart_with_durable_storage() {
        let storage = MemoryPreferences::new();
        let prefs = PreferenceStore::with_backend(Arc::new(storage.clone()));
        prefs.set(PreferenceKey::Theme, "light").unwrap();
        prefs
            .set_model_selection(&ModelSelection::new("OpenAI", "gpt-4o"))
            .unwrap();
        drop(prefs);

        let restarted = PreferenceStore::with_backend(Arc::new(storage));
        assert_eq!(restarted.get(PreferenceKey::Theme), json!("light"));
        assert_eq!(
            restarted.model_selection(),
            ModelSelection::new("OpenAI", "gpt-4o")
        );
    }

    #[test]
    fn last_write_wins() {
        let storage = MemoryPreferences::new();
        let a = PreferenceStore::with_backend(Arc::new(storage.clone()));
        let b = PreferenceStore::with_backend(Arc::new(storage.clone()));
        a.set(PreferenceKey::MaxTokens, 1024).unwrap();
        b.set(PreferenceKey::MaxTokens, 2048).unwrap();
        assert_eq!(storage.read("maxTokens").unwrap(), Some(json!(2048)));
        // No cross-store coordination: `a` keeps what it wrote.
        assert_eq!(a.max_tokens(), 1024);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let prefs = PreferenceStore::in_memory();
        assert!(prefs.set(PreferenceKey::Theme, "sepia").unwrap_err().is_validation());
        assert!(prefs.set(PreferenceKey::MaxTokens, 0).is_err());
        assert!(prefs.set(PreferenceKey::Temperature, 3.5).is_err());
        assert!(prefs.set(PreferenceKey::SidebarOpen, "yes").is_err());
        assert_eq!(prefs.theme(), Theme::Dark);
    }

    #[test]
    fn bad_stored_values_fall_back_to_defaults() {
        let storage = MemoryPreferences::new();
        storage.write("theme", &json!(42)).unwrap();
        storage.write("sidebarOpen", &json!(false)).unwrap();
        let prefs = PreferenceStore::with_backend(Arc::new(storage));
        assert_eq!(prefs.theme(), Theme::Dark);
        assert!(!prefs.sidebar_open());
    }

    #[test]
    fn failing_backend_degrades_to_memory() {
        let prefs = PreferenceStore::with_backend(Arc::new(BrokenBackend));
        prefs.set(PreferenceKey::Theme, "light").unwrap();
        assert_eq!(prefs.theme(), Theme::Light);
    }

    #[test]
    fn keys_parse_from_storage_names() {
        assert_eq!(
            "maxTokens".parse::<PreferenceKey>().unwrap(),
            PreferenceKey::MaxTokens
        );
        assert_eq!(
            "THEME".parse::<PreferenceKey>().unwrap(),
            PreferenceKey::Theme
        );
        assert!("volume".parse::<PreferenceKey>().is_err());
    }
}
