//! Persisted user settings: voice preferences, analytics consent, user id.
//!
//! Settings live in a single JSON key-value file in the platform data
//! directory. Keys mirror the storefront's local storage keys so the two
//! surfaces stay interchangeable. Missing or malformed files fall back to
//! defaults with a warning.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

/// Whether transcription/synthesis go through the backend (bool).
pub const KEY_USE_BACKEND: &str = "voice-use-backend";
/// Preferred synthesis voice id (string).
pub const KEY_VOICE_PREFERENCE: &str = "voice-preference";
/// Analytics consent record (`{ "consent": bool, "version": string }`).
pub const KEY_CONSENT: &str = "pravis-consent";
/// Stable anonymous user id (string).
pub const KEY_USER_ID: &str = "pravis_user_id";

const DEFAULT_VOICE: &str = "nova";

/// Platform data directory for Pravis Boutique.
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("pravis-boutique")
}

/// Path to the settings file inside the data directory.
pub fn settings_path() -> PathBuf {
    data_dir().join("voice_settings.json")
}

// ---------------------------------------------------------------------------
// Key-value store
// ---------------------------------------------------------------------------

/// JSON-file-backed key-value store with write-through semantics.
pub struct PreferenceStore {
    path: PathBuf,
    values: Mutex<serde_json::Map<String, Value>>,
}

impl PreferenceStore {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = read_json_file::<serde_json::Map<String, Value>>(&path).unwrap_or_default();
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    /// Open the store at the default settings path.
    pub fn open_default() -> Self {
        Self::open(settings_path())
    }

    /// Read a value by key.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values
            .lock()
            .ok()
            .and_then(|values| values.get(key).cloned())
    }

    /// Write a value and persist the whole store to disk.
    pub fn set(&self, key: &str, value: Value) {
        let Ok(mut values) = self.values.lock() else {
            warn!("Settings store lock poisoned, dropping write for {}", key);
            return;
        };
        values.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Failed to create {}: {}", parent.display(), e);
                return;
            }
        }
        match serde_json::to_string_pretty(&*values) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    warn!("Failed to write {}: {}", self.path.display(), e);
                }
            }
            Err(e) => warn!("Failed to serialize settings: {}", e),
        }
    }
}

// ---------------------------------------------------------------------------
// Typed settings
// ---------------------------------------------------------------------------

/// User-level voice preference, read once at session construction and
/// mutated only through explicit setters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoicePreference {
    /// Route transcription and synthesis through the backend instead of
    /// on-device capabilities.
    pub use_backend_transcription: bool,
    /// Synthesis voice id (e.g. "nova").
    pub synthesis_voice: String,
}

impl Default for VoicePreference {
    fn default() -> Self {
        Self {
            use_backend_transcription: false,
            synthesis_voice: DEFAULT_VOICE.to_string(),
        }
    }
}

impl VoicePreference {
    /// Load the preference from the store, falling back to defaults.
    pub fn load(store: &PreferenceStore) -> Self {
        let use_backend = store
            .get(KEY_USE_BACKEND)
            .and_then(|v| as_bool(&v))
            .unwrap_or(false);
        let voice = store
            .get(KEY_VOICE_PREFERENCE)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| DEFAULT_VOICE.to_string());
        Self {
            use_backend_transcription: use_backend,
            synthesis_voice: voice,
        }
    }

    /// Persist the preference to the store.
    pub fn save(&self, store: &PreferenceStore) {
        store.set(KEY_USE_BACKEND, Value::Bool(self.use_backend_transcription));
        store.set(
            KEY_VOICE_PREFERENCE,
            Value::String(self.synthesis_voice.clone()),
        );
    }
}

/// Analytics consent record. Consent defaults to withheld.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsentRecord {
    #[serde(default)]
    pub consent: bool,
    #[serde(default)]
    pub version: String,
}

/// Load the consent record, defaulting to no consent.
pub fn load_consent(store: &PreferenceStore) -> ConsentRecord {
    store
        .get(KEY_CONSENT)
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

/// Persist the consent record.
pub fn save_consent(store: &PreferenceStore, record: &ConsentRecord) {
    match serde_json::to_value(record) {
        Ok(value) => store.set(KEY_CONSENT, value),
        Err(e) => warn!("Failed to serialize consent record: {}", e),
    }
}

/// Get the stable anonymous user id, creating and persisting one if absent.
pub fn user_id(store: &PreferenceStore) -> String {
    if let Some(existing) = store
        .get(KEY_USER_ID)
        .and_then(|v| v.as_str().map(str::to_string))
    {
        return existing;
    }
    let id = format!("user_{}", Uuid::new_v4().simple());
    store.set(KEY_USER_ID, Value::String(id.clone()));
    id
}

/// The storefront historically stored booleans as "true"/"false" strings;
/// accept both encodings.
fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Generic helper: read a JSON file and deserialize it.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (PreferenceStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("pravis-voice-test-{}", Uuid::new_v4()));
        let path = dir.join("voice_settings.json");
        (PreferenceStore::open(&path), dir)
    }

    #[test]
    fn missing_file_yields_defaults() {
        let (store, dir) = temp_store();
        let pref = VoicePreference::load(&store);
        assert!(!pref.use_backend_transcription);
        assert_eq!(pref.synthesis_voice, "nova");
        assert!(!load_consent(&store).consent);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn preference_round_trip() {
        let (store, dir) = temp_store();
        let pref = VoicePreference {
            use_backend_transcription: true,
            synthesis_voice: "alloy".into(),
        };
        pref.save(&store);

        // Re-open from disk to prove persistence, not just the in-memory map.
        let reopened = PreferenceStore::open(store.path.clone());
        assert_eq!(VoicePreference::load(&reopened), pref);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn legacy_string_booleans_accepted() {
        let (store, dir) = temp_store();
        store.set(KEY_USE_BACKEND, Value::String("true".into()));
        assert!(VoicePreference::load(&store).use_backend_transcription);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn consent_round_trip() {
        let (store, dir) = temp_store();
        let record = ConsentRecord {
            consent: true,
            version: "1.0".into(),
        };
        save_consent(&store, &record);
        assert_eq!(load_consent(&store), record);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn user_id_is_stable_once_created() {
        let (store, dir) = temp_store();
        let first = user_id(&store);
        assert!(first.starts_with("user_"));
        assert_eq!(user_id(&store), first);
        let _ = std::fs::remove_dir_all(dir);
    }
}
