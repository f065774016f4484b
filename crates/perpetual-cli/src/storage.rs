//! Single-slot session persistence and export/import
//!
//! The whole session lives in one JSON file under the platform data
//! directory. A missing or corrupt slot never blocks startup; it decays to
//! an empty default with a diagnostic. Export writes a backup document with
//! a metadata envelope; import validates the same shape before touching any
//! state.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use perpetual_core::{Error, Message, Result, SessionState};

/// Default backup file name for periodic and manual exports
pub const BACKUP_FILE_NAME: &str = "perpetual_chat_backup.json";

/// Handle to the single persisted session slot
pub struct Store {
    path: PathBuf,
}

/// Exported backup document: session state plus a metadata envelope
#[derive(Debug, Serialize, Deserialize)]
struct ExportDocument {
    meta: ExportMeta,
    api_key: String,
    messages: Vec<Message>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ExportMeta {
    model: String,
    created_at: String,
    system_prompt: String,
}

impl Store {
    /// Default slot path under the platform data directory
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("perpetual")
            .join("state.json")
    }

    /// Create a store backed by the given slot path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the session state, substituting an empty default when the slot
    /// is missing or unreadable.
    pub fn load(&self) -> SessionState {
        if !self.path.exists() {
            return SessionState::default();
        }

        match fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!("corrupt session slot, starting empty: {e}");
                    SessionState::default()
                }
            },
            Err(e) => {
                tracing::warn!("failed to read session slot, starting empty: {e}");
                SessionState::default()
            }
        }
    }

    /// Persist the session state. Failures are logged, not fatal.
    pub fn save(&self, state: &SessionState) {
        if let Err(e) = self.try_save(state) {
            tracing::warn!("failed to persist session state: {e}");
        }
    }

    fn try_save(&self, state: &SessionState) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&self.path, serde_json::to_string(state)?)?;
        Ok(())
    }

    /// Write a backup document for the session to `path`
    pub fn export(&self, state: &SessionState, model: &str, path: &Path) -> Result<()> {
        let document = ExportDocument {
            meta: ExportMeta {
                model: model.to_string(),
                created_at: chrono::Utc::now().to_rfc3339(),
                system_prompt: state.system_prompt.clone(),
            },
            api_key: state.api_key.clone(),
            messages: state.messages.clone(),
        };

        fs::write(path, serde_json::to_string_pretty(&document)?)?;
        Ok(())
    }

    /// Read a backup document and turn it into a fresh session state.
    ///
    /// Rejects documents without a credential or whose `messages` field is
    /// not a sequence; nothing is mutated on failure.
    pub fn import(&self, path: &Path) -> Result<SessionState> {
        let content = fs::read_to_string(path)?;
        let document: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| Error::ImportFormat(format!("not valid JSON: {e}")))?;

        let api_key = document
            .get("api_key")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::ImportFormat("missing api_key field".into()))?
            .to_string();

        let messages = document
            .get("messages")
            .filter(|v| v.is_array())
            .ok_or_else(|| Error::ImportFormat("messages field is not a sequence".into()))?;
        let messages: Vec<Message> = serde_json::from_value(messages.clone())
            .map_err(|e| Error::ImportFormat(format!("malformed messages: {e}")))?;

        let system_prompt = document
            .pointer("/meta/system_prompt")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(SessionState {
            api_key,
            system_prompt,
            messages,
            last_save_timestamp: chrono::Utc::now().timestamp_millis(),
        })
    }
}

/// Whether enough time has passed since the last periodic backup
pub fn should_trigger_periodic_save(now_ms: i64, hours: f64, last_save_ms: i64) -> bool {
    let period_ms = (hours * 3_600_000.0) as i64;
    now_ms - last_save_ms >= period_ms
}

/// Record that a periodic backup just happened and persist the state
pub fn mark_saved_now(store: &Store, state: &mut SessionState) {
    state.last_save_timestamp = chrono::Utc::now().timestamp_millis();
    store.save(state);
}
