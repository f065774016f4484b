//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Runtime parameters for perpetual
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Model identifier sent with every request
    pub model: String,
    /// Budget on non-system messages included in an outbound request
    pub max_messages_for_api: usize,
    /// Hours between automatic backup exports
    pub daily_save_period_hours: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            max_messages_for_api: 50,
            daily_save_period_hours: 24.0,
        }
    }
}

impl Params {
    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("PERPETUAL_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("perpetual")
            .join("config.toml")
    }

    /// Load parameters, substituting defaults when the file is missing or
    /// unreadable.
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    fn load_from(path: &PathBuf) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(params) => params,
                Err(e) => {
                    tracing::warn!("failed to parse config file, using defaults: {e}");
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("failed to read config file, using defaults: {e}");
                Self::default()
            }
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# perpetual configuration file
# Place at ~/.config/perpetual/config.toml (Linux/Mac)

# Model identifier sent with every request
model = "gpt-4o"

# At most this many non-system messages per request
max_messages_for_api = 50

# Hours between automatic backup exports
daily_save_period_hours = 24
"#
}
