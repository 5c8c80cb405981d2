// EngineConfig - tunables of a CommandEngine, loadable from RON

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RON parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("RON error: {0}")]
    Serialize(#[from] ron::Error),
}

/// Engine settings
///
/// ```text
/// (
///     strict_enqueue_during_revert: false,
///     max_history: 200,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Raise `EnqueueDuringRevert` when a revert body submits a command.
    /// When false the submission is silently dropped.
    pub strict_enqueue_during_revert: bool,

    /// Initial state of the notification switch
    pub notifications_enabled: bool,

    /// Maximum commands kept in a session's root queue (0 = unlimited)
    pub max_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strict_enqueue_during_revert: true,
            notifications_enabled: true,
            max_history: 0,
        }
    }
}

impl EngineConfig {
    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron_str(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_ron_string()?)?;
        Ok(())
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    pub fn lenient(mut self) -> Self {
        self.strict_enqueue_during_revert = false;
        self
    }
}
