//! Session configuration, persisted as TOML.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::agenda::AgendaOrder;
use crate::error::{ConfigError, ConfigResult};

/// Tunables of a [`Session`](crate::session::Session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Conflict-resolution order of the agenda.
    #[serde(default)]
    pub agenda_order: AgendaOrder,
    /// Re-queue an already-fired activation when the facts it binds are updated.
    #[serde(default = "default_requeue_on_modify")]
    pub requeue_on_modify: bool,
    /// Upper bound on activations fired by one `fire()` call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_firings: Option<usize>,
    /// Check a whole batch for identity errors before applying any of it.
    #[serde(default = "default_validate_batches")]
    pub validate_batches: bool,
}

fn default_requeue_on_modify() -> bool {
    true
}

fn default_validate_batches() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            agenda_order: AgendaOrder::default(),
            requeue_on_modify: default_requeue_on_modify(),
            max_firings: None,
            validate_batches: default_validate_batches(),
        }
    }
}

impl SessionConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config = Self::parse(&content).map_err(|message| ConfigError::Parse {
            path: path.display().to_string(),
            message,
        })?;
        tracing::info!(
            path = %path.display(),
            agenda_order = %config.agenda_order,
            "loaded session config"
        );
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Save to a TOML file, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.agenda_order, AgendaOrder::Fifo);
        assert!(config.requeue_on_modify);
        assert!(config.validate_batches);
        assert_eq!(config.max_firings, None);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = SessionConfig::parse("agenda_order = \"salience\"\nmax_firings = 50\n").unwrap();
        assert_eq!(config.agenda_order, AgendaOrder::Salience);
        assert_eq!(config.max_firings, Some(50));
        assert!(config.requeue_on_modify);
    }

    #[test]
    fn unknown_order_is_rejected() {
        assert!(SessionConfig::parse("agenda_order = \"random\"").is_err());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("session.toml");
        let config = SessionConfig {
            agenda_order: AgendaOrder::Lifo,
            requeue_on_modify: false,
            max_firings: Some(10),
            validate_batches: false,
        };
        config.save(&path).unwrap();
        assert_eq!(SessionConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = SessionConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
