//! Copy engine configuration.
//!
//! ```toml
//! buffer_size = 65536
//! workers = 1
//! status_retention = "consume_on_read"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{VfsError, VfsResult};

/// Default streaming buffer size (4 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 4 * 1024;

/// What happens to a finished copy's status once a caller has seen it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusRetention {
    /// Keep terminal statuses until `clear_status` or close.
    #[default]
    Retain,
    /// Drop a terminal status the first time it is observed; later queries
    /// fail with `NoSuchCopy`.
    ConsumeOnRead,
}

/// Settings for a filesystem's copy engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bytes moved per read/write; also the cancellation granularity.
    pub buffer_size: usize,
    /// Worker tasks. One gives strict FIFO execution.
    pub workers: usize,
    pub status_retention: StatusRetention,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            workers: 1,
            status_retention: StatusRetention::Retain,
        }
    }
}

impl EngineConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the streaming buffer size.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Set the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the status retention policy.
    pub fn with_status_retention(mut self, retention: StatusRetention) -> Self {
        self.status_retention = retention;
        self
    }

    /// Clamp zero values up to their minimum.
    pub fn validated(mut self) -> Self {
        self.buffer_size = self.buffer_size.max(1);
        self.workers = self.workers.max(1);
        self
    }

    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> VfsResult<Self> {
        toml::from_str::<Self>(s)
            .map(Self::validated)
            .map_err(|e| VfsError::other(format!("invalid engine config: {e}")))
    }

    /// Load a TOML file.
    pub fn load(path: impl AsRef<Path>) -> VfsResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| VfsError::from_io(e, path.display()))?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.workers, 1);
        assert_eq!(config.status_retention, StatusRetention::Retain);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str("workers = 3").unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn test_retention_parses_snake_case() {
        let config = EngineConfig::from_toml_str(
            r#"
            buffer_size = 65536
            status_retention = "consume_on_read"
            "#,
        )
        .unwrap();
        assert_eq!(config.buffer_size, 65536);
        assert_eq!(config.status_retention, StatusRetention::ConsumeOnRead);
    }

    #[test]
    fn test_zero_values_are_clamped() {
        let config = EngineConfig::from_toml_str("buffer_size = 0\nworkers = 0").unwrap();
        assert_eq!(config.buffer_size, 1);
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn test_malformed_toml_is_rejected() {
        let err = EngineConfig::from_toml_str("workers = \"many\"").unwrap_err();
        assert!(matches!(err, VfsError::Other(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "buffer_size = 8192").unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap().buffer_size, 8192);

        let missing = EngineConfig::load(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, VfsError::NoSuchPath(_)));
    }
}
