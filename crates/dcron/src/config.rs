use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_PORT: u16 = 7777;

/// Service configuration, loaded from `conf/config.toml` in the working
/// directory (path overridable on the command line). A missing file means
/// defaults: single-node mode with data stored next to the process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application name; namespaces the store buckets and the data directory.
    pub name: String,

    /// HTTP port, also the port peers are assumed to serve on.
    pub port: u16,

    /// Data directory root; "" means the process working directory.
    pub storage: String,

    /// Coordination store endpoints; empty disables replication and turns
    /// the service into a purely local scheduler.
    pub store_endpoints: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "dcron".to_string(),
            port: DEFAULT_PORT,
            storage: String::new(),
            store_endpoints: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// `<storage>/<name>-data`, the home of the catalog's append-only logs.
    pub fn data_dir(&self) -> std::io::Result<PathBuf> {
        let root = if self.storage.is_empty() {
            std::env::current_dir()?
        } else {
            PathBuf::from(&self.storage)
        };
        Ok(root.join(format!("{}-data", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Path::new("/definitely/not/here.toml")).unwrap();
        assert_eq!(config.name, "dcron");
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.store_endpoints.is_empty());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "name = \"myapp\"\nport = 9000\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.name, "myapp");
        assert_eq!(config.port, 9000);
        assert_eq!(config.storage, "");
        assert!(config.store_endpoints.is_empty());
    }

    #[test]
    fn endpoints_parse_as_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "store_endpoints = [\"127.0.0.1:4222\", \"127.0.0.1:4223\"]\n")
            .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.store_endpoints.len(), 2);
    }

    #[test]
    fn data_dir_uses_storage_root_when_set() {
        let config = Config {
            storage: "/var/lib/cron".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.data_dir().unwrap(),
            PathBuf::from("/var/lib/cron/dcron-data")
        );
    }
}
