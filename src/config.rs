//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::metadata::{ResolverOptions, DEFAULT_CACHE_CAPACITY};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub schema: SchemaConfig,

    #[serde(default)]
    pub metadata: MetadataConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Schema namespace configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaConfig {
    #[serde(default = "default_root_name")]
    pub root_name: String,

    /// JSON snapshot loaded at startup, if any
    pub snapshot_path: Option<PathBuf>,
}

fn default_root_name() -> String {
    crate::schema::DEFAULT_ROOT.to_string()
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            root_name: default_root_name(),
            snapshot_path: None,
        }
    }
}

/// Chunk metadata resolver configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    pub partition_start_offset: Option<u64>,

    pub partition_end_offset: Option<u64>,
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            partition_start_offset: None,
            partition_end_offset: None,
        }
    }
}

impl MetadataConfig {
    /// Resolver options; the partition bounds are validated when the resolver is built
    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            cache_capacity: self.cache_capacity,
            partition_start: self.partition_start_offset,
            partition_end: self.partition_end_offset,
        }
    }
}

/// Query execution configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    /// Load chunk metadata of every queried series before building readers
    #[serde(default = "default_prefetch")]
    pub prefetch: bool,

    /// Default maximum rows printed by the CLI
    #[serde(default = "default_row_limit")]
    pub row_limit: usize,
}

fn default_prefetch() -> bool {
    true
}

fn default_row_limit() -> usize {
    1000
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            prefetch: default_prefetch(),
            row_limit: default_row_limit(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("seriesdb").join("config.toml")),
            Some(PathBuf::from("/etc/seriesdb/config.toml")),
            Some(PathBuf::from("./seriesdb.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Schema overrides
        if let Some(root_name) = lookup("SERIESDB_ROOT_NAME") {
            self.schema.root_name = root_name;
        }
        if let Some(snapshot) = lookup("SERIESDB_SCHEMA_SNAPSHOT") {
            self.schema.snapshot_path = Some(PathBuf::from(snapshot));
        }

        // Metadata overrides
        if let Some(capacity) = lookup("SERIESDB_CACHE_CAPACITY") {
            match capacity.parse() {
                Ok(c) => self.metadata.cache_capacity = c,
                Err(_) => tracing::warn!("Ignoring invalid SERIESDB_CACHE_CAPACITY: {}", capacity),
            }
        }

        // Logging overrides
        if let Some(level) = lookup("SERIESDB_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("SERIESDB_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# SeriesDB Configuration
#
# Environment variables override these settings:
# - SERIESDB_ROOT_NAME
# - SERIESDB_SCHEMA_SNAPSHOT
# - SERIESDB_CACHE_CAPACITY
# - SERIESDB_LOG_LEVEL
# - SERIESDB_LOG_FORMAT

[schema]
# Name of the namespace root segment
root_name = "root"

# Optional JSON snapshot of storage groups and measurements
# snapshot_path = "~/.local/share/seriesdb/schema.json"

[metadata]
# Maximum number of series paths whose chunk descriptors are cached.
# Also bounds how many descriptors a single prefetch collects.
cache_capacity = 100000

# Restrict reads to chunk groups whose midpoint lies in (start, end].
# Both offsets must be given together.
# partition_start_offset = 0
# partition_end_offset = 1048576

[query]
# Load chunk metadata of every series in an expression in one pass
prefetch = true

# Maximum rows printed by `seriesdb query`
row_limit = 1000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/seriesdb/seriesdb.log"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_template_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.schema.root_name, "root");
        assert_eq!(config.metadata.cache_capacity, DEFAULT_CACHE_CAPACITY);
        assert!(config.query.prefetch);
        assert_eq!(config.query.row_limit, 1000);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[metadata]\ncache_capacity = 16\npartition_start_offset = 0\npartition_end_offset = 512\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.schema.root_name, "root");
        assert_eq!(
            config.metadata.resolver_options(),
            ResolverOptions::default().cache_capacity(16).partition(0, 512)
        );
    }

    #[test]
    fn test_load_errors() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(Config::load(&missing), Err(ConfigError::Io { .. })));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[metadata]\ncache_capacity = \"many\"\n").unwrap();
        assert!(matches!(Config::load(&bad), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SERIESDB_ROOT_NAME", "top"),
            ("SERIESDB_SCHEMA_SNAPSHOT", "/tmp/schema.json"),
            ("SERIESDB_CACHE_CAPACITY", "not-a-number"),
            ("SERIESDB_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.schema.root_name, "top");
        assert_eq!(
            config.schema.snapshot_path,
            Some(PathBuf::from("/tmp/schema.json"))
        );
        assert_eq!(config.metadata.cache_capacity, DEFAULT_CACHE_CAPACITY);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }
}
