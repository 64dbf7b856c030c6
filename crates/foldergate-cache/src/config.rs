use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FolderCacheConfig {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FolderCacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Cache validations
        if self.cache.global_ttl_secs == 0 {
            return Err("cache.global_ttl_secs must be > 0".into());
        }
        if self.cache.session_ttl_secs == 0 {
            return Err("cache.session_ttl_secs must be > 0".into());
        }
        if self.cache.session_capacity == 0 {
            return Err("cache.session_capacity must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// When disabled every read goes to the backends.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_global_ttl_secs")]
    pub global_ttl_secs: u64,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Maximum folders held per session.
    #[serde(default = "default_session_capacity")]
    pub session_capacity: usize,
}

fn default_true() -> bool {
    true
}
fn default_global_ttl_secs() -> u64 {
    3600
}
fn default_session_ttl_secs() -> u64 {
    300
}
fn default_session_capacity() -> usize {
    1000
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            global_ttl_secs: default_global_ttl_secs(),
            session_ttl_secs: default_session_ttl_secs(),
            session_capacity: default_session_capacity(),
        }
    }
}

impl CacheSettings {
    pub fn global_ttl(&self) -> Duration {
        Duration::from_secs(self.global_ttl_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    /// Fan batch reads out to one task per backend. When disabled backends
    /// are called one after another on the caller's task.
    #[serde(default = "default_true")]
    pub parallel: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            parallel: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::FolderCacheConfig;
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    pub const DEFAULT_CONFIG_FILE: &str = "foldergate.toml";

    pub fn load_config(path: Option<&str>) -> Result<FolderCacheConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., FOLDERGATE__CACHE__SESSION_CAPACITY=500
        builder = builder.add_source(
            Environment::with_prefix("FOLDERGATE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: FolderCacheConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_config_with_default_path<P: AsRef<Path>>(
        path: Option<P>,
    ) -> Result<FolderCacheConfig, String> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = FolderCacheConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.cache.enabled);
        assert!(cfg.fetch.parallel);
        assert_eq!(cfg.cache.session_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_validation_rejects_zero_capacity_and_bad_level() {
        let mut cfg = FolderCacheConfig::default();
        cfg.cache.session_capacity = 0;
        assert!(cfg.validate().unwrap_err().contains("session_capacity"));

        let mut cfg = FolderCacheConfig::default();
        cfg.logging.level = "loud".into();
        assert!(cfg.validate().unwrap_err().contains("logging.level"));
    }
}
