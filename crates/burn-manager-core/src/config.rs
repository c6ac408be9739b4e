use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::Path;

use crate::model::HashType;

/// 25 GB single-layer Blu-ray.
pub const DEFAULT_VOLUME_CAPACITY: u64 = 25_025_314_816;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub root_paths: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub volume_capacity: u64,
    pub cluster_size: u64,
    pub checksum_batch_size: usize,
    pub hash_type: HashType,
    pub snapshot_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root_paths: Vec::new(),
            ignore_patterns: Vec::new(),
            volume_capacity: DEFAULT_VOLUME_CAPACITY,
            cluster_size: 1,
            checksum_batch_size: 50,
            hash_type: HashType::Blake3,
            snapshot_path: "library.burnmanager".to_string(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.volume_capacity == 0 {
            return Err(ConfigError::Message("volume_capacity must be positive".into()));
        }
        if self.cluster_size == 0 {
            return Err(ConfigError::Message("cluster_size must be positive".into()));
        }
        if self.checksum_batch_size == 0 {
            return Err(ConfigError::Message("checksum_batch_size must be positive".into()));
        }
        if self.hash_type == HashType::None {
            return Err(ConfigError::Message("hash_type must name an algorithm".into()));
        }
        Ok(())
    }
}

/// Reads `Config.{toml,json,yaml,...}` from the working directory if present,
/// then `BURN_*` environment variables. List values in the environment are
/// comma separated.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let settings = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(
            Environment::with_prefix("BURN")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("root_paths")
                .with_list_parse_key("ignore_patterns"),
        )
        .build()?;
    let config: AppConfig = settings.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

/// Drops every directory nested under another entry, keeping input order.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut kept: Vec<String> = Vec::new();
    for dir in dirs {
        let path = Path::new(&dir);
        if kept.iter().any(|k| path.starts_with(k)) {
            continue;
        }
        kept.retain(|k| !Path::new(k).starts_with(path));
        kept.push(dir);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.volume_capacity, DEFAULT_VOLUME_CAPACITY);
        assert_eq!(config.hash_type, HashType::Blake3);
    }

    #[test]
    fn test_zero_values_rejected() {
        let mut config = AppConfig::default();
        config.cluster_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.volume_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.checksum_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_source_fills_defaults() {
        let config: AppConfig = Config::builder()
            .set_override("cluster_size", 2048)
            .unwrap()
            .set_override("hash_type", "xxHash64")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.cluster_size, 2048);
        assert_eq!(config.hash_type, HashType::XxHash64);
        assert_eq!(config.checksum_batch_size, 50);
        assert!(config.root_paths.is_empty());
    }

    #[test]
    fn test_non_overlapping_keeps_disjoint_roots() {
        let dirs = vec![
            "/media/music".to_string(),
            "/media/photos".to_string(),
            "/srv/archive".to_string(),
        ];
        assert_eq!(non_overlapping_directories(dirs.clone()), dirs);
    }

    #[test]
    fn test_non_overlapping_drops_nested() {
        let dirs = vec![
            "/media/music/live".to_string(),
            "/media/music/studio".to_string(),
            "/srv/archive".to_string(),
            "/media/music".to_string(),
            "/srv/archive/2019".to_string(),
        ];
        assert_eq!(
            non_overlapping_directories(dirs),
            vec!["/srv/archive".to_string(), "/media/music".to_string()]
        );
    }
}
