pub mod app;

pub use app::{
    parse_config, strip_jsonc_comments, validate_config, AppConfig, BinPath, CacheConfig,
    CacheType, FlagKeywords, SurfboardConfig, SurgeConfig, CACHE_MAXAGE_ENV,
};

use std::path::Path;
use thiserror::Error;

use crate::provider::ConstructionError;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Provider '{0}' is not defined")]
    UnknownProvider(String),

    #[error("Provider '{name}': {source}")]
    Provider {
        name: String,
        #[source]
        source: ConstructionError,
    },
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure functions
// ============================================================================

/// Load, validate and apply process environment overrides
pub fn load_config_file(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut config = AppConfig::from_str(&content)?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
}
