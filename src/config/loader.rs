//! Config file loading. Discovery goes through prefer; an explicit path is
//! parsed by extension.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::{Config, ConfigError};

/// Name prefer searches its standard locations for (`dirharvest.toml`, ...).
pub const CONFIG_NAME: &str = "dirharvest";

/// Options for loading configuration.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Skip environment overrides.
    pub ignore_env: bool,
}

fn parse(contents: &str, ext: &str) -> Result<Config, ConfigError> {
    match ext {
        "toml" => toml::from_str(contents).map_err(|e| ConfigError::Parse {
            format: "TOML",
            message: e.to_string(),
        }),
        "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
            format: "YAML",
            message: e.to_string(),
        }),
        _ => serde_json::from_str(contents).map_err(|e| ConfigError::Parse {
            format: "JSON",
            message: e.to_string(),
        }),
    }
}

impl Config {
    /// Load a config file, choosing the format by extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Read {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = parse(&contents, ext)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Find a config file with prefer's discovery.
    pub async fn discover() -> Option<PathBuf> {
        match prefer::load(CONFIG_NAME).await {
            Ok(found) => found.source_path().map(|p| p.to_path_buf()),
            Err(_) => None,
        }
    }

    /// Load from the explicit or discovered file (defaults when none),
    /// apply env overrides, and validate.
    pub async fn load(options: &LoadOptions) -> Result<Self, ConfigError> {
        let path = match options.config_path {
            Some(ref path) => Some(path.clone()),
            None => Self::discover().await,
        };

        let config = match path {
            Some(ref path) => {
                debug!("Loading config from {}", path.display());
                Self::load_from_path(path).await?
            }
            None => {
                debug!("No config file found, using defaults");
                Config::default()
            }
        };

        let config = if options.ignore_env {
            config
        } else {
            config.with_env_overrides()
        };
        config.validate()?;
        Ok(config)
    }
}
