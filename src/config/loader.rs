use std::path::Path;
use tracing::{debug, info};

use super::AppConfig;
use crate::error::Result;

impl AppConfig {
    /// Load configuration from a TOML file, or defaults when no path is given
    ///
    /// Missing sections and fields fall back to their defaults. The result is
    /// validated before it is returned.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = tokio::fs::read_to_string(path).await?;
                let config = Self::from_toml(&raw)?;
                info!("Loaded configuration from {}", path.display());
                config
            }
            None => {
                debug!("No configuration file given, using defaults");
                Self::default()
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without validating it
    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}
