//! Process-level settings
//!
//! Environment-driven settings for the server process. These are distinct
//! from the declarative workflow document: they say where the process
//! listens and which document to load, never what the workflows do.

use serde::Deserialize;
use thiserror::Error;

/// Settings load error
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Underlying configuration error
    #[error("settings error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Server process settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Default listen address for an auto-provisioned HTTP server module
    pub listen: String,

    /// Path of the workflow document loaded at startup
    pub config_path: String,
}

impl ServerSettings {
    /// Load settings from the environment (`CONDUCTOR_*` variables),
    /// reading a `.env` file first when present.
    pub fn load() -> Result<Self, SettingsError> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .set_default("listen", "0.0.0.0:8080")?
            .set_default("config_path", "workflow.yaml")?
            .add_source(config::Environment::with_prefix("CONDUCTOR"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ServerSettings::load().unwrap();
        assert!(!settings.listen.is_empty());
        assert!(!settings.config_path.is_empty());
    }
}
