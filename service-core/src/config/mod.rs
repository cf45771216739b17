use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Config {
    /// Load the shared settings from `.env`, an optional `configuration` file and
    /// `APP__*` variables. A bare `PORT` variable (as set by most container
    /// platforms) wins over everything else.
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let mut config: Config = config.try_deserialize()?;

        if let Ok(port) = env::var("PORT") {
            config.port = port.trim().parse().map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("PORT must be a port number: {}", e))
            })?;
        }

        Ok(config)
    }
}
