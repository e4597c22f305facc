use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::model::Provider;

#[derive(Deserialize, Default, Debug, Clone)]
pub struct Config {
    /// Root the model paths are resolved against. Defaults to the cwd.
    pub workdir: Option<PathBuf>,
    pub shufflenet_url: Option<String>,
    pub shufflenet_sha256: Option<String>,
    pub provider: Option<Provider>,
    pub iterations: Option<usize>,
}

impl Config {
    pub fn workdir(&self) -> std::io::Result<PathBuf> {
        match &self.workdir {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir(),
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider.unwrap_or_default()
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ortperf").join("config.toml"))
}

pub fn load_config() -> Result<Config> {
    let Some(config_path) = config_path() else {
        return Ok(Config::default());
    };
    load_config_from(&config_path)
}

pub fn load_config_from(config_path: &Path) -> Result<Config> {
    if !config_path.exists() {
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(config_path)?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}
