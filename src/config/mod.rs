// ABOUTME: Configuration types and parsing for fastssh.yml.
// ABOUTME: Named host profiles with credentials resolved from literals or env vars.

mod deserialize;
mod host;
mod init;
mod secret;

pub use host::HostConfig;
pub use init::init_config;
pub use secret::SecretValue;

use crate::error::{Error, Result};
use deserialize::deserialize_hosts;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

pub const CONFIG_FILENAME: &str = "fastssh.yml";
pub const CONFIG_FILENAME_ALT: &str = "fastssh.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".fastssh/config.yml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default, deserialize_with = "deserialize_hosts")]
    pub hosts: HashMap<String, HostConfig>,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                tracing::debug!("loading config from {}", path.display());
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    pub fn host(&self, name: &str) -> Result<&HostConfig> {
        self.hosts
            .get(name)
            .ok_or_else(|| Error::UnknownHost(name.to_string()))
    }

    /// Resolve a target: a configured host name, else a `[user@]host[:port]` address.
    pub fn resolve_target(&self, target: &str) -> Result<HostConfig> {
        if let Some(host) = self.hosts.get(target) {
            return Ok(host.clone());
        }
        HostConfig::parse(target).map_err(Error::InvalidConfig)
    }
}
