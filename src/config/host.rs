// ABOUTME: Host configuration for SSH connections.
// ABOUTME: Parses formats like "host", "user@host", "host:port", "user@host:port".

use super::SecretValue;
use crate::error::{Error, Result};
use crate::ssh::SessionConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<SecretValue>,
    /// Private key file path or inline key text.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub passphrase: Option<SecretValue>,
    #[serde(default = "default_trust_first_connection")]
    pub trust_first_connection: bool,
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,
    #[serde(default, with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub command_timeout: Option<Duration>,
}

fn default_port() -> u16 {
    22
}

fn default_trust_first_connection() -> bool {
    true
}

impl HostConfig {
    /// Parse `[user@]host[:port]`. IPv6 addresses are written bare (`::1`) or,
    /// with a port, in brackets (`[::1]:2222`).
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("host address cannot be empty".to_string());
        }

        // Parse format: [user@]host[:port]
        let (user_part, rest) = if let Some(at_pos) = s.find('@') {
            (Some(&s[..at_pos]), &s[at_pos + 1..])
        } else {
            (None, s)
        };

        let (host, port) = split_host_port(rest)?;

        if host.is_empty() {
            return Err("hostname cannot be empty".to_string());
        }

        Ok(HostConfig {
            host: host.to_string(),
            port,
            user: user_part.filter(|u| !u.is_empty()).map(|u| u.to_string()),
            password: None,
            key: None,
            passphrase: None,
            trust_first_connection: true,
            known_hosts: None,
            connect_timeout: None,
            command_timeout: None,
        })
    }

    /// Build a session config, resolving secrets from the environment.
    ///
    /// Without a configured user, `$USER` is used, then `root`.
    pub fn session_config(&self) -> Result<SessionConfig> {
        if self.key.is_none() && self.passphrase.is_some() {
            return Err(Error::InvalidConfig(format!(
                "host {} sets a passphrase but no key",
                self.host
            )));
        }

        let user = self
            .user
            .clone()
            .unwrap_or_else(|| std::env::var("USER").unwrap_or_else(|_| "root".to_string()));

        let mut config = SessionConfig::new(&self.host, user)
            .port(self.port)
            .trust_on_first_use(self.trust_first_connection);

        if let Some(password) = &self.password {
            config = config.password(password.resolve()?);
        }
        if let Some(key) = &self.key {
            config = config.private_key(expand_home(key));
        }
        if let Some(passphrase) = &self.passphrase {
            config = config.passphrase(passphrase.resolve()?);
        }
        if let Some(path) = &self.known_hosts {
            config = config.known_hosts_path(path.clone());
        }
        if let Some(timeout) = self.connect_timeout {
            config = config.connect_timeout(timeout);
        }
        if let Some(timeout) = self.command_timeout {
            config = config.command_timeout(timeout);
        }

        Ok(config)
    }
}

/// Split `host[:port]`, handling bracketed and bare IPv6 addresses.
fn split_host_port(s: &str) -> std::result::Result<(&str, u16), String> {
    if let Some(bracketed) = s.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| format!("unclosed bracket in address: {}", s))?;
        return match after {
            "" => Ok((host, 22)),
            _ => match after.strip_prefix(':') {
                Some(port) => Ok((host, parse_port(port)?)),
                None => Err(format!("unexpected text after address: {}", after)),
            },
        };
    }

    match s.split_once(':') {
        None => Ok((s, 22)),
        // More than one colon: a bare IPv6 address without a port
        Some((_, rest)) if rest.contains(':') => Ok((s, 22)),
        Some((host, port)) => Ok((host, parse_port(port)?)),
    }
}

fn parse_port(s: &str) -> std::result::Result<u16, String> {
    s.parse::<u16>().map_err(|_| format!("invalid port: {}", s))
}

/// Expand a leading `~/` in key paths. Inline key text is returned unchanged.
fn expand_home(key: &str) -> String {
    match (key.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => key.to_string(),
    }
}
