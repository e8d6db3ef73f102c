// ABOUTME: SSH session management using russh.
// ABOUTME: Handles connection, host key policy, authentication, and disconnect.

use super::auth::{self, Credential};
use super::error::{Error, Result};
use russh::Disconnect;
use russh::client::{self, Config, Handle};
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::ssh_key;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Idle time after which a keepalive is sent to the server.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Unanswered keepalives tolerated before the connection is dropped.
const KEEPALIVE_MAX: usize = 3;

/// Configuration for establishing an SSH session.
#[derive(Clone)]
pub struct SessionConfig {
    /// Remote host to connect to.
    pub host: String,
    /// SSH port (default: 22).
    pub port: u16,
    /// Username for authentication.
    pub user: String,
    /// Password, or the key passphrase when a key is given without one.
    pub password: Option<String>,
    /// Private key as a file path or inline key text.
    pub private_key: Option<String>,
    /// Passphrase for an encrypted private key.
    pub passphrase: Option<String>,
    /// Whether to accept and remember unknown hosts (Trust On First Use).
    ///
    /// Enabled by default. Any host presenting an unseen key is trusted, so this
    /// offers no protection against an attacker on the first connection. A key
    /// that differs from the recorded one is always rejected.
    pub trust_on_first_use: bool,
    /// Optional path to known_hosts file.
    /// If None, uses the default ~/.ssh/known_hosts.
    pub known_hosts_path: Option<PathBuf>,
    /// Timeout for connecting and authenticating (default: 30 seconds).
    pub connect_timeout: Duration,
    /// Default timeout applied to `exec` when the call sets none.
    pub command_timeout: Option<Duration>,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            password: None,
            private_key: None,
            passphrase: None,
            trust_on_first_use: true,
            known_hosts_path: None,
            connect_timeout: Duration::from_secs(30),
            command_timeout: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn private_key(mut self, material: impl Into<String>) -> Self {
        self.private_key = Some(material.into());
        self
    }

    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn trust_on_first_use(mut self, tofu: bool) -> Self {
        self.trust_on_first_use = tofu;
        self
    }

    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Credential to authenticate with. Key material takes precedence over the password.
    pub fn credential(&self) -> Option<Credential> {
        if let Some(material) = &self.private_key {
            return Some(Credential::PrivateKey {
                material: material.clone(),
                passphrase: self.passphrase.clone().or_else(|| self.password.clone()),
            });
        }
        self.password.clone().map(Credential::Password)
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("credential", &self.credential())
            .field("trust_on_first_use", &self.trust_on_first_use)
            .field("known_hosts_path", &self.known_hosts_path)
            .field("connect_timeout", &self.connect_timeout)
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

/// SSH client handler for russh.
pub(crate) struct SshHandler {
    host: String,
    port: u16,
    trust_on_first_use: bool,
    known_hosts_path: Option<PathBuf>,
}

impl SshHandler {
    fn new(
        host: String,
        port: u16,
        trust_on_first_use: bool,
        known_hosts_path: Option<PathBuf>,
    ) -> Self {
        Self {
            host,
            port,
            trust_on_first_use,
            known_hosts_path,
        }
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let check_result = match &self.known_hosts_path {
            Some(path) => check_known_hosts_path(&self.host, self.port, server_public_key, path),
            None => check_known_hosts(&self.host, self.port, server_public_key),
        };

        match check_result {
            Ok(true) => Ok(true),
            Ok(false) => {
                if !self.trust_on_first_use {
                    return Ok(false);
                }
                tracing::warn!(
                    "Trust-On-First-Use: accepting unknown host key for {}:{}",
                    self.host,
                    self.port
                );
                let learn_result = match &self.known_hosts_path {
                    Some(path) => {
                        learn_known_hosts_path(&self.host, self.port, server_public_key, path)
                    }
                    None => learn_known_hosts(&self.host, self.port, server_public_key),
                };
                if let Err(e) = learn_result {
                    tracing::warn!("Failed to save host key to known_hosts: {}", e);
                }
                Ok(true)
            }
            Err(russh::keys::Error::KeyChanged { line }) => {
                tracing::error!(
                    "host key for {}:{} does not match known_hosts line {}",
                    self.host,
                    self.port,
                    line
                );
                Ok(false)
            }
            // Unreadable known_hosts: treat as unknown host
            Err(_) => Ok(self.trust_on_first_use),
        }
    }
}

/// An authenticated SSH session.
///
/// All operations on one session are expected to run from a single caller
/// context. Commands and transfers each open their own channel, but the session
/// offers no ordering guarantees between concurrent callers.
///
/// Dropping the session drops the connection handle, which ends the connection.
/// Use [`Session::close`] for a graceful disconnect.
pub struct Session {
    config: SessionConfig,
    handle: Handle<SshHandler>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("handle", &"<russh::Handle>")
            .finish()
    }
}

impl Session {
    /// Connect and authenticate to the remote host.
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        let timeout = config.connect_timeout;
        match tokio::time::timeout(timeout, Self::connect_inner(config)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Connection(format!(
                "timed out after {:?} while connecting",
                timeout
            ))),
        }
    }

    async fn connect_inner(config: SessionConfig) -> Result<Self> {
        // Resolve credentials before touching the network
        let credential = config.credential();
        let auth_method = auth::resolve_auth_method(credential.as_ref()).await?;

        // Silent commands must not end the connection; dead peers are caught by
        // unanswered keepalives instead.
        let russh_config = Config {
            inactivity_timeout: None,
            keepalive_interval: Some(KEEPALIVE_INTERVAL),
            keepalive_max: KEEPALIVE_MAX,
            ..Default::default()
        };

        let handler = SshHandler::new(
            config.host.clone(),
            config.port,
            config.trust_on_first_use,
            config.known_hosts_path.clone(),
        );

        tracing::debug!("connecting to {}:{}", config.host, config.port);
        let mut session = client::connect(
            Arc::new(russh_config),
            (config.host.as_str(), config.port),
            handler,
        )
        .await
        .map_err(|e| {
            if e.to_string().contains("Connection refused") {
                Error::Connection(format!(
                    "connection refused to {}:{}",
                    config.host, config.port
                ))
            } else {
                Error::Connection(e.to_string())
            }
        })?;

        let auth_success = auth::authenticate(&mut session, &config.user, auth_method).await?;
        if !auth_success {
            return Err(Error::AuthenticationFailed {
                user: config.user.clone(),
            });
        }

        tracing::info!("connected to {}@{}:{}", config.user, config.host, config.port);

        Ok(Self {
            config,
            handle: session,
        })
    }

    /// Connect and immediately disconnect, reporting only whether it worked.
    pub async fn is_valid_connection(config: SessionConfig) -> bool {
        match Self::connect(config).await {
            Ok(session) => {
                if let Err(e) = session.close().await {
                    tracing::debug!("disconnect after connection check failed: {}", e);
                }
                true
            }
            Err(e) => {
                tracing::debug!("connection check failed: {}", e);
                false
            }
        }
    }

    /// Configuration this session was created with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub(crate) fn handle(&self) -> &Handle<SshHandler> {
        &self.handle
    }

    /// Disconnect the session.
    pub async fn close(self) -> Result<()> {
        tracing::debug!("disconnecting from {}", self.config.host);
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(Error::Protocol)?;
        Ok(())
    }
}
