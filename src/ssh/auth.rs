// ABOUTME: Credential resolution and authentication for SSH sessions.
// ABOUTME: Loads private keys from a file path or inline text, falling back to agent and default keys.

use super::client::SshHandler;
use super::error::{Error, Result};
use russh::client::Handle;
use russh::keys::agent::client::AgentClient;
use russh::keys::{PrivateKeyWithHashAlg, decode_secret_key, load_secret_key, ssh_key};
use std::path::Path;
use std::sync::Arc;
use tokio::net::UnixStream;

/// Credentials supplied by the caller.
#[derive(Clone)]
pub enum Credential {
    /// Plain username/password authentication.
    Password(String),
    /// Private key given as a file path or as the key text itself.
    PrivateKey {
        material: String,
        passphrase: Option<String>,
    },
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(<redacted>)"),
            Credential::PrivateKey { passphrase, .. } => f
                .debug_struct("PrivateKey")
                .field("material", &"<redacted>")
                .field("encrypted", &passphrase.is_some())
                .finish(),
        }
    }
}

/// Authentication method resolved from credentials.
pub(crate) enum AuthMethod {
    Password(String),
    Agent(AgentClient<UnixStream>),
    KeyFile(Arc<ssh_key::PrivateKey>),
}

/// Parse private key material.
///
/// If `material` names an existing file the key is loaded from it, otherwise the
/// trimmed text is decoded as an inline key. The two stages report distinct
/// errors so a broken key file never hides behind an inline decoding failure.
pub fn load_private_key(material: &str, passphrase: Option<&str>) -> Result<ssh_key::PrivateKey> {
    let trimmed = material.trim();
    let path = Path::new(trimmed);

    if !trimmed.contains('\n') && path.is_file() {
        tracing::debug!("loading private key from {}", path.display());
        return load_secret_key(path, passphrase).map_err(|e| {
            if is_passphrase_error(&e, passphrase.is_some()) {
                Error::PassphraseRequired
            } else {
                Error::KeyLoadFailed {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }
            }
        });
    }

    tracing::debug!("decoding inline private key");
    decode_secret_key(trimmed, passphrase).map_err(|e| {
        if is_passphrase_error(&e, passphrase.is_some()) {
            Error::PassphraseRequired
        } else {
            Error::KeyDecodeFailed(e.to_string())
        }
    })
}

/// Whether a key error means the key is encrypted and the passphrase is missing or wrong.
fn is_passphrase_error(err: &russh::keys::Error, passphrase_supplied: bool) -> bool {
    match err {
        russh::keys::Error::KeyIsEncrypted => true,
        // A wrong passphrase decrypts to garbage: OpenSSH keys fail their check
        // integers, PEM keys fail unpadding.
        russh::keys::Error::SshKey(ssh_key::Error::Crypto) | russh::keys::Error::Unpad(_) => {
            passphrase_supplied
        }
        _ => false,
    }
}

/// Resolve which authentication method to use.
pub(crate) async fn resolve_auth_method(credential: Option<&Credential>) -> Result<AuthMethod> {
    match credential {
        Some(Credential::PrivateKey {
            material,
            passphrase,
        }) => {
            let key = load_private_key(material, passphrase.as_deref())?;
            return Ok(AuthMethod::KeyFile(Arc::new(key)));
        }
        Some(Credential::Password(password)) => {
            return Ok(AuthMethod::Password(password.clone()));
        }
        None => {}
    }

    // Try SSH agent
    if let Ok(agent) = AgentClient::connect_env().await {
        return Ok(AuthMethod::Agent(agent));
    }

    // Fall back to default key locations
    let home = std::env::var("HOME").map_err(|_| {
        Error::AgentUnavailable("SSH agent not available and HOME not set".to_string())
    })?;

    let default_keys = [
        format!("{}/.ssh/id_ed25519", home),
        format!("{}/.ssh/id_rsa", home),
        format!("{}/.ssh/id_ecdsa", home),
    ];

    for key_path in &default_keys {
        if let Ok(key) = load_secret_key(key_path, None) {
            tracing::debug!("using default key {}", key_path);
            return Ok(AuthMethod::KeyFile(Arc::new(key)));
        }
    }

    Err(Error::AgentUnavailable(
        "SSH agent not available and no default keys found".to_string(),
    ))
}

/// Authenticate the session.
pub(crate) async fn authenticate(
    session: &mut Handle<SshHandler>,
    user: &str,
    auth_method: AuthMethod,
) -> Result<bool> {
    match auth_method {
        AuthMethod::Password(password) => {
            tracing::debug!("authenticating {} with password", user);
            let result = session
                .authenticate_password(user, password)
                .await
                .map_err(Error::Protocol)?;
            Ok(result.success())
        }
        AuthMethod::Agent(mut agent) => {
            let keys = agent.request_identities().await.map_err(|e| {
                Error::AgentUnavailable(format!("failed to list agent keys: {}", e))
            })?;

            if keys.is_empty() {
                return Err(Error::AgentUnavailable("no keys in SSH agent".to_string()));
            }

            for key in &keys {
                match session
                    .authenticate_publickey_with(user, key.clone(), None, &mut agent)
                    .await
                {
                    Ok(result) if result.success() => return Ok(true),
                    _ => continue,
                }
            }
            Ok(false)
        }
        AuthMethod::KeyFile(key) => {
            tracing::debug!("authenticating {} with private key", user);
            let hash_alg = session
                .best_supported_rsa_hash()
                .await
                .map_err(Error::Protocol)?
                .flatten();

            let result = session
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key, hash_alg))
                .await
                .map_err(Error::Protocol)?;

            Ok(result.success())
        }
    }
}
