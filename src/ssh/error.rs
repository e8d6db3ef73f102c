// ABOUTME: SSH-specific error types.
// ABOUTME: Covers connection, key handling, command execution, and file transfer failures.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("authentication failed for user {user}")]
    AuthenticationFailed { user: String },

    #[error("private key is encrypted and requires a valid passphrase")]
    PassphraseRequired,

    #[error("failed to load key from {path}: {reason}")]
    KeyLoadFailed { path: PathBuf, reason: String },

    #[error("failed to decode inline private key: {0}")]
    KeyDecodeFailed(String),

    #[error("SSH agent not available: {0}")]
    AgentUnavailable(String),

    #[error("command could not be submitted: {0}")]
    ServerFail(String),

    #[error("command exited with status {code}")]
    ExitStatus { code: u32 },

    #[error("command timed out after {0:?}")]
    CommandTimeout(std::time::Duration),

    #[error("channel closed unexpectedly without exit status")]
    ChannelClosed,

    #[error("output stream dropped before the command finished")]
    Cancelled,

    #[error("remote file hash <{remote}> differs from local file hash <{local}>")]
    HashMismatch { remote: String, local: String },

    #[error("output is not valid UTF-8: {0}")]
    Decode(#[from] std::string::FromUtf8Error),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("SFTP error: {0}")]
    Sftp(#[from] russh_sftp::client::error::Error),

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("SSH key error: {0}")]
    Key(#[from] russh::keys::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
