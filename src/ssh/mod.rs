// ABOUTME: SSH client module for remote server connections.
// ABOUTME: Password and key authentication, command execution, SFTP transfer and file editing.

mod auth;
mod client;
mod error;
mod exec;
mod transfer;

pub use auth::{Credential, load_private_key};
pub use client::{Session, SessionConfig};
pub use error::{Error, Result};
pub use exec::{CHUNK_SIZE, ExecOptions, ExecStream, ExecutionResult, OutputStream, RemoteCommand};
pub use transfer::RegexFlags;
