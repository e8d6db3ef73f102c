// ABOUTME: SFTP file transfer and remote file editing on an SSH session.
// ABOUTME: Each call opens its own SFTP subsystem channel and closes it when done.

use super::client::Session;
use super::error::{Error, Result};
use md5::{Digest, Md5};
use regex::{Regex, RegexBuilder};
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Flags applied when compiling the pattern of a regex replacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegexFlags {
    pub case_insensitive: bool,
    /// `^` and `$` match at line boundaries.
    pub multi_line: bool,
    /// `.` also matches `\n`.
    pub dot_matches_new_line: bool,
    pub ignore_whitespace: bool,
}

impl RegexFlags {
    fn compile(&self, pattern: &str) -> Result<Regex> {
        Ok(RegexBuilder::new(pattern)
            .case_insensitive(self.case_insensitive)
            .multi_line(self.multi_line)
            .dot_matches_new_line(self.dot_matches_new_line)
            .ignore_whitespace(self.ignore_whitespace)
            .build()?)
    }
}

impl Session {
    /// Open an SFTP session on a fresh channel.
    ///
    /// The server must have the sftp subsystem enabled (`Subsystem sftp ...` in sshd_config).
    async fn open_sftp(&self) -> Result<SftpSession> {
        let channel = self.handle().channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream()).await?;
        tracing::debug!("opened sftp session");
        Ok(sftp)
    }

    /// Download a remote file into memory. No size limit is enforced.
    pub async fn download_file(&self, path: &str) -> Result<Vec<u8>> {
        let sftp = self.open_sftp().await?;
        let result = read_remote(&sftp, path).await;
        close_sftp(sftp).await;
        result
    }

    /// Create or overwrite a remote file with `content`.
    pub async fn send_file_from_bytes(&self, path: &str, content: impl AsRef<[u8]>) -> Result<()> {
        let sftp = self.open_sftp().await?;
        let result = write_remote(&sftp, path, content.as_ref()).await;
        close_sftp(sftp).await;
        result
    }

    /// Create or overwrite a remote file with the contents of a local file.
    pub async fn send_file_from_path(&self, path: &str, local_path: impl AsRef<Path>) -> Result<()> {
        let content = tokio::fs::read(local_path.as_ref()).await?;
        self.send_file_from_bytes(path, content).await
    }

    /// Compare MD5 digests of a remote file and a local file.
    ///
    /// Detects accidental corruption only; MD5 says nothing about authenticity.
    pub async fn validate_files_hash(
        &self,
        remote_path: &str,
        local_path: impl AsRef<Path>,
    ) -> Result<()> {
        let remote = self.download_file(remote_path).await?;
        let local = tokio::fs::read(local_path.as_ref()).await?;
        verify_digests(&remote, &local)
    }

    /// Download a file, transform it, and upload the result.
    ///
    /// Not atomic: concurrent editors of the same path overwrite each other and a
    /// failed upload is not rolled back.
    pub async fn edit_file<F>(&self, path: &str, transform: F) -> Result<()>
    where
        F: FnOnce(Vec<u8>) -> Vec<u8>,
    {
        self.try_edit_file(path, |content| Ok(transform(content)))
            .await
    }

    /// Like [`Session::edit_file`], but the transform may fail, in which case nothing is uploaded.
    pub async fn try_edit_file<F>(&self, path: &str, transform: F) -> Result<()>
    where
        F: FnOnce(Vec<u8>) -> Result<Vec<u8>>,
    {
        let content = self.download_file(path).await?;
        let edited = transform(content)?;
        self.send_file_from_bytes(path, edited).await
    }

    /// Replace occurrences of `old` with `new`; `None` replaces all of them.
    pub async fn edit_file_replace(
        &self,
        path: &str,
        old: &str,
        new: &str,
        count: Option<usize>,
    ) -> Result<()> {
        self.try_edit_file(path, |content| replace_text(content, old, new, count))
            .await
    }

    /// Replace matches of `pattern` with `replacement` (`$1`-style group references).
    ///
    /// A `count` of 0 replaces every match.
    pub async fn edit_file_regex_replace(
        &self,
        path: &str,
        pattern: &str,
        replacement: &str,
        count: usize,
        flags: RegexFlags,
    ) -> Result<()> {
        // Compile before touching the remote file
        let regex = flags.compile(pattern)?;
        self.try_edit_file(path, |content| {
            regex_replace(content, &regex, replacement, count)
        })
        .await
    }
}

async fn read_remote(sftp: &SftpSession, path: &str) -> Result<Vec<u8>> {
    let mut file = sftp.open_with_flags(path, OpenFlags::READ).await?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents).await?;
    tracing::debug!("downloaded {} ({} bytes)", path, contents.len());
    Ok(contents)
}

async fn write_remote(sftp: &SftpSession, path: &str, content: &[u8]) -> Result<()> {
    let mut file = sftp
        .open_with_flags(
            path,
            OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
        )
        .await?;
    file.write_all(content).await?;
    file.flush().await?;
    file.shutdown().await?;
    tracing::debug!("uploaded {} ({} bytes)", path, content.len());
    Ok(())
}

async fn close_sftp(sftp: SftpSession) {
    if let Err(e) = sftp.close().await {
        tracing::debug!("failed to close sftp session: {}", e);
    }
}

fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

fn verify_digests(remote: &[u8], local: &[u8]) -> Result<()> {
    let remote = md5_hex(remote);
    let local = md5_hex(local);
    if remote != local {
        return Err(Error::HashMismatch { remote, local });
    }
    Ok(())
}

fn replace_text(content: Vec<u8>, old: &str, new: &str, count: Option<usize>) -> Result<Vec<u8>> {
    let text = String::from_utf8(content)?;
    let replaced = match count {
        Some(n) => text.replacen(old, new, n),
        None => text.replace(old, new),
    };
    Ok(replaced.into_bytes())
}

fn regex_replace(content: Vec<u8>, regex: &Regex, replacement: &str, count: usize) -> Result<Vec<u8>> {
    let text = String::from_utf8(content)?;
    Ok(regex.replacen(&text, count, replacement).into_owned().into_bytes())
}
