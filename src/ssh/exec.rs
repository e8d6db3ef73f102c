// ABOUTME: Remote command execution over an SSH session.
// ABOUTME: Blocking-until-exit execution with captured output, plus chunked streaming execution.

use super::client::Session;
use super::error::{Error, Result};
use bytes::Bytes;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use std::io::{Cursor, Read};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Maximum size of a chunk delivered by streaming execution.
pub const CHUNK_SIZE: usize = 1024;

/// Terminal type requested when a pseudo-terminal is allocated.
const PTY_TERM: &str = "vt100";

/// A shell command line submitted to the remote host.
///
/// Built from a single string or from an ordered list of fragments, which are
/// joined with `;`. Fragments are not escaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand(String);

impl RemoteCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self(command.into())
    }

    /// Join fragments into one command line separated by `;`.
    pub fn join<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parts: Vec<String> = fragments
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        Self(parts.join(";"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteCommand {
    fn from(command: &str) -> Self {
        Self::new(command)
    }
}

impl From<String> for RemoteCommand {
    fn from(command: String) -> Self {
        Self(command)
    }
}

impl From<&String> for RemoteCommand {
    fn from(command: &String) -> Self {
        Self(command.clone())
    }
}

impl From<Vec<String>> for RemoteCommand {
    fn from(fragments: Vec<String>) -> Self {
        Self::join(fragments)
    }
}

impl From<Vec<&str>> for RemoteCommand {
    fn from(fragments: Vec<&str>) -> Self {
        Self::join(fragments)
    }
}

impl From<&[&str]> for RemoteCommand {
    fn from(fragments: &[&str]) -> Self {
        Self::join(fragments)
    }
}

impl<const N: usize> From<[&str; N]> for RemoteCommand {
    fn from(fragments: [&str; N]) -> Self {
        Self::join(fragments)
    }
}

/// Options for a single `exec` call.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Initial capacity of the stdout/stderr capture buffers.
    pub buffer_size: Option<usize>,
    /// Give up waiting for the exit status after this long.
    pub timeout: Option<Duration>,
    /// Allocate a pseudo-terminal for the command.
    pub pty: bool,
    /// Environment variables requested before the command starts.
    /// The server may refuse variables not listed in its `AcceptEnv`.
    pub env: Vec<(String, String)>,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn pty(mut self, pty: bool) -> Self {
        self.pty = pty;
        self
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((name.into(), value.into()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}

/// Forward-only reader over captured command output.
///
/// Every read consumes what it returns; once exhausted, further reads yield
/// nothing.
#[derive(Debug)]
pub struct OutputStream {
    inner: Cursor<Vec<u8>>,
}

impl OutputStream {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self {
            inner: Cursor::new(bytes),
        }
    }

    /// Read everything not yet consumed.
    pub fn read_bytes(&mut self) -> Vec<u8> {
        let mut rest = Vec::new();
        // Reading from an in-memory cursor cannot fail
        let _ = self.inner.read_to_end(&mut rest);
        rest
    }

    /// Read everything not yet consumed as UTF-8 text.
    pub fn read_text(&mut self) -> Result<String> {
        Ok(String::from_utf8(self.read_bytes())?)
    }

    /// Read everything not yet consumed as lines, without terminators.
    pub fn read_lines(&mut self) -> Result<Vec<String>> {
        Ok(self.read_text()?.lines().map(str::to_owned).collect())
    }

    pub fn is_exhausted(&self) -> bool {
        self.inner.position() as usize >= self.inner.get_ref().len()
    }
}

impl Read for OutputStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Outcome of one `exec` call.
///
/// A result either failed at submission (no streams, no exit code) or carries
/// the command's output streams and, once it exited, its exit code.
pub struct ExecutionResult {
    stdin: Option<Channel<Msg>>,
    stdout: Option<OutputStream>,
    stderr: Option<OutputStream>,
    exit_code: Option<u32>,
    server_fail: Option<String>,
    timed_out: Option<Duration>,
}

impl std::fmt::Debug for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionResult")
            .field("exit_code", &self.exit_code)
            .field("server_fail", &self.server_fail)
            .field("timed_out", &self.timed_out)
            .finish_non_exhaustive()
    }
}

impl ExecutionResult {
    pub(crate) fn server_fail(reason: impl Into<String>) -> Self {
        Self {
            stdin: None,
            stdout: None,
            stderr: None,
            exit_code: None,
            server_fail: Some(reason.into()),
            timed_out: None,
        }
    }

    pub(crate) fn completed(
        stdin: Option<Channel<Msg>>,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        exit_code: Option<u32>,
        timed_out: Option<Duration>,
    ) -> Self {
        Self {
            stdin,
            stdout: Some(OutputStream::new(stdout)),
            stderr: Some(OutputStream::new(stderr)),
            exit_code,
            server_fail: None,
            timed_out,
        }
    }

    /// True if submission failed or the command did not exit with status 0.
    pub fn is_fail(&self) -> bool {
        self.is_server_fail() || self.exit_code != Some(0)
    }

    /// True only if the command never ran because submission failed.
    pub fn is_server_fail(&self) -> bool {
        self.server_fail.is_some()
    }

    /// Why submission failed, if it did.
    pub fn server_fail_reason(&self) -> Option<&str> {
        self.server_fail.as_deref()
    }

    pub fn exit_code(&self) -> Option<u32> {
        self.exit_code
    }

    /// True if the timeout elapsed before the command exited.
    pub fn timed_out(&self) -> bool {
        self.timed_out.is_some()
    }

    pub fn stdout(&mut self) -> Option<&mut OutputStream> {
        self.stdout.as_mut()
    }

    pub fn stderr(&mut self) -> Option<&mut OutputStream> {
        self.stderr.as_mut()
    }

    pub fn stdout_bytes(&mut self) -> Vec<u8> {
        self.stdout
            .as_mut()
            .map(OutputStream::read_bytes)
            .unwrap_or_default()
    }

    pub fn stdout_text(&mut self) -> Result<String> {
        self.stdout
            .as_mut()
            .map_or_else(|| Ok(String::new()), OutputStream::read_text)
    }

    pub fn stdout_lines(&mut self) -> Result<Vec<String>> {
        self.stdout
            .as_mut()
            .map_or_else(|| Ok(Vec::new()), OutputStream::read_lines)
    }

    pub fn stderr_bytes(&mut self) -> Vec<u8> {
        self.stderr
            .as_mut()
            .map(OutputStream::read_bytes)
            .unwrap_or_default()
    }

    pub fn stderr_text(&mut self) -> Result<String> {
        self.stderr
            .as_mut()
            .map_or_else(|| Ok(String::new()), OutputStream::read_text)
    }

    pub fn stderr_lines(&mut self) -> Result<Vec<String>> {
        self.stderr
            .as_mut()
            .map_or_else(|| Ok(Vec::new()), OutputStream::read_lines)
    }

    /// Write to the command's standard input and send it immediately.
    ///
    /// Does nothing when submission failed and there is no input stream.
    pub async fn flush(&self, data: impl AsRef<[u8]>) -> Result<()> {
        let Some(channel) = &self.stdin else {
            return Ok(());
        };
        channel.data(data.as_ref()).await.map_err(Error::Protocol)
    }

    /// Convert a failed result into the matching error.
    pub fn check(self) -> Result<Self> {
        if let Some(reason) = &self.server_fail {
            return Err(Error::ServerFail(reason.clone()));
        }
        if let Some(timeout) = self.timed_out {
            return Err(Error::CommandTimeout(timeout));
        }
        match self.exit_code {
            Some(0) => Ok(self),
            Some(code) => Err(Error::ExitStatus { code }),
            None => Err(Error::ChannelClosed),
        }
    }
}

/// Output of a running command, delivered in chunks of at most [`CHUNK_SIZE`] bytes.
///
/// Dropping the stream closes the channel without waiting for the command.
pub struct ExecStream {
    channel: Channel<Msg>,
    pending: Bytes,
    exit_code: Option<u32>,
    closed: bool,
}

impl ExecStream {
    fn new(channel: Channel<Msg>) -> Self {
        Self {
            channel,
            pending: Bytes::new(),
            exit_code: None,
            closed: false,
        }
    }

    /// Next chunk of output, or `None` once the remote side closed its output.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        loop {
            if let Some(chunk) = take_chunk(&mut self.pending) {
                return Some(chunk);
            }
            if self.closed {
                return None;
            }
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    self.pending = Bytes::copy_from_slice(&data);
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    self.exit_code = Some(exit_status);
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    self.closed = true;
                }
                Some(_) => {}
            }
        }
    }

    /// Discard any unread output and wait for the exit status.
    pub async fn finish(mut self) -> Result<u32> {
        while self.next_chunk().await.is_some() {}

        // The exit status may arrive after EOF
        while self.exit_code.is_none() {
            match self.channel.wait().await {
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    self.exit_code = Some(exit_status);
                }
                Some(_) => {}
                None => break,
            }
        }

        self.exit_code.ok_or(Error::ChannelClosed)
    }

    /// Move the read loop onto a tokio task.
    ///
    /// Chunks arrive in order on the receiver. Dropping the receiver abandons the
    /// command and the task resolves to [`Error::Cancelled`].
    pub fn spawn(mut self) -> (mpsc::Receiver<Bytes>, JoinHandle<Result<u32>>) {
        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(async move {
            while let Some(chunk) = self.next_chunk().await {
                if tx.send(chunk).await.is_err() {
                    return Err(Error::Cancelled);
                }
            }
            self.finish().await
        });
        (rx, task)
    }
}

/// Split at most [`CHUNK_SIZE`] bytes off the front of `pending`.
fn take_chunk(pending: &mut Bytes) -> Option<Bytes> {
    if pending.is_empty() {
        return None;
    }
    let n = pending.len().min(CHUNK_SIZE);
    Some(pending.split_to(n))
}

impl Session {
    /// Execute a command and wait for it to exit.
    pub async fn exec(&self, command: impl Into<RemoteCommand>) -> ExecutionResult {
        self.exec_with(command, ExecOptions::default()).await
    }

    /// Execute a command with explicit options and wait for it to exit.
    ///
    /// If the command cannot be submitted, the result reports
    /// [`ExecutionResult::is_server_fail`] instead of returning an error.
    pub async fn exec_with(
        &self,
        command: impl Into<RemoteCommand>,
        options: ExecOptions,
    ) -> ExecutionResult {
        let command = command.into();
        let mut channel = match self.open_command(&command, options.pty, &options.env).await {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!("failed to submit `{}`: {}", command, e);
                return ExecutionResult::server_fail(e.to_string());
            }
        };

        let capacity = options.buffer_size.unwrap_or(0);
        let mut stdout = Vec::with_capacity(capacity);
        let mut stderr = Vec::with_capacity(capacity);

        let timeout = options.timeout.or(self.config().command_timeout);
        let (exit_code, timed_out) = match timeout {
            Some(limit) => {
                match tokio::time::timeout(
                    limit,
                    collect_output(&mut channel, &mut stdout, &mut stderr),
                )
                .await
                {
                    Ok(exit_code) => (exit_code, None),
                    Err(_) => {
                        tracing::warn!("`{}` did not exit within {:?}", command, limit);
                        (None, Some(limit))
                    }
                }
            }
            None => (
                collect_output(&mut channel, &mut stdout, &mut stderr).await,
                None,
            ),
        };

        tracing::debug!("`{}` exited with {:?}", command, exit_code);
        ExecutionResult::completed(Some(channel), stdout, stderr, exit_code, timed_out)
    }

    /// Start a command on a pseudo-terminal and stream its output.
    pub async fn exec_stream(&self, command: impl Into<RemoteCommand>) -> Result<ExecStream> {
        let command = command.into();
        let channel = self.open_command(&command, true, &[]).await?;
        Ok(ExecStream::new(channel))
    }

    /// Run a command on a pseudo-terminal, handing each output chunk to `on_chunk`.
    ///
    /// Chunks are delivered in order on the calling task. Returns once the remote
    /// side closes its output; a nonzero exit yields [`Error::ExitStatus`].
    /// There is no timeout: a hung command hangs the caller. Use
    /// [`Session::exec_stream`] to stop early.
    pub async fn async_exec<F>(&self, command: impl Into<RemoteCommand>, mut on_chunk: F) -> Result<()>
    where
        F: FnMut(&[u8]),
    {
        let mut stream = self.exec_stream(command).await?;
        while let Some(chunk) = stream.next_chunk().await {
            on_chunk(&chunk);
        }
        match stream.finish().await? {
            0 => Ok(()),
            code => Err(Error::ExitStatus { code }),
        }
    }

    async fn open_command(
        &self,
        command: &RemoteCommand,
        pty: bool,
        env: &[(String, String)],
    ) -> Result<Channel<Msg>> {
        let channel = self
            .handle()
            .channel_open_session()
            .await
            .map_err(|e| Error::ServerFail(format!("failed to open channel: {}", e)))?;

        if pty {
            channel
                .request_pty(false, PTY_TERM, 80, 24, 0, 0, &[])
                .await
                .map_err(|e| Error::ServerFail(format!("failed to request pty: {}", e)))?;
        }

        for (name, value) in env {
            channel
                .set_env(false, name.as_str(), value.as_str())
                .await
                .map_err(|e| Error::ServerFail(format!("failed to set {}: {}", name, e)))?;
        }

        channel
            .exec(true, command.as_str())
            .await
            .map_err(|e| Error::ServerFail(format!("failed to exec command: {}", e)))?;

        Ok(channel)
    }
}

/// Drain a command channel into the buffers until the command is done.
///
/// Returns the exit status, or `None` if the channel closed without one.
async fn collect_output(
    channel: &mut Channel<Msg>,
    stdout: &mut Vec<u8>,
    stderr: &mut Vec<u8>,
) -> Option<u32> {
    let mut exit_code = None;
    let mut got_eof = false;

    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) => {
                stdout.extend_from_slice(&data);
            }
            Some(ChannelMsg::ExtendedData { data, ext }) => {
                if ext == 1 {
                    stderr.extend_from_slice(&data);
                }
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                exit_code = Some(exit_status);
                if got_eof {
                    break;
                }
            }
            Some(ChannelMsg::Eof) => {
                got_eof = true;
                if exit_code.is_some() {
                    break;
                }
            }
            Some(ChannelMsg::Close) => break,
            Some(_) => {}
            None => break,
        }
    }

    exit_code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_are_joined_with_semicolons() {
        let command = RemoteCommand::from(vec!["cd /tmp", "ls -la", "echo done"]);
        assert_eq!(command.as_str(), "cd /tmp;ls -la;echo done");
    }

    #[test]
    fn fragments_are_not_escaped() {
        let command = RemoteCommand::from(["echo 'a;b'", "true"]);
        assert_eq!(command.as_str(), "echo 'a;b';true");
    }

    #[test]
    fn single_string_is_kept_verbatim() {
        let command = RemoteCommand::from("rm -f /tmp/x; echo ok");
        assert_eq!(command.as_str(), "rm -f /tmp/x; echo ok");
    }

    #[test]
    fn server_fail_has_no_streams_or_exit_code() {
        let mut result = ExecutionResult::server_fail("connection dropped");

        assert!(result.is_server_fail());
        assert!(result.is_fail());
        assert_eq!(result.exit_code(), None);
        assert!(result.stdout().is_none());
        assert!(result.stderr().is_none());
        assert_eq!(result.stdout_text().unwrap(), "");
        assert!(result.stderr_bytes().is_empty());
        assert_eq!(result.server_fail_reason(), Some("connection dropped"));
    }

    #[test]
    fn nonzero_exit_is_fail_but_not_server_fail() {
        let result = ExecutionResult::completed(None, Vec::new(), Vec::new(), Some(1), None);

        assert!(result.is_fail());
        assert!(!result.is_server_fail());
        assert_eq!(result.exit_code(), Some(1));
        assert!(matches!(result.check(), Err(Error::ExitStatus { code: 1 })));
    }

    #[test]
    fn zero_exit_is_success() {
        let result =
            ExecutionResult::completed(None, b"hi\n".to_vec(), Vec::new(), Some(0), None);

        assert!(!result.is_fail());
        assert!(result.check().is_ok());
    }

    #[test]
    fn timeout_leaves_exit_code_absent() {
        let limit = Duration::from_millis(50);
        let result =
            ExecutionResult::completed(None, b"partial".to_vec(), Vec::new(), None, Some(limit));

        assert!(result.timed_out());
        assert!(result.is_fail());
        assert!(!result.is_server_fail());
        assert!(matches!(result.check(), Err(Error::CommandTimeout(d)) if d == limit));
    }

    #[test]
    fn streams_are_read_once() {
        let mut result = ExecutionResult::completed(
            None,
            b"one\ntwo\n".to_vec(),
            b"oops".to_vec(),
            Some(0),
            None,
        );

        assert_eq!(result.stdout_lines().unwrap(), vec!["one", "two"]);
        assert!(result.stdout_lines().unwrap().is_empty());
        assert_eq!(result.stderr_bytes(), b"oops");
        assert_eq!(result.stderr_text().unwrap(), "");
    }

    #[test]
    fn output_stream_reads_continue_from_current_position() {
        let mut stream = OutputStream::new(b"hello world".to_vec());

        let mut head = [0u8; 6];
        stream.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"hello ");
        assert!(!stream.is_exhausted());
        assert_eq!(stream.read_text().unwrap(), "world");
        assert!(stream.is_exhausted());
    }

    #[test]
    fn invalid_utf8_is_a_decode_error() {
        let mut stream = OutputStream::new(vec![0xff, 0xfe, 0x00]);
        assert!(matches!(stream.read_text(), Err(Error::Decode(_))));
    }

    #[tokio::test]
    async fn flush_without_stdin_is_a_noop() {
        let result = ExecutionResult::server_fail("no channel");
        result.flush("yes\n").await.unwrap();
    }

    #[test]
    fn chunks_never_exceed_chunk_size() {
        let mut pending = Bytes::from(vec![7u8; CHUNK_SIZE * 2 + 10]);

        let sizes: Vec<usize> = std::iter::from_fn(|| take_chunk(&mut pending))
            .map(|c| c.len())
            .collect();

        assert_eq!(sizes, vec![CHUNK_SIZE, CHUNK_SIZE, 10]);
        assert!(take_chunk(&mut pending).is_none());
    }

    #[test]
    fn chunks_preserve_order() {
        let data: Vec<u8> = (0..=255u8).cycle().take(CHUNK_SIZE + 300).collect();
        let mut pending = Bytes::from(data.clone());

        let mut rebuilt = Vec::new();
        while let Some(chunk) = take_chunk(&mut pending) {
            rebuilt.extend_from_slice(&chunk);
        }
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn exec_options_builder_keeps_env_order() {
        let options = ExecOptions::new()
            .pty(true)
            .timeout(Duration::from_secs(5))
            .env("A", "1")
            .envs([("B", "2"), ("C", "3")]);

        assert!(options.pty);
        assert_eq!(options.timeout, Some(Duration::from_secs(5)));
        let names: Vec<&str> = options.env.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }
}
