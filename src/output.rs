// ABOUTME: Output formatting for CLI feedback.
// ABOUTME: Supports normal, quiet (CI), and JSON output modes.

use serde::Serialize;
use std::io::Write;
use std::time::Instant;

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Minimal output for CI (only final result)
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn duration(&self) -> Option<f64> {
        self.start_time.map(|_| self.elapsed_secs())
    }

    /// Print a progress message (suppressed in quiet/json mode).
    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            println!("{message}");
        }
    }

    /// Print a success message with optional timing.
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => {
                let elapsed = self.elapsed_secs();
                if elapsed > 0.0 {
                    println!("{message} ({:.1}s)", elapsed);
                } else {
                    println!("{message}");
                }
            }
            OutputMode::Quiet => {
                println!("{message}");
            }
            OutputMode::Json => {
                self.emit_stdout(&JsonEvent {
                    event: "success",
                    message,
                    duration_secs: self.duration(),
                });
            }
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                eprintln!("Error: {message}");
            }
            OutputMode::Json => {
                let event = JsonEvent {
                    event: "error",
                    message,
                    duration_secs: self.duration(),
                };
                if let Ok(json) = serde_json::to_string(&event) {
                    eprintln!("{json}");
                }
            }
        }
    }

    /// Print the captured output of a finished command.
    pub fn command_result(&self, command: &str, exit_code: Option<u32>, stdout: &str, stderr: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                print!("{stdout}");
                eprint!("{stderr}");
                if self.mode == OutputMode::Normal {
                    match exit_code {
                        Some(0) => {}
                        Some(code) => eprintln!("exit status {code}"),
                        None => eprintln!("no exit status"),
                    }
                }
            }
            OutputMode::Json => {
                self.emit_stdout(&JsonCommandResult {
                    event: "command",
                    command,
                    exit_code,
                    stdout,
                    stderr,
                    duration_secs: self.duration(),
                });
            }
        }
    }

    /// Print one chunk of streamed output as soon as it arrives.
    pub fn chunk(&self, data: &[u8]) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                let mut stdout = std::io::stdout().lock();
                let _ = stdout.write_all(data);
                let _ = stdout.flush();
            }
            OutputMode::Json => {
                let text = String::from_utf8_lossy(data);
                self.emit_stdout(&JsonEvent {
                    event: "chunk",
                    message: &text,
                    duration_secs: None,
                });
            }
        }
    }

    fn emit_stdout<T: Serialize>(&self, event: &T) {
        if let Ok(json) = serde_json::to_string(event) {
            println!("{json}");
        }
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}

#[derive(Serialize)]
struct JsonCommandResult<'a> {
    event: &'a str,
    command: &'a str,
    exit_code: Option<u32>,
    stdout: &'a str,
    stderr: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}
