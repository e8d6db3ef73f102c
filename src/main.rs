// ABOUTME: Entry point for the fastssh CLI application.
// ABOUTME: Parses arguments and dispatches to session operations.

mod cli;
mod output;

use clap::Parser;
use cli::{Cli, Commands, Target};
use fastssh::config::{self, Config, HostConfig, SecretValue};
use fastssh::error::{Error, Result};
use fastssh::ssh::{ExecOptions, RegexFlags, Session};
use output::{Output, OutputMode};
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = if cli.json {
        OutputMode::Json
    } else if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    };
    let mut output = Output::new(mode);
    output.start_timer();

    match run(cli, &output).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            output.error(&e.to_string());
            std::process::exit(1);
        }
    }
}

/// Run the selected command, returning the process exit code.
async fn run(cli: Cli, output: &Output) -> Result<i32> {
    let cwd = env::current_dir()?;

    if let Commands::Init { force } = cli.command {
        config::init_config(&cwd, force)?;
        output.success(&format!("Created {}", config::CONFIG_FILENAME));
        return Ok(0);
    }

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => match Config::discover(&cwd) {
            Ok(config) => config,
            Err(Error::ConfigNotFound(_)) => Config::default(),
            Err(e) => return Err(e),
        },
    };

    match cli.command {
        Commands::Init { .. } => Ok(0),
        Commands::Check { target } => {
            let host = resolve_host(&config, &target)?;
            output.progress(&format!("Connecting to {}...", host.host));
            if Session::is_valid_connection(host.session_config()?).await {
                output.success(&format!("Connection to {} is valid", host.host));
                Ok(0)
            } else {
                output.error(&format!("Cannot connect to {}", host.host));
                Ok(1)
            }
        }
        Commands::Exec {
            target,
            pty,
            timeout,
            env,
            command,
        } => {
            let session = connect(&config, &target).await?;
            let command = command.join(" ");

            let mut options = ExecOptions::new().pty(pty).envs(env);
            if let Some(timeout) = timeout {
                options = options.timeout(timeout);
            }

            let mut result = session.exec_with(command.as_str(), options).await;
            if let Some(reason) = result.server_fail_reason() {
                let message = format!("command could not be submitted: {}", reason);
                disconnect(session).await;
                output.error(&message);
                return Ok(255);
            }

            let stdout = String::from_utf8_lossy(&result.stdout_bytes()).into_owned();
            let stderr = String::from_utf8_lossy(&result.stderr_bytes()).into_owned();
            output.command_result(&command, result.exit_code(), &stdout, &stderr);

            let code = match result.exit_code() {
                Some(code) => i32::try_from(code).unwrap_or(255),
                None => 255,
            };
            disconnect(session).await;
            Ok(code)
        }
        Commands::Stream { target, command } => {
            let session = connect(&config, &target).await?;
            let outcome = session
                .async_exec(command.join(" "), |chunk| output.chunk(chunk))
                .await;
            disconnect(session).await;

            match outcome {
                Ok(()) => Ok(0),
                Err(fastssh::ssh::Error::ExitStatus { code }) => {
                    Ok(i32::try_from(code).unwrap_or(255))
                }
                Err(e) => Err(e.into()),
            }
        }
        Commands::Download { target, remote, to } => {
            let session = connect(&config, &target).await?;
            let content = session.download_file(&remote).await?;
            disconnect(session).await;

            match to {
                Some(path) => {
                    tokio::fs::write(&path, &content).await?;
                    output.success(&format!(
                        "Downloaded {} ({} bytes) to {}",
                        remote,
                        content.len(),
                        path.display()
                    ));
                }
                None => output.chunk(&content),
            }
            Ok(0)
        }
        Commands::Upload {
            target,
            local,
            remote,
            verify,
        } => {
            let session = connect(&config, &target).await?;
            session.send_file_from_path(&remote, &local).await?;
            if verify {
                session.validate_files_hash(&remote, &local).await?;
            }
            disconnect(session).await;

            output.success(&format!("Uploaded {} to {}", local.display(), remote));
            Ok(0)
        }
        Commands::Verify {
            target,
            remote,
            local,
        } => {
            let session = connect(&config, &target).await?;
            let outcome = session.validate_files_hash(&remote, &local).await;
            disconnect(session).await;

            outcome?;
            output.success(&format!("{} matches {}", remote, local.display()));
            Ok(0)
        }
        Commands::Replace {
            target,
            remote,
            old,
            new,
            count,
            regex,
            ignore_case,
        } => {
            let session = connect(&config, &target).await?;
            let outcome = if regex {
                let flags = RegexFlags {
                    case_insensitive: ignore_case,
                    ..Default::default()
                };
                session
                    .edit_file_regex_replace(&remote, &old, &new, count.unwrap_or(0), flags)
                    .await
            } else {
                session.edit_file_replace(&remote, &old, &new, count).await
            };
            disconnect(session).await;

            outcome?;
            output.success(&format!("Edited {}", remote));
            Ok(0)
        }
    }
}

/// Look up the target in the config and apply command-line credential overrides.
fn resolve_host(config: &Config, target: &Target) -> Result<HostConfig> {
    let mut host = config.resolve_target(&target.target)?;
    if let Some(var) = &target.password_env {
        host.password = Some(SecretValue::FromEnv {
            var: var.clone(),
            default: None,
        });
    }
    if let Some(key) = &target.key {
        host.key = Some(key.clone());
    }
    Ok(host)
}

async fn connect(config: &Config, target: &Target) -> Result<Session> {
    let host = resolve_host(config, target)?;
    let session = Session::connect(host.session_config()?).await?;
    Ok(session)
}

/// Close the session once the outcome is known.
///
/// A failed disconnect never replaces the outcome; after a dropped connection
/// it is expected.
async fn disconnect(session: Session) {
    if let Err(e) = session.close().await {
        tracing::debug!("disconnect failed: {}", e);
    }
}
