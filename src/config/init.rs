// ABOUTME: Config scaffolding for new projects.
// ABOUTME: Creates fastssh.yml template files.

use std::path::Path;

use crate::error::{Error, Result};

use super::CONFIG_FILENAME;

pub fn init_config(dir: &Path, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    std::fs::write(&config_path, TEMPLATE)?;
    tracing::info!("wrote {}", config_path.display());

    Ok(())
}

const TEMPLATE: &str = r#"hosts:
  # Short form: [user@]host[:port]
  pi: pi@192.168.1.20

  server:
    host: server.example.com
    port: 22
    user: deploy
    # Private key as a path or inline text; its passphrase falls back to `password`
    key: ~/.ssh/id_ed25519
    # passphrase: { env: SERVER_KEY_PASSPHRASE }
    # password: { env: SERVER_PASSWORD }
    # Unknown host keys are accepted and saved to known_hosts (default: true)
    # trust_first_connection: false
    # connect_timeout: 30s
    # command_timeout: 5m
"#;
