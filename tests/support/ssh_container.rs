// ABOUTME: SSH container helper for integration tests.
// ABOUTME: Uses bollard to manage a shared SSH server container with password and key login.

use super::fixture_path;
use bollard::Docker;
use bollard::models::ContainerCreateBody;
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, RemoveContainerOptions, StopContainerOptions,
};
use fastssh::ssh::SessionConfig;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

const IMAGE: &str = "lscr.io/linuxserver/openssh-server:latest";
const SSH_PORT: u16 = 2222;
pub const TEST_USER: &str = "testuser";
pub const TEST_PASSWORD: &str = "fastssh-test-password";

/// Container info needed for cleanup.
struct ContainerInfo {
    container_id: String,
}

/// Shared container info for cleanup.
static CONTAINER_INFO: OnceLock<ContainerInfo> = OnceLock::new();

/// Cleanup on process exit.
#[ctor::dtor]
fn cleanup_on_exit() {
    let Some(info) = CONTAINER_INFO.get() else {
        return;
    };
    let Ok(rt) = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    else {
        return;
    };
    rt.block_on(async {
        if let Ok(docker) = Docker::connect_with_local_defaults() {
            let _ = docker
                .stop_container(&info.container_id, None::<StopContainerOptions>)
                .await;
            let _ = docker
                .remove_container(
                    &info.container_id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
        }
    });
    let _ = std::fs::remove_file(known_hosts_path());
}

/// Shared SSH container for all tests.
static SHARED_CONTAINER: tokio::sync::OnceCell<SshContainer> = tokio::sync::OnceCell::const_new();

/// Get the shared SSH container, starting it if needed.
pub async fn shared_container() -> &'static SshContainer {
    SHARED_CONTAINER
        .get_or_init(|| async {
            SshContainer::start()
                .await
                .expect("failed to start SSH container")
        })
        .await
}

/// Known hosts file private to this test process.
fn known_hosts_path() -> PathBuf {
    std::env::temp_dir().join(format!("fastssh-known-hosts-{}", std::process::id()))
}

/// Running SSH container with connection details.
pub struct SshContainer {
    port: u16,
}

impl SshContainer {
    async fn start() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let docker = Docker::connect_with_local_defaults()?;

        let public_key = std::fs::read_to_string(fixture_path("test_key.pub"))?;

        // Pull image if needed
        let mut pull_stream = docker.create_image(
            Some(CreateImageOptions {
                from_image: Some(IMAGE.to_string()),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(result) = pull_stream.next().await {
            result?;
        }

        let port = Self::find_available_port().await?;

        let container_name = format!("fastssh-test-{}", std::process::id());
        let env = vec![
            "PUID=1000".to_string(),
            "PGID=1000".to_string(),
            format!("USER_NAME={}", TEST_USER),
            format!("PUBLIC_KEY={}", public_key.trim()),
            "PASSWORD_ACCESS=true".to_string(),
            format!("USER_PASSWORD={}", TEST_PASSWORD),
        ];

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            format!("{}/tcp", SSH_PORT),
            Some(vec![bollard::models::PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: Some(port.to_string()),
            }]),
        );

        let host_config = bollard::models::HostConfig {
            port_bindings: Some(port_bindings),
            ..Default::default()
        };

        let config = ContainerCreateBody {
            image: Some(IMAGE.to_string()),
            env: Some(env),
            host_config: Some(host_config),
            ..Default::default()
        };

        let container = docker
            .create_container(
                Some(CreateContainerOptions {
                    name: Some(container_name),
                    ..Default::default()
                }),
                config,
            )
            .await?;

        let _ = CONTAINER_INFO.set(ContainerInfo {
            container_id: container.id.clone(),
        });

        docker
            .start_container(
                &container.id,
                None::<bollard::query_parameters::StartContainerOptions>,
            )
            .await?;

        Self::wait_for_ssh(port).await?;

        Ok(Self { port })
    }

    /// SessionConfig without credentials.
    pub fn base_config(&self) -> SessionConfig {
        SessionConfig::new("127.0.0.1", TEST_USER)
            .port(self.port)
            .known_hosts_path(known_hosts_path())
            .trust_on_first_use(true)
    }

    /// SessionConfig authenticating with the test password.
    pub fn password_config(&self) -> SessionConfig {
        self.base_config().password(TEST_PASSWORD)
    }

    /// SessionConfig authenticating with the unencrypted test key file.
    pub fn key_config(&self) -> SessionConfig {
        self.base_config().private_key(fixture_path("test_key"))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    async fn find_available_port() -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        drop(listener);
        Ok(port)
    }

    async fn wait_for_ssh(port: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        use tokio::io::AsyncReadExt;

        let addr = format!("127.0.0.1:{}", port);
        for _ in 0..60 {
            if let Ok(mut stream) = tokio::net::TcpStream::connect(&addr).await {
                // Read the SSH banner to confirm the server is actually ready
                let mut buf = [0u8; 32];
                match tokio::time::timeout(std::time::Duration::from_secs(2), stream.read(&mut buf))
                    .await
                {
                    Ok(Ok(n)) if n > 0 => {
                        let banner = String::from_utf8_lossy(&buf[..n]);
                        if banner.starts_with("SSH-") {
                            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                            return Ok(());
                        }
                    }
                    _ => {}
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
        Err("SSH container did not become ready in time".into())
    }
}
