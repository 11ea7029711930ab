//! Sandbox inside a local Docker container, driven through the `docker` CLI.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{CleanupAction, Lifecycle, Sandbox, StatementError, TempSchema, WorkspaceOptions};
use crate::core::{Flavor, Schema};
use crate::error::{PushError, Result};
use crate::fs::Statement;
use crate::instance::Instance;

/// How long a freshly started container may take to accept connections.
const CONTAINER_READY_TIMEOUT: Duration = Duration::from_secs(120);

/// A database container managed through the `docker` CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerContainer {
    pub name: String,
    pub image: String,
    /// Host port mapped to the container's 3306.
    pub port: u16,
}

impl DockerContainer {
    /// Find, start or create the container for `flavor`.
    pub async fn ensure(flavor: Flavor) -> Result<Self> {
        let name = flavor.container_name();
        let image = flavor.docker_image();

        match docker(&["inspect", "-f", "{{.State.Status}}", &name]).await {
            Ok(status) if status.trim() == "running" => {
                debug!("Reusing running container {}", name);
            }
            Ok(status) => {
                info!("Starting container {} (was {})", name, status.trim());
                docker(&["start", &name]).await?;
            }
            Err(_) => {
                info!("Creating container {} from image {}", name, image);
                let password_env = if flavor.is_mariadb() {
                    "MARIADB_ALLOW_EMPTY_ROOT_PASSWORD=1"
                } else {
                    "MYSQL_ALLOW_EMPTY_PASSWORD=1"
                };
                docker(&[
                    "run",
                    "-d",
                    "--name",
                    &name,
                    "-p",
                    "127.0.0.1::3306",
                    "-e",
                    password_env,
                    &image,
                ])
                .await?;
            }
        }

        let mapping = docker(&["port", &name, "3306/tcp"]).await?;
        let port = parse_port_mapping(&mapping).ok_or_else(|| {
            PushError::workspace(format!(
                "cannot determine host port of container {}: {}",
                name,
                mapping.trim()
            ))
        })?;
        Ok(Self { name, image, port })
    }

    /// Wait until `instance` (pointing at this container) accepts connections.
    pub async fn wait_ready(&self, instance: &Instance) -> Result<()> {
        let start = Instant::now();
        while !instance.can_connect().await {
            if start.elapsed() >= CONTAINER_READY_TIMEOUT {
                return Err(PushError::workspace(format!(
                    "container {} not ready after {:?}",
                    self.name, CONTAINER_READY_TIMEOUT
                )));
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping container {}", self.name);
        docker(&["stop", &self.name]).await.map(|_| ())
    }

    pub async fn destroy(&self) -> Result<()> {
        info!("Removing container {}", self.name);
        docker(&["rm", "-f", "-v", &self.name]).await.map(|_| ())
    }
}

/// Run `docker` with `args` and return stdout; non-zero exit is a workspace error.
async fn docker(args: &[&str]) -> Result<String> {
    let output = Command::new("docker")
        .args(args)
        .output()
        .await
        .map_err(|e| PushError::workspace(format!("cannot run docker: {}", e)))?;
    if !output.status.success() {
        return Err(PushError::workspace(format!(
            "docker {} failed ({}): {}",
            args.first().copied().unwrap_or(""),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `docker port` output such as `127.0.0.1:49153`.
fn parse_port_mapping(output: &str) -> Option<u16> {
    output
        .lines()
        .filter_map(|line| line.trim().rsplit_once(':'))
        .find_map(|(_, port)| port.parse().ok())
}

/// A scratch schema inside a local container.
#[derive(Debug)]
pub struct LocalContainer {
    inner: TempSchema,
    container: DockerContainer,
}

impl LocalContainer {
    pub async fn acquire(options: &WorkspaceOptions, lifecycle: &Lifecycle) -> Result<Self> {
        let (container, instance) = lifecycle
            .container_instance(options.flavor, &options.registry)
            .await?;
        if matches!(
            options.cleanup,
            CleanupAction::StopContainer | CleanupAction::DestroyContainer
        ) {
            lifecycle.register_container_cleanup(&container, options.cleanup);
        }
        let inner = TempSchema::acquire(instance, options).await?;
        Ok(Self { inner, container })
    }
}

#[async_trait]
impl Sandbox for LocalContainer {
    fn instance(&self) -> &Instance {
        self.inner.instance()
    }

    fn schema_name(&self) -> &str {
        self.inner.schema_name()
    }

    async fn execute(&self, statements: &[Statement], concurrency: usize) -> Vec<StatementError> {
        self.inner.execute(statements, concurrency).await
    }

    async fn introspect(&self) -> Result<Schema> {
        self.inner.introspect().await
    }

    async fn release(&mut self) -> Result<()> {
        self.inner.release().await?;
        debug!("released workspace in container {}", self.container.name);
        Ok(())
    }
}
