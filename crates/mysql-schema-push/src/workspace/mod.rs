//! Isolated schemas for materializing and verifying definitions.
//!
//! A [`Sandbox`] is an empty schema, locked for exclusive use, in which DDL can
//! be executed and then introspected. Two kinds exist:
//!
//! - [`TempSchema`]: a scratch schema on an existing instance
//! - [`LocalContainer`]: a scratch schema inside a local Docker container
//!
//! Containers are tracked by a [`Lifecycle`] so each flavor is provisioned once
//! per run and torn down at shutdown according to the cleanup policy.

mod docker;
mod lifecycle;
mod temp_schema;

pub use docker::{DockerContainer, LocalContainer};
pub use lifecycle::{Lifecycle, ShutdownCallback};
pub use temp_schema::TempSchema;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::OptionSet;
use crate::core::{Flavor, Schema};
use crate::error::{PushError, Result};
use crate::fs::{LogicalSchema, Statement};
use crate::instance::{Instance, PoolRegistry};

/// Prefix of the advisory lock taken on a sandbox schema.
pub const LOCK_NAME_PREFIX: &str = "mysql_schema_push.";

/// Where sandboxes are created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceKind {
    TempSchema,
    Docker,
}

/// What happens to the sandbox when it is released, and to its container at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupAction {
    /// Keep the schema, drop only its tables.
    None,
    /// Drop the schema.
    DropSchema,
    /// Drop the schema and stop the container at shutdown.
    StopContainer,
    /// Drop the schema and remove the container at shutdown.
    DestroyContainer,
}

/// Everything needed to acquire a sandbox.
#[derive(Debug, Clone)]
pub struct WorkspaceOptions {
    pub kind: WorkspaceKind,
    /// Instance hosting a temp-schema sandbox.
    pub instance: Option<Instance>,
    /// Image flavor for a container sandbox.
    pub flavor: Flavor,
    pub schema_name: String,
    pub char_set: String,
    pub collation: String,
    pub lock_wait: Duration,
    pub cleanup: CleanupAction,
    /// Maximum concurrent CREATE statements.
    pub concurrency: usize,
    pub registry: Arc<PoolRegistry>,
}

impl WorkspaceOptions {
    /// Build sandbox options for a target on `instance` from directory options.
    pub async fn from_options(
        opts: &OptionSet,
        instance: &Instance,
        registry: Arc<PoolRegistry>,
    ) -> Result<Self> {
        let kind = match opts.get_enum("workspace", &["temp-schema", "docker"])?.as_str() {
            "docker" => WorkspaceKind::Docker,
            _ => WorkspaceKind::TempSchema,
        };

        let cleanup = match kind {
            WorkspaceKind::TempSchema if opts.get_bool("reuse-temp-schema")? => CleanupAction::None,
            WorkspaceKind::TempSchema => CleanupAction::DropSchema,
            WorkspaceKind::Docker => {
                match opts
                    .get_enum("docker-cleanup", &["none", "stop", "destroy"])?
                    .as_str()
                {
                    "stop" => CleanupAction::StopContainer,
                    "destroy" => CleanupAction::DestroyContainer,
                    _ => CleanupAction::None,
                }
            }
        };

        let flavor = if kind == WorkspaceKind::Docker {
            let configured = Flavor::parse(&opts.get_str("flavor"));
            let mut flavor = if configured.known() {
                configured
            } else {
                instance.flavor().await?
            };
            if !flavor.known() {
                return Err(PushError::config(format!(
                    "cannot determine flavor of {} for docker workspace; set the flavor option",
                    instance
                )));
            }
            // Containers are shared per major.minor release.
            flavor.version.2 = 0;
            flavor
        } else {
            Flavor::UNKNOWN
        };

        Ok(Self {
            kind,
            instance: Some(instance.clone()),
            flavor,
            schema_name: opts.get_str("temp-schema"),
            char_set: opts.get_str("default-character-set"),
            collation: opts.get_str("default-collation"),
            lock_wait: opts.get_duration("lock-wait-timeout")?,
            cleanup,
            concurrency: opts.get_usize("temp-schema-threads")?.max(1),
            registry,
        })
    }

    /// Advisory lock name for this sandbox schema.
    pub fn lock_name(&self) -> String {
        format!("{}{}", LOCK_NAME_PREFIX, self.schema_name)
    }
}

/// A statement that failed inside a sandbox.
#[derive(Debug)]
pub struct StatementError {
    pub statement: Statement,
    pub error: PushError,
}

impl std::fmt::Display for StatementError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.statement.location(), self.error)
    }
}

/// An exclusive, disposable schema for executing and introspecting DDL.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Instance hosting the sandbox schema.
    fn instance(&self) -> &Instance;

    /// Name of the sandbox schema.
    fn schema_name(&self) -> &str;

    /// Run statements, up to `concurrency` at a time. Returns the failures;
    /// one failure never stops the others.
    async fn execute(&self, statements: &[Statement], concurrency: usize) -> Vec<StatementError>;

    /// Read back the sandbox schema.
    async fn introspect(&self) -> Result<Schema>;

    /// Clean up and release the lock. A second call is an error.
    async fn release(&mut self) -> Result<()>;
}

/// Acquire a sandbox of the configured kind.
pub async fn acquire(options: &WorkspaceOptions, lifecycle: &Lifecycle) -> Result<Box<dyn Sandbox>> {
    match options.kind {
        WorkspaceKind::TempSchema => {
            let instance = options.instance.clone().ok_or_else(|| {
                PushError::Fatal("temp-schema workspace requires an instance".to_string())
            })?;
            let sandbox = TempSchema::acquire(instance, options).await?;
            Ok(Box::new(sandbox))
        }
        WorkspaceKind::Docker => {
            let sandbox = LocalContainer::acquire(options, lifecycle).await?;
            Ok(Box::new(sandbox))
        }
    }
}

/// Result of materializing a [`LogicalSchema`] in a sandbox.
#[derive(Debug)]
pub struct WorkspaceSchema {
    pub schema: Schema,
    pub failures: Vec<StatementError>,
}

/// Materialize `logical` in a fresh sandbox and introspect it.
///
/// CREATEs run with the configured concurrency, then ALTERs run one at a
/// time. The sandbox is always released, even on error.
pub async fn exec_logical_schema(
    logical: &LogicalSchema,
    options: &WorkspaceOptions,
    lifecycle: &Lifecycle,
) -> Result<WorkspaceSchema> {
    let mut options = options.clone();
    if !logical.char_set.is_empty() {
        options.char_set = logical.char_set.clone();
    }
    if !logical.collation.is_empty() {
        options.collation = logical.collation.clone();
    }

    let mut sandbox = acquire(&options, lifecycle).await?;
    debug!(
        "{}: materializing {} tables in {}",
        sandbox.instance(),
        logical.creates.len(),
        sandbox.schema_name()
    );

    let result = async {
        let creates: Vec<Statement> = logical.creates.values().cloned().collect();
        let mut failures = sandbox.execute(&creates, options.concurrency).await;
        failures.extend(sandbox.execute(&logical.alters, 1).await);
        let schema = sandbox.introspect().await?;
        Ok::<_, PushError>(WorkspaceSchema { schema, failures })
    }
    .await;

    let released = sandbox.release().await;
    match (result, released) {
        (Ok(ws), Ok(())) => Ok(ws),
        (Err(e), released) => {
            if let Err(re) = released {
                warn!("Error releasing workspace after failure: {}", re);
            }
            Err(e)
        }
        (Ok(_), Err(e)) => Err(e),
    }
}
