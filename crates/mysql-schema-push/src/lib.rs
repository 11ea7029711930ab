//! # mysql-schema-push
//!
//! Declarative schema management for MySQL and MariaDB.
//!
//! A directory tree of `CREATE TABLE` files and `.push.yaml` option files
//! describes the desired state of schemas on one or more instances. This
//! library diffs that state against the live instances and applies the
//! resulting DDL:
//!
//! - **Workspaces** materialize desired definitions in a locked scratch schema
//!   (on the target instance or in a local Docker container)
//! - **Verification** replays every ALTER in a workspace before it runs live
//! - **Safety gating** refuses destructive DDL unless explicitly allowed
//! - **Wrappers** hand DDL to external tools such as online schema change utilities
//! - **Concurrency** across instances with a worker pool, one worker per instance
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mysql_schema_push::{Lifecycle, OptionSet, Orchestrator, RunOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> mysql_schema_push::Result<()> {
//!     let lifecycle = Arc::new(Lifecycle::new());
//!     let run = RunOptions { dry_run: true, ..Default::default() };
//!     let orchestrator = Orchestrator::new("schemas", OptionSet::new(), run, lifecycle.clone());
//!     let summary = orchestrator.run(CancellationToken::new()).await?;
//!     lifecycle.shutdown().await;
//!     println!("differences: {}", summary.result.differences);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod ddl;
pub mod error;
pub mod fs;
pub mod instance;
pub mod orchestrator;
pub mod verify;
pub mod workspace;

// Re-exports for convenient access
pub use config::{OptionSet, OptionSource, RunOptions};
pub use ddl::DdlStatement;
pub use error::{PushError, Result};
pub use instance::{Instance, PoolRegistry};
pub use orchestrator::{Orchestrator, PushResult, RunSummary, Target};
pub use workspace::{Lifecycle, Sandbox, WorkspaceOptions};
