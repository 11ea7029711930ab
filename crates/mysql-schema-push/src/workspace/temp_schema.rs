//! Sandbox as a scratch schema on an existing instance.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use mysql_async::prelude::*;
use tracing::{debug, warn};

use super::{CleanupAction, Sandbox, StatementError, WorkspaceOptions};
use crate::core::Schema;
use crate::error::{PushError, Result};
use crate::fs::Statement;
use crate::instance::{AdvisoryLock, Instance};

/// A locked scratch schema on an instance.
#[derive(Debug)]
pub struct TempSchema {
    instance: Instance,
    schema: String,
    cleanup: CleanupAction,
    lock: Option<AdvisoryLock>,
    released: bool,
}

impl TempSchema {
    /// Lock the schema name, then create the schema or empty the existing one.
    ///
    /// An existing schema whose tables contain rows is never touched; the
    /// acquisition fails and the lock is released.
    pub async fn acquire(instance: Instance, options: &WorkspaceOptions) -> Result<Self> {
        let lock = instance
            .get_lock(&options.lock_name(), options.lock_wait)
            .await?;
        let schema = options.schema_name.clone();

        let prepared = async {
            if instance.schema_exists(&schema).await? {
                instance.drop_tables(&schema).await?;
                instance
                    .set_schema_defaults(&schema, &options.char_set, &options.collation)
                    .await
            } else {
                instance
                    .create_schema(&schema, &options.char_set, &options.collation)
                    .await
            }
        }
        .await;

        if let Err(e) = prepared {
            if let Err(le) = lock.release().await {
                warn!("{}: error releasing workspace lock: {}", instance, le);
            }
            return Err(e);
        }

        debug!("{}: acquired workspace schema {}", instance, schema);
        Ok(Self {
            instance,
            schema,
            cleanup: options.cleanup,
            lock: Some(lock),
            released: false,
        })
    }
}

#[async_trait]
impl Sandbox for TempSchema {
    fn instance(&self) -> &Instance {
        &self.instance
    }

    fn schema_name(&self) -> &str {
        &self.schema
    }

    async fn execute(&self, statements: &[Statement], concurrency: usize) -> Vec<StatementError> {
        let pool = self.instance.pool(&self.schema, &[]);
        stream::iter(statements.iter().cloned())
            .map(|statement| {
                let pool = pool.clone();
                async move {
                    let outcome = async {
                        let mut conn = pool
                            .get_conn()
                            .await
                            .map_err(|e| PushError::pool(e, "getting workspace connection"))?;
                        conn.query_drop(statement.text.as_str()).await?;
                        Ok::<(), PushError>(())
                    }
                    .await;
                    outcome.err().map(|error| StatementError { statement, error })
                }
            })
            .buffer_unordered(concurrency.max(1))
            .filter_map(|failure| async move { failure })
            .collect()
            .await
    }

    async fn introspect(&self) -> Result<Schema> {
        self.instance
            .introspect_schema(&self.schema)
            .await?
            .ok_or_else(|| {
                PushError::workspace(format!(
                    "{}: workspace schema {} disappeared",
                    self.instance, self.schema
                ))
            })
    }

    async fn release(&mut self) -> Result<()> {
        if self.released {
            return Err(PushError::workspace(format!(
                "{}: workspace schema {} already released",
                self.instance, self.schema
            )));
        }
        self.released = true;

        let cleaned = match self.cleanup {
            CleanupAction::None => self.instance.drop_tables(&self.schema).await,
            _ => self.instance.drop_schema(&self.schema).await,
        };
        let unlocked = match self.lock.take() {
            Some(lock) => lock.release().await,
            None => Ok(()),
        };
        cleaned?;
        unlocked
    }
}
