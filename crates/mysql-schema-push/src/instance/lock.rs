//! Named advisory locks (`GET_LOCK` / `RELEASE_LOCK`).
//!
//! A lock is bound to the session that obtained it, so each lock holds its own
//! connection outside any pool. Dropping an unreleased lock closes that
//! connection, which makes the server release the lock.

use std::time::{Duration, Instant};

use mysql_async::prelude::*;
use mysql_async::Conn;
use tracing::{debug, warn};

use super::Instance;
use crate::error::{PushError, Result};

/// Interval between `GET_LOCK` attempts.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Maximum lock name length accepted by the server.
const MAX_LOCK_NAME_LEN: usize = 64;

/// A held advisory lock.
pub struct AdvisoryLock {
    name: String,
    instance: String,
    conn: Option<Conn>,
}

impl std::fmt::Debug for AdvisoryLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdvisoryLock")
            .field("name", &self.name)
            .field("instance", &self.instance)
            .field("held", &self.conn.is_some())
            .finish()
    }
}

impl AdvisoryLock {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release the lock and close its connection.
    pub async fn release(mut self) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Err(PushError::workspace(format!(
                "lock {} on {} already released",
                self.name, self.instance
            )));
        };
        let released: Result<Option<Option<i64>>> = conn
            .exec_first("SELECT RELEASE_LOCK(?)", (self.name.as_str(),))
            .await
            .map_err(PushError::from);
        if let Err(e) = conn.disconnect().await {
            warn!("{}: error closing lock connection: {}", self.instance, e);
        }
        match released? {
            Some(Some(1)) => {
                debug!("{}: released lock {}", self.instance, self.name);
                Ok(())
            }
            _ => Err(PushError::workspace(format!(
                "lock {} on {} was not held at release",
                self.name, self.instance
            ))),
        }
    }
}

impl Instance {
    /// Obtain a named advisory lock, polling every [`LOCK_POLL_INTERVAL`] up to `max_wait`.
    pub async fn get_lock(&self, name: &str, max_wait: Duration) -> Result<AdvisoryLock> {
        let name: String = name.chars().take(MAX_LOCK_NAME_LEN).collect();
        let mut conn = Conn::new(self.opts("", &[]))
            .await
            .map_err(|e| PushError::pool(e, format!("opening lock connection to {}", self)))?;

        let start = Instant::now();
        loop {
            let got: Option<Option<i64>> = conn
                .exec_first("SELECT GET_LOCK(?, 0)", (name.as_str(),))
                .await?;
            if got.flatten() == Some(1) {
                debug!("{}: obtained lock {}", self, name);
                return Ok(AdvisoryLock {
                    name,
                    instance: self.to_string(),
                    conn: Some(conn),
                });
            }
            let waited = start.elapsed();
            if waited >= max_wait {
                if let Err(e) = conn.disconnect().await {
                    warn!("{}: error closing lock connection: {}", self, e);
                }
                return Err(PushError::LockTimeout {
                    instance: self.to_string(),
                    waited,
                });
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }
}
