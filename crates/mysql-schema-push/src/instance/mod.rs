//! Database instance handles and connection pooling.
//!
//! An [`Instance`] describes one MySQL-compatible server. Connection pools are
//! created lazily per (schema, session parameters) combination and cached in a
//! [`PoolRegistry`] that the caller owns and shares between instances.

mod introspect;
mod lock;

pub use lock::{AdvisoryLock, LOCK_POLL_INTERVAL};

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use mysql_async::prelude::*;
use mysql_async::{Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::parse_connect_options;
use crate::core::schema::quote_ident;
use crate::core::Flavor;
use crate::error::{PushError, Result};

/// Maximum connections per pool.
const MAX_POOL_CONNECTIONS: usize = 10;

/// Schemas that are never treated as user schemas.
const SYSTEM_SCHEMAS: &[&str] = &[
    "information_schema",
    "performance_schema",
    "mysql",
    "sys",
];

/// Cache of connection pools keyed by (driver, DSN).
#[derive(Default)]
pub struct PoolRegistry {
    pools: Mutex<HashMap<(String, String), Pool>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached pool for this key, building it on first use.
    ///
    /// Pool construction is lazy in mysql_async, so no network I/O happens
    /// while the registry lock is held.
    pub fn get_or_create(&self, driver: &str, dsn: &str, build: impl FnOnce() -> Pool) -> Pool {
        let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        pools
            .entry((driver.to_string(), dsn.to_string()))
            .or_insert_with(build)
            .clone()
    }

    /// Number of cached pools.
    pub fn len(&self) -> usize {
        self.pools.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Disconnect and forget every cached pool.
    pub async fn disconnect_all(&self) {
        let pools: Vec<Pool> = {
            let mut guard = self.pools.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain().map(|(_, pool)| pool).collect()
        };
        for pool in pools {
            if let Err(e) = pool.disconnect().await {
                warn!("Error disconnecting pool: {}", e);
            }
        }
    }
}

/// A MySQL-compatible database server.
#[derive(Clone)]
pub struct Instance {
    host: String,
    port: u16,
    socket: Option<String>,
    user: String,
    password: String,
    connect_options: String,
    session_vars: Vec<(String, String)>,
    registry: Arc<PoolRegistry>,
    flavor: Arc<OnceCell<Flavor>>,
}

impl fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pools", &self.len())
            .finish()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("socket", &self.socket)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("connect_options", &self.connect_options)
            .finish()
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.socket {
            Some(socket) => write!(f, "{}:{}", self.host, socket),
            None => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port && self.socket == other.socket
    }
}

impl Eq for Instance {}

impl Instance {
    /// Create an instance handle. `connect_options` is validated here.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        socket: Option<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        connect_options: &str,
        registry: Arc<PoolRegistry>,
    ) -> Result<Self> {
        let session_vars = parse_connect_options(connect_options)?;
        Ok(Self {
            host: host.into(),
            port,
            socket: socket.filter(|s| !s.is_empty()),
            user: user.into(),
            password: password.into(),
            connect_options: connect_options.to_string(),
            session_vars,
            registry,
            flavor: Arc::new(OnceCell::new()),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket(&self) -> Option<&str> {
        self.socket.as_deref()
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Pool registry shared by this instance's handles.
    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    /// Raw `connect-options` string as configured.
    pub fn connect_options(&self) -> &str {
        &self.connect_options
    }

    /// Connection options for `schema` with extra session `params`.
    ///
    /// Sessions default to `foreign_key_checks=0`; configured connect-options
    /// and then `params` override that.
    pub fn opts(&self, schema: &str, params: &[(&str, &str)]) -> Opts {
        let mut vars: Vec<(String, String)> = vec![("foreign_key_checks".into(), "0".into())];
        let overrides = self
            .session_vars
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .chain(params.iter().copied());
        for (name, value) in overrides {
            match vars.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
                Some(existing) => existing.1 = value.to_string(),
                None => vars.push((name.to_string(), value.to_string())),
            }
        }
        let assignments: Vec<String> = vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        let init = format!("SET SESSION {}", assignments.join(", "));

        let mut builder = OptsBuilder::default()
            .ip_or_hostname(self.host.clone())
            .tcp_port(self.port)
            .user(Some(self.user.clone()))
            .pass(Some(self.password.clone()))
            .init(vec![init]);
        if let Some(socket) = &self.socket {
            builder = builder.socket(Some(socket.clone()));
        }
        if !schema.is_empty() {
            builder = builder.db_name(Some(schema.to_string()));
        }

        let constraints = PoolConstraints::new(0, MAX_POOL_CONNECTIONS).unwrap_or_default();
        builder.pool_opts(PoolOpts::new().with_constraints(constraints)).into()
    }

    /// Connection pool for `schema` with extra session `params`, cached in the registry.
    pub fn pool(&self, schema: &str, params: &[(&str, &str)]) -> Pool {
        let mut sorted: Vec<&(&str, &str)> = params.iter().collect();
        sorted.sort();
        let param_key: Vec<String> = sorted.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let dsn = format!(
            "{}:{}@{}/{}?{}",
            self.user,
            self.password,
            self,
            schema,
            param_key.join("&")
        );
        self.registry
            .get_or_create("mysql", &dsn, || Pool::new(self.opts(schema, params)))
    }

    /// True if a connection can be established and pinged.
    pub async fn can_connect(&self) -> bool {
        let pool = self.pool("", &[]);
        match pool.get_conn().await {
            Ok(mut conn) => conn.ping().await.is_ok(),
            Err(e) => {
                debug!("{}: connection failed: {}", self, e);
                false
            }
        }
    }

    /// Pin the flavor instead of detecting it from the server.
    pub fn set_flavor(&self, flavor: Flavor) {
        if self.flavor.set(flavor).is_err() {
            debug!("{}: flavor already known", self);
        }
    }

    /// Server flavor, detected once from `@@version` and `@@version_comment`.
    pub async fn flavor(&self) -> Result<Flavor> {
        let flavor = self
            .flavor
            .get_or_try_init(|| async {
                let mut conn = self
                    .pool("", &[])
                    .get_conn()
                    .await
                    .map_err(|e| PushError::pool(e, format!("connecting to {}", self)))?;
                let row: Option<(String, String)> = conn
                    .query_first("SELECT @@version, @@version_comment")
                    .await?;
                let (version, comment) = row.unwrap_or_default();
                let flavor = Flavor::from_server_version(&version, &comment);
                debug!("{}: detected flavor {}", self, flavor);
                Ok::<Flavor, PushError>(flavor)
            })
            .await?;
        Ok(*flavor)
    }

    /// True if the named schema exists.
    pub async fn schema_exists(&self, schema: &str) -> Result<bool> {
        let mut conn = self
            .pool("", &[])
            .get_conn()
            .await
            .map_err(|e| PushError::pool(e, format!("connecting to {}", self)))?;
        let row: Option<String> = conn
            .exec_first(
                "SELECT SCHEMA_NAME FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = ?",
                (schema,),
            )
            .await?;
        Ok(row.is_some())
    }

    /// Names of all non-system schemas, sorted.
    pub async fn schema_names(&self) -> Result<Vec<String>> {
        let mut conn = self
            .pool("", &[])
            .get_conn()
            .await
            .map_err(|e| PushError::pool(e, format!("connecting to {}", self)))?;
        let names: Vec<String> = conn
            .query("SELECT SCHEMA_NAME FROM information_schema.SCHEMATA ORDER BY SCHEMA_NAME")
            .await?;
        Ok(names
            .into_iter()
            .filter(|n| !SYSTEM_SCHEMAS.contains(&n.to_lowercase().as_str()))
            .collect())
    }

    /// Create a schema with optional default charset and collation.
    pub async fn create_schema(&self, schema: &str, char_set: &str, collation: &str) -> Result<()> {
        let mut sql = format!("CREATE DATABASE {}", quote_ident(schema));
        if !char_set.is_empty() {
            sql.push_str(&format!(" CHARACTER SET {}", char_set));
        }
        if !collation.is_empty() {
            sql.push_str(&format!(" COLLATE {}", collation));
        }
        let mut conn = self
            .pool("", &[])
            .get_conn()
            .await
            .map_err(|e| PushError::pool(e, format!("connecting to {}", self)))?;
        conn.query_drop(&sql).await?;
        info!("{}: created schema {}", self, schema);
        Ok(())
    }

    /// Change a schema's default charset and collation; empty values are left alone.
    pub async fn set_schema_defaults(&self, schema: &str, char_set: &str, collation: &str) -> Result<()> {
        if char_set.is_empty() && collation.is_empty() {
            return Ok(());
        }
        let mut sql = format!("ALTER DATABASE {}", quote_ident(schema));
        if !char_set.is_empty() {
            sql.push_str(&format!(" CHARACTER SET {}", char_set));
        }
        if !collation.is_empty() {
            sql.push_str(&format!(" COLLATE {}", collation));
        }
        let mut conn = self
            .pool("", &[])
            .get_conn()
            .await
            .map_err(|e| PushError::pool(e, format!("connecting to {}", self)))?;
        conn.query_drop(&sql).await?;
        Ok(())
    }

    /// Drop a schema. Fails without dropping anything if any table has rows.
    pub async fn drop_schema(&self, schema: &str) -> Result<()> {
        self.drop_tables(schema).await?;
        let mut conn = self
            .pool("", &[])
            .get_conn()
            .await
            .map_err(|e| PushError::pool(e, format!("connecting to {}", self)))?;
        conn.query_drop(format!("DROP DATABASE {}", quote_ident(schema)))
            .await?;
        info!("{}: dropped schema {}", self, schema);
        Ok(())
    }

    /// Drop every table in a schema. Fails without dropping anything if any table has rows.
    pub async fn drop_tables(&self, schema: &str) -> Result<()> {
        let tables = self.table_names(schema).await?;
        for table in &tables {
            if self.table_has_rows(schema, table).await? {
                return Err(PushError::workspace(format!(
                    "{}: table {}.{} has rows; refusing to drop it",
                    self,
                    quote_ident(schema),
                    quote_ident(table)
                )));
            }
        }
        if tables.is_empty() {
            return Ok(());
        }
        let mut conn = self
            .pool(schema, &[])
            .get_conn()
            .await
            .map_err(|e| PushError::pool(e, format!("connecting to {}", self)))?;
        for table in &tables {
            conn.query_drop(format!("DROP TABLE {}", quote_ident(table)))
                .await?;
        }
        debug!("{}: dropped {} tables in {}", self, tables.len(), schema);
        Ok(())
    }

    /// Base table names in a schema, sorted.
    pub async fn table_names(&self, schema: &str) -> Result<Vec<String>> {
        let mut conn = self
            .pool("", &[])
            .get_conn()
            .await
            .map_err(|e| PushError::pool(e, format!("connecting to {}", self)))?;
        let names: Vec<String> = conn
            .exec(
                "SELECT TABLE_NAME FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME",
                (schema,),
            )
            .await?;
        Ok(names)
    }

    /// True if the table contains at least one row.
    pub async fn table_has_rows(&self, schema: &str, table: &str) -> Result<bool> {
        let mut conn = self
            .pool("", &[])
            .get_conn()
            .await
            .map_err(|e| PushError::pool(e, format!("connecting to {}", self)))?;
        let row: Option<u8> = conn
            .query_first(format!(
                "SELECT 1 FROM {}.{} LIMIT 1",
                quote_ident(schema),
                quote_ident(table)
            ))
            .await?;
        Ok(row.is_some())
    }

    /// Table size in bytes (data plus indexes). Tables without rows are size 0.
    pub async fn table_size(&self, schema: &str, table: &str) -> Result<u64> {
        if !self.table_has_rows(schema, table).await? {
            return Ok(0);
        }
        let mut conn = self
            .pool("", &[])
            .get_conn()
            .await
            .map_err(|e| PushError::pool(e, format!("connecting to {}", self)))?;
        let size: Option<Option<u64>> = conn
            .exec_first(
                "SELECT DATA_LENGTH + INDEX_LENGTH FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?",
                (schema, table),
            )
            .await?;
        Ok(size.flatten().unwrap_or(0))
    }
}
