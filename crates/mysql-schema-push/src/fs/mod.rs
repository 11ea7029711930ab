//! Directory model: option files, `.sql` definitions and subdirectories.

mod statement;

pub use statement::{split_statements, Statement, StatementKind};

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::config::{OptionFile, OptionSet, OPTION_FILE_NAME};
use crate::core::Flavor;
use crate::error::{PushError, Result};
use crate::instance::{Instance, PoolRegistry};

/// Desired object definitions for one schema, read from `.sql` files.
///
/// CREATEs are keyed by table name. ALTERs are only produced internally (the
/// verifier replays them) and run after every CREATE, in order.
#[derive(Debug, Clone, Default)]
pub struct LogicalSchema {
    pub char_set: String,
    pub collation: String,
    pub creates: BTreeMap<String, Statement>,
    pub alters: Vec<Statement>,
}

impl LogicalSchema {
    pub fn new(char_set: impl Into<String>, collation: impl Into<String>) -> Self {
        Self {
            char_set: char_set.into(),
            collation: collation.into(),
            ..Default::default()
        }
    }

    /// Add one statement from a file. Only unqualified CREATE TABLE is accepted.
    pub fn add_statement(&mut self, stmt: Statement) -> Result<()> {
        match &stmt.kind {
            StatementKind::CreateTable { schema: Some(_), .. } => Err(PushError::config(format!(
                "{}: CREATE TABLE must not be schema-qualified",
                stmt.location()
            ))),
            StatementKind::CreateTable { schema: None, table } => {
                if let Some(existing) = self.creates.get(table) {
                    return Err(PushError::config(format!(
                        "table `{}` is defined twice: {} and {}",
                        table,
                        existing.location(),
                        stmt.location()
                    )));
                }
                self.creates.insert(table.clone(), stmt);
                Ok(())
            }
            StatementKind::Other => Err(PushError::config(format!(
                "{}: only CREATE TABLE statements are supported",
                stmt.location()
            ))),
        }
    }

    /// Add an ALTER to run after the CREATEs.
    pub fn add_alter(&mut self, stmt: Statement) {
        self.alters.push(stmt);
    }

    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.alters.is_empty()
    }
}

/// One directory of the definition tree.
#[derive(Debug, Clone)]
pub struct Dir {
    pub path: PathBuf,
    /// Effective options: inherited from the parent, overridden by this directory's file.
    pub options: OptionSet,
    pub option_file: Option<OptionFile>,
    /// Definitions from `*.sql` files, None if the directory has none.
    pub logical_schema: Option<LogicalSchema>,
    pub subdirs: Vec<PathBuf>,
    pub environment: String,
}

impl fmt::Display for Dir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl Dir {
    /// Load a directory, inheriting `parent` options.
    pub fn load(path: impl AsRef<Path>, parent: &OptionSet, environment: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_dir() {
            return Err(PushError::config(format!(
                "{} is not a directory",
                path.display()
            )));
        }

        let mut options = parent.clone();
        let option_path = path.join(OPTION_FILE_NAME);
        let option_file = OptionFile::load(&option_path)?;
        if let Some(file) = &option_file {
            options.apply_file(file, &option_path.display().to_string(), environment)?;
        }

        let mut sql_files = Vec::new();
        let mut subdirs = Vec::new();
        for entry in std::fs::read_dir(&path)? {
            let entry = entry?;
            let entry_path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                subdirs.push(entry_path);
            } else if file_type.is_file() && name.ends_with(".sql") {
                sql_files.push(entry_path);
            }
        }
        sql_files.sort();
        subdirs.sort();

        let logical_schema = if sql_files.is_empty() {
            None
        } else {
            let mut logical = LogicalSchema::new(
                options.get_str("default-character-set"),
                options.get_str("default-collation"),
            );
            for file in &sql_files {
                let contents = std::fs::read_to_string(file)?;
                for stmt in split_statements(&contents, file) {
                    logical.add_statement(stmt)?;
                }
            }
            debug!(
                "{}: {} table definitions in {} files",
                path.display(),
                logical.creates.len(),
                sql_files.len()
            );
            Some(logical)
        };

        Ok(Self {
            path,
            options,
            option_file,
            logical_schema,
            subdirs,
            environment: environment.to_string(),
        })
    }

    /// Load each subdirectory, inheriting this directory's options.
    pub fn subdirectories(&self) -> Vec<Result<Dir>> {
        self.subdirs
            .iter()
            .map(|p| Dir::load(p, &self.options, &self.environment))
            .collect()
    }

    /// True if `host` is configured for the active environment.
    pub fn has_host(&self) -> bool {
        !self.options.get_str("host").is_empty()
    }

    /// True if `schema` is configured.
    pub fn has_schema(&self) -> bool {
        !self.options.get_str("schema").is_empty()
    }

    /// Environments, other than the active one, that define `host` in this directory's file.
    pub fn host_in_other_environments(&self) -> Vec<String> {
        self.option_file
            .as_ref()
            .map(|f| f.other_environments_setting(&self.environment, "host"))
            .unwrap_or_default()
    }

    /// Instances named by `host`, one per comma-separated entry.
    ///
    /// Entries may carry a `:port` suffix. With `first-only`, only the first
    /// entry is returned.
    pub fn instances(&self, registry: &Arc<PoolRegistry>) -> Result<Vec<Instance>> {
        let opts = &self.options;
        let default_port: u16 = opts
            .get_str("port")
            .parse()
            .map_err(|_| PushError::config(format!("{}: invalid port", self)))?;
        let socket = opts.get_str("socket");
        let flavor = Flavor::parse(&opts.get_str("flavor"));

        let mut instances = Vec::new();
        for entry in opts.get_str("host").split(',').map(str::trim).filter(|h| !h.is_empty()) {
            let (host, port) = match entry.rsplit_once(':') {
                Some((h, p)) => {
                    let port = p.parse::<u16>().map_err(|_| {
                        PushError::config(format!("{}: invalid port in host \"{}\"", self, entry))
                    })?;
                    (h, port)
                }
                None => (entry, default_port),
            };
            let socket = if host == "localhost" && !socket.is_empty() {
                Some(socket.clone())
            } else {
                None
            };
            let instance = Instance::new(
                host,
                port,
                socket,
                opts.get_str("user"),
                opts.get_str("password"),
                &opts.get_str("connect-options"),
                registry.clone(),
            )?;
            if flavor.known() {
                instance.set_flavor(flavor);
            }
            instances.push(instance);
            if opts.get_bool("first-only")? {
                break;
            }
        }
        Ok(instances)
    }

    /// Schema names for `instance`: a comma-separated list, or `*` for all non-system schemas.
    pub async fn schema_names(&self, instance: &Instance) -> Result<Vec<String>> {
        let raw = self.options.get_str("schema");
        if raw == "*" {
            let temp = self.options.get_str("temp-schema");
            let names = instance.schema_names().await?;
            return Ok(names.into_iter().filter(|n| *n != temp).collect());
        }
        Ok(raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_load_reads_options_and_sql() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), ".push.yaml", "host: db1,db2:3307\nschema: shop\n");
        write(tmp.path(), "orders.sql", "CREATE TABLE orders (id int);\n");
        write(tmp.path(), "customers.sql", "CREATE TABLE customers (id int);\n");
        fs::create_dir(tmp.path().join("archive")).unwrap();

        let dir = Dir::load(tmp.path(), &OptionSet::new(), "production").unwrap();
        assert!(dir.has_host());
        assert!(dir.has_schema());
        let logical = dir.logical_schema.as_ref().unwrap();
        assert_eq!(
            logical.creates.keys().cloned().collect::<Vec<_>>(),
            vec!["customers".to_string(), "orders".to_string()]
        );
        assert_eq!(dir.subdirs.len(), 1);

        let registry = Arc::new(PoolRegistry::new());
        let instances = dir.instances(&registry).unwrap();
        let names: Vec<String> = instances.iter().map(|i| i.to_string()).collect();
        assert_eq!(names, vec!["db1:3306", "db2:3307"]);
    }

    #[test]
    fn test_first_only() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), ".push.yaml", "host: db1,db2\nfirst-only: true\n");
        let dir = Dir::load(tmp.path(), &OptionSet::new(), "production").unwrap();
        let instances = dir.instances(&Arc::new(PoolRegistry::new())).unwrap();
        assert_eq!(instances.len(), 1);
    }

    #[test]
    fn test_children_inherit_options() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), ".push.yaml", "host: db1\nuser: app\n");
        let child = tmp.path().join("shop");
        fs::create_dir(&child).unwrap();
        write(&child, ".push.yaml", "schema: shop\nuser: shop_admin\n");

        let root = Dir::load(tmp.path(), &OptionSet::new(), "production").unwrap();
        assert!(!root.has_schema());
        let children: Vec<Dir> = root.subdirectories().into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].options.get_str("host"), "db1");
        assert_eq!(children[0].options.get_str("user"), "shop_admin");
    }

    #[test]
    fn test_duplicate_table_definition_is_error() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.sql", "CREATE TABLE orders (id int);\n");
        write(tmp.path(), "b.sql", "CREATE TABLE orders (id bigint);\n");
        let err = Dir::load(tmp.path(), &OptionSet::new(), "production").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("defined twice"));
        assert!(msg.contains("a.sql:1") && msg.contains("b.sql:1"));
    }

    #[test]
    fn test_non_create_statement_is_error() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "data.sql", "INSERT INTO orders VALUES (1);\n");
        assert!(Dir::load(tmp.path(), &OptionSet::new(), "production").is_err());
    }

    #[test]
    fn test_host_in_other_environments() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            ".push.yaml",
            "schema: shop\nenvironments:\n  development:\n    host: localhost\n",
        );
        let dir = Dir::load(tmp.path(), &OptionSet::new(), "production").unwrap();
        assert!(!dir.has_host());
        assert_eq!(dir.host_in_other_environments(), vec!["development".to_string()]);
    }

    #[tokio::test]
    async fn test_schema_names_from_list() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), ".push.yaml", "host: db1\nschema: shop, shop_archive\n");
        let dir = Dir::load(tmp.path(), &OptionSet::new(), "production").unwrap();
        let inst = &dir.instances(&Arc::new(PoolRegistry::new())).unwrap()[0];
        assert_eq!(
            dir.schema_names(inst).await.unwrap(),
            vec!["shop".to_string(), "shop_archive".to_string()]
        );
    }
}
