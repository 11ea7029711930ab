//! Compiling object differences into executable DDL.
//!
//! [`DdlStatement::compile`] applies per-directory policy to one
//! [`ObjectDiff`]: size-gated unsafe permission, wrapper selection,
//! ALGORITHM/LOCK suppression and one-off session parameters. The result is
//! either SQL run over a pooled connection or a shell command that runs an
//! external wrapper.

mod shellout;

pub use shellout::{escape, interpolate};

use std::collections::HashMap;
use std::fmt;

use mysql_async::prelude::*;
use tokio::process::Command;
use tracing::debug;

use crate::config::OptionSet;
use crate::core::{
    DiffError, DiffType, Flavor, NextAutoInc, ObjectDiff, ObjectKind, PartitioningMode,
    StatementModifiers,
};
use crate::error::{PushError, Result};
use crate::instance::Instance;
use crate::orchestrator::Target;

/// A compiled, executable DDL statement.
#[derive(Debug, Clone)]
pub enum DdlStatement {
    /// SQL executed directly on the target.
    Sql {
        text: String,
        instance: Instance,
        /// Default schema of the connection; empty for database-level DDL.
        schema: String,
        /// One-off session variables for this statement's connection.
        params: Vec<(String, String)>,
    },
    /// External wrapper command run through `/bin/sh -c`.
    Shell { command: String },
}

impl fmt::Display for DdlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DdlStatement::Sql { text, .. } => write!(f, "{};", text),
            DdlStatement::Shell { command } => write!(f, "\\! {}", command),
        }
    }
}

impl DdlStatement {
    /// Compile `diff` for `target`.
    ///
    /// Returns `Ok(None)` when the modifiers turn the difference into a no-op.
    pub async fn compile(
        diff: &ObjectDiff,
        mods: &StatementModifiers,
        target: &Target,
    ) -> Result<Option<DdlStatement>> {
        let opts = &target.options;
        let mut mods = mods.clone();
        let key = diff.object_key();
        let is_table = key.kind == ObjectKind::Table;
        let is_alter = is_table && diff.diff_type() == DiffType::Alter;

        // Database DDL is not schema-scoped.
        let schema = if is_table {
            target.schema_name.as_str()
        } else {
            ""
        };

        let safe_below_size = opts.get_bytes("safe-below-size")?;
        let wrapper_min_size = opts.get_bytes("alter-wrapper-min-size")?;
        let mut size = 0;
        if is_table
            && diff.diff_type() != DiffType::Create
            && (safe_below_size > 0 || wrapper_min_size > 0)
        {
            size = target.instance.table_size(schema, &key.name).await?;
            if size < safe_below_size {
                debug!(
                    "{}: {} is {} bytes, below safe-below-size; allowing unsafe changes",
                    target, key, size
                );
                mods.allow_unsafe = true;
            }
        }

        let mut wrapper = opts.get_str("ddl-wrapper");
        if is_alter && opts.changed("alter-wrapper") && size >= wrapper_min_size {
            wrapper = opts.get_str("alter-wrapper");
            if wrapper_min_size > 0 {
                mods.algorithm_clause.clear();
                mods.lock_clause.clear();
            }
        }

        let text = diff
            .statement(&mods)
            .map_err(|e| render_error(e, opts.changed("safe-below-size")))?;
        if text.is_empty() {
            return Ok(None);
        }

        let mut params = Vec::new();
        if is_alter
            && opts.get_bool("foreign-key-checks")?
            && text.contains("ADD CONSTRAINT")
            && text.contains("FOREIGN KEY")
        {
            params.push(("foreign_key_checks".to_string(), "1".to_string()));
        }

        if wrapper.is_empty() {
            return Ok(Some(DdlStatement::Sql {
                text,
                instance: target.instance.clone(),
                schema: schema.to_string(),
                params,
            }));
        }

        let clauses = diff.clauses(&mods).map_err(|e| render_error(e, true))?;
        let instance = &target.instance;
        let (table, class) = if is_table {
            (key.name.clone(), "TABLE")
        } else {
            (String::new(), "DATABASE")
        };
        let vars: HashMap<&'static str, String> = HashMap::from([
            ("HOST", instance.host().to_string()),
            ("PORT", instance.port().to_string()),
            ("SOCKET", instance.socket().unwrap_or("").to_string()),
            ("SCHEMA", schema.to_string()),
            ("USER", instance.user().to_string()),
            ("PASSWORD", instance.password().to_string()),
            ("ENVIRONMENT", target.environment.clone()),
            ("DDL", text),
            ("CLAUSES", clauses),
            ("NAME", key.name.clone()),
            ("TABLE", table),
            ("SIZE", size.to_string()),
            ("TYPE", diff.diff_type().to_string()),
            ("CLASS", class.to_string()),
            ("CONNOPTS", instance.connect_options().to_string()),
            ("DIRNAME", target.dir_name()),
            ("DIRPATH", target.dir_path.display().to_string()),
        ]);
        let command = interpolate(&wrapper, &vars)?;
        Ok(Some(DdlStatement::Shell { command }))
    }

    /// True if this statement runs an external command.
    pub fn is_shell_out(&self) -> bool {
        matches!(self, DdlStatement::Shell { .. })
    }

    /// Run the statement.
    pub async fn execute(&self) -> Result<()> {
        match self {
            DdlStatement::Sql {
                text,
                instance,
                schema,
                params,
            } => {
                let params: Vec<(&str, &str)> = params
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                let pool = instance.pool(schema, &params);
                let mut conn = pool
                    .get_conn()
                    .await
                    .map_err(|e| PushError::pool(e, format!("executing DDL on {}", instance)))?;
                conn.query_drop(text.as_str()).await?;
                Ok(())
            }
            DdlStatement::Shell { command } => {
                debug!("Running wrapper: {}", command);
                let status = Command::new("/bin/sh").arg("-c").arg(command).status().await?;
                if status.success() {
                    Ok(())
                } else {
                    Err(PushError::Wrapper {
                        command: command.clone(),
                        status: status.to_string(),
                    })
                }
            }
        }
    }
}

fn render_error(err: DiffError, safe_below_size_set: bool) -> PushError {
    match err {
        DiffError::Forbidden { statement, .. } => {
            let remediation = if safe_below_size_set {
                "--allow-unsafe".to_string()
            } else {
                "--allow-unsafe or --safe-below-size".to_string()
            };
            PushError::ForbiddenDiff {
                statement,
                remediation,
            }
        }
        DiffError::Unsupported { name, reason } => PushError::UnsupportedDiff { name, reason },
    }
}

/// Statement modifiers for a directory's options on an instance of `flavor`.
pub fn statement_modifiers(opts: &OptionSet, flavor: Flavor) -> Result<StatementModifiers> {
    let partitioning = match opts
        .get_enum("partitioning", &["modify", "keep", "remove"])?
        .as_str()
    {
        "keep" => PartitioningMode::Keep,
        "remove" => PartitioningMode::Remove,
        _ => PartitioningMode::Modify,
    };
    let exact_match = opts.get_bool("exact-match")?;
    Ok(StatementModifiers {
        next_auto_inc: NextAutoInc::IfIncreased,
        partitioning,
        allow_unsafe: opts.get_bool("allow-unsafe")?,
        algorithm_clause: opts.get_enum(
            "alter-algorithm",
            &["", "inplace", "copy", "instant", "nocopy", "default"],
        )?,
        lock_clause: opts.get_enum("alter-lock", &["", "none", "shared", "exclusive", "default"])?,
        strict_index_order: exact_match,
        strict_foreign_key_naming: exact_match,
        lax_column_order: opts.get_bool("lax-column-order")?,
        flavor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use crate::config::OptionSource;
    use crate::core::schema::tests::orders_table;
    use crate::core::{Column, TableDiff};
    use crate::fs::LogicalSchema;
    use crate::instance::PoolRegistry;

    fn target(options: &[(&str, &str)]) -> Target {
        let mut opts = OptionSet::new();
        for (name, value) in options {
            opts.set(name, *value, OptionSource::CommandLine).unwrap();
        }
        let instance = Instance::new(
            "db1",
            3306,
            None,
            "root",
            "",
            "",
            Arc::new(PoolRegistry::new()),
        )
        .unwrap();
        Target {
            instance,
            dir_path: PathBuf::from("/schemas/shop"),
            options: opts,
            environment: "production".to_string(),
            schema_name: "shop".to_string(),
            logical_schema: Arc::new(LogicalSchema::default()),
        }
    }

    fn add_column_diff() -> ObjectDiff {
        let from = orders_table();
        let mut to = orders_table();
        to.columns.push(Column::new("shipped_at", "datetime"));
        let to = to.with_generated_create();
        ObjectDiff::Table(TableDiff::alter(from, to))
    }

    fn drop_column_diff() -> ObjectDiff {
        let from = orders_table();
        let mut to = orders_table();
        to.columns.retain(|c| c.name != "note");
        let to = to.with_generated_create();
        ObjectDiff::Table(TableDiff::alter(from, to))
    }

    #[tokio::test]
    async fn test_compile_sql() {
        let t = target(&[]);
        let mods = statement_modifiers(&t.options, Flavor::UNKNOWN).unwrap();
        let stmt = DdlStatement::compile(&add_column_diff(), &mods, &t)
            .await
            .unwrap()
            .unwrap();
        assert!(!stmt.is_shell_out());
        assert_eq!(
            stmt.to_string(),
            "ALTER TABLE `orders` ADD COLUMN `shipped_at` datetime;"
        );
    }

    #[tokio::test]
    async fn test_compile_noop_returns_none() {
        let t = target(&[]);
        let mods = statement_modifiers(&t.options, Flavor::UNKNOWN).unwrap();
        let diff = ObjectDiff::Table(TableDiff::alter(orders_table(), orders_table()));
        assert!(DdlStatement::compile(&diff, &mods, &t).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_compile_wrapper_substitution() {
        let t = target(&[("alter-wrapper", "mytool --host={HOST} --table={TABLE}")]);
        let mods = statement_modifiers(&t.options, Flavor::UNKNOWN).unwrap();
        let stmt = DdlStatement::compile(&add_column_diff(), &mods, &t)
            .await
            .unwrap()
            .unwrap();
        assert!(stmt.is_shell_out());
        match &stmt {
            DdlStatement::Shell { command } => {
                assert_eq!(command, "mytool --host=db1 --table=orders")
            }
            other => panic!("expected shell statement, got {:?}", other),
        }
        assert_eq!(stmt.to_string(), "\\! mytool --host=db1 --table=orders");
    }

    #[tokio::test]
    async fn test_compile_unknown_wrapper_variable() {
        let t = target(&[("ddl-wrapper", "mytool {BOGUS}")]);
        let mods = statement_modifiers(&t.options, Flavor::UNKNOWN).unwrap();
        let err = DdlStatement::compile(&add_column_diff(), &mods, &t)
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::Config(_)));
    }

    #[tokio::test]
    async fn test_compile_forbidden_names_remediation() {
        let t = target(&[]);
        let mods = statement_modifiers(&t.options, Flavor::UNKNOWN).unwrap();
        let err = DdlStatement::compile(&drop_column_diff(), &mods, &t)
            .await
            .unwrap_err();
        match &err {
            PushError::ForbiddenDiff {
                statement,
                remediation,
            } => {
                assert_eq!(statement, "ALTER TABLE `orders` DROP COLUMN `note`");
                assert_eq!(remediation, "--allow-unsafe or --safe-below-size");
            }
            other => panic!("expected forbidden error, got {:?}", other),
        }
        assert!(err.to_string().contains("DROP COLUMN `note`"));
        assert_eq!(err.exit_code(), crate::error::EXIT_CONFIG_ERROR);
    }

    #[tokio::test]
    async fn test_compile_allow_unsafe() {
        let t = target(&[("allow-unsafe", "true")]);
        let mods = statement_modifiers(&t.options, Flavor::UNKNOWN).unwrap();
        let stmt = DdlStatement::compile(&drop_column_diff(), &mods, &t)
            .await
            .unwrap();
        assert!(stmt.is_some());
    }

    #[tokio::test]
    async fn test_compile_database_diff_is_unscoped() {
        use crate::core::{DatabaseDiff, SchemaOptions};
        let t = target(&[]);
        let mods = statement_modifiers(&t.options, Flavor::UNKNOWN).unwrap();
        let diff = ObjectDiff::Database(DatabaseDiff {
            from: None,
            to: Some(SchemaOptions {
                name: "shop".to_string(),
                char_set: String::new(),
                collation: String::new(),
            }),
        });
        let stmt = DdlStatement::compile(&diff, &mods, &t).await.unwrap().unwrap();
        match stmt {
            DdlStatement::Sql { schema, .. } => assert!(schema.is_empty()),
            other => panic!("expected sql statement, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_compile_foreign_key_checks_param() {
        use crate::core::ForeignKey;
        let t = target(&[("foreign-key-checks", "true")]);
        let mods = statement_modifiers(&t.options, Flavor::UNKNOWN).unwrap();
        let from = orders_table();
        let mut to = orders_table();
        to.foreign_keys.push(ForeignKey {
            name: "fk_customer".to_string(),
            columns: vec!["customer_id".to_string()],
            referenced_schema: String::new(),
            referenced_table: "customers".to_string(),
            referenced_columns: vec!["id".to_string()],
            update_rule: "RESTRICT".to_string(),
            delete_rule: "CASCADE".to_string(),
        });
        let to = to.with_generated_create();
        let diff = ObjectDiff::Table(TableDiff::alter(from, to));
        let stmt = DdlStatement::compile(&diff, &mods, &t).await.unwrap().unwrap();
        match stmt {
            DdlStatement::Sql { params, .. } => assert_eq!(
                params,
                vec![("foreign_key_checks".to_string(), "1".to_string())]
            ),
            other => panic!("expected sql statement, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_shell_failure() {
        let stmt = DdlStatement::Shell {
            command: "exit 3".to_string(),
        };
        let err = stmt.execute().await.unwrap_err();
        assert!(matches!(err, PushError::Wrapper { .. }));
        assert!(DdlStatement::Shell {
            command: "true".to_string()
        }
        .execute()
        .await
        .is_ok());
    }

    #[test]
    fn test_statement_modifiers() {
        let mut opts = OptionSet::new();
        opts.set("partitioning", "remove", OptionSource::CommandLine).unwrap();
        opts.set("exact-match", "true", OptionSource::CommandLine).unwrap();
        opts.set("alter-algorithm", "INPLACE", OptionSource::CommandLine).unwrap();
        let mods = statement_modifiers(&opts, Flavor::UNKNOWN).unwrap();
        assert_eq!(mods.partitioning, PartitioningMode::Remove);
        assert!(mods.strict_index_order);
        assert!(mods.strict_foreign_key_naming);
        assert_eq!(mods.algorithm_clause, "inplace");
        assert!(!mods.allow_unsafe);
    }
}
