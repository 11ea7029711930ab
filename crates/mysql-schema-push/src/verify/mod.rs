//! Workspace replay verification of generated ALTERs.
//!
//! Before ALTERs touch a live schema, each altered table is recreated in a
//! sandbox from its current definition, the ALTER is replayed, and the result
//! is compared with the desired definition:
//!
//! 1. Render the from-side CREATE and the ALTER with exact-comparison modifiers
//! 2. Materialize both in a fresh workspace
//! 3. Compare each post-ALTER `SHOW CREATE TABLE` with the expected text
//!
//! AUTO_INCREMENT values and partitioning are normalized out on both sides.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::core::diff::TableDiff;
use crate::core::schema::split_partitioning;
use crate::core::{
    strip_auto_increment, DiffError, DiffType, Flavor, NextAutoInc, ObjectDiff, PartitioningMode,
    SchemaDiff, StatementModifiers, Table,
};
use crate::error::{PushError, Result};
use crate::fs::{LogicalSchema, Statement};
use crate::orchestrator::Target;
use crate::workspace::{exec_logical_schema, Lifecycle, WorkspaceOptions};

/// Statements to replay in a workspace and the definitions they must produce.
#[derive(Debug)]
pub struct ReplayPlan {
    pub logical_schema: LogicalSchema,
    /// Normalized expected `SHOW CREATE TABLE` per table name.
    pub expected: BTreeMap<String, String>,
}

/// Modifiers producing ALTERs whose result can be compared byte-for-byte.
///
/// MySQL 5.6+ and MariaDB treat an in-place DROP KEY/ADD KEY of an identical
/// definition as a no-op, leaving index order unchanged, so ALGORITHM=COPY is
/// forced on those versions.
pub fn verification_modifiers(flavor: Flavor) -> StatementModifiers {
    StatementModifiers {
        next_auto_inc: NextAutoInc::Ignore,
        partitioning: PartitioningMode::Remove,
        allow_unsafe: true,
        algorithm_clause: if flavor.min(5, 6) {
            "copy".to_string()
        } else {
            String::new()
        },
        lock_clause: String::new(),
        strict_index_order: true,
        strict_foreign_key_naming: true,
        lax_column_order: false,
        flavor,
    }
}

/// Normalize a `SHOW CREATE TABLE` for comparison.
pub fn normalize_create(create: &str) -> String {
    strip_auto_increment(split_partitioning(create).0)
}

fn unpartitioned(table: &Table) -> Table {
    let mut table = table.clone();
    table.partitioning = None;
    table.create_statement = split_partitioning(&table.create_statement).0.to_string();
    table
}

impl ReplayPlan {
    /// Build the replay plan for every table ALTER in `diff`.
    pub fn build(diff: &SchemaDiff, char_set: &str, collation: &str, flavor: Flavor) -> Result<Self> {
        let mods = verification_modifiers(flavor);
        let source = PathBuf::from("verify");
        let mut logical_schema = LogicalSchema::new(char_set, collation);
        let mut expected = BTreeMap::new();

        for alter in diff.alters() {
            let (from, to) = match (&alter.from, &alter.to) {
                (Some(from), Some(to)) => (unpartitioned(from), unpartitioned(to)),
                _ => continue,
            };
            let name = to.name.clone();
            let create = normalize_create(&from.create_statement);
            let alter_text = TableDiff::alter(from, to.clone())
                .statement(&mods)
                .map_err(|e| match e {
                    DiffError::Unsupported { name, reason } => {
                        PushError::UnsupportedDiff { name, reason }
                    }
                    DiffError::Forbidden { statement, reason } => PushError::ForbiddenDiff {
                        statement,
                        remediation: reason,
                    },
                })?;
            if alter_text.is_empty() {
                continue;
            }
            logical_schema.add_statement(Statement::new(create, &source, 1))?;
            logical_schema.add_alter(Statement::new(alter_text, &source, 1));
            expected.insert(name, normalize_create(&to.create_statement));
        }

        Ok(Self {
            logical_schema,
            expected,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.expected.is_empty()
    }
}

/// True if `diff` creates the schema, meaning nothing exists yet to verify against.
fn creates_schema(diff: &SchemaDiff) -> bool {
    diff.object_diffs
        .iter()
        .any(|d| matches!(d, ObjectDiff::Database(_)) && d.diff_type() == DiffType::Create)
}

/// Verify that every ALTER in `diff` reaches its desired definition.
pub async fn verify_diff(
    diff: &SchemaDiff,
    target: &Target,
    workspace: &WorkspaceOptions,
    lifecycle: &Lifecycle,
) -> Result<()> {
    if !target.options.get_bool("verify")? || creates_schema(diff) {
        return Ok(());
    }
    if diff.alters().next().is_none() {
        return Ok(());
    }

    let flavor = target.instance.flavor().await?;
    let plan = ReplayPlan::build(
        diff,
        &target.logical_schema.char_set,
        &target.logical_schema.collation,
        flavor,
    )?;
    if plan.is_empty() {
        return Ok(());
    }

    debug!("{}: verifying {} ALTERs in workspace", target, plan.expected.len());
    let result = exec_logical_schema(&plan.logical_schema, workspace, lifecycle).await?;
    if let Some(failure) = result.failures.first() {
        return Err(PushError::workspace(format!(
            "{}: replaying ALTER in workspace failed: {}",
            target, failure
        )));
    }

    for (table, expected) in &plan.expected {
        let actual = result
            .schema
            .table(table)
            .map(|t| normalize_create(&t.create_statement))
            .unwrap_or_default();
        if &actual != expected {
            return Err(PushError::Verification {
                table: table.clone(),
                expected: expected.clone(),
                actual,
            });
        }
    }

    info!("{}: verified {} ALTERs", target, plan.expected.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::{OptionSet, OptionSource};
    use crate::core::schema::tests::orders_table;
    use crate::core::{Column, Schema};
    use crate::instance::{Instance, PoolRegistry};
    use crate::workspace::{CleanupAction, WorkspaceKind};

    fn target(verify: bool) -> Target {
        let mut opts = OptionSet::new();
        opts.set("verify", verify.to_string(), OptionSource::CommandLine)
            .unwrap();
        let instance = Instance::new(
            "unreachable.invalid",
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

    fn workspace(target: &Target) -> WorkspaceOptions {
        WorkspaceOptions {
            kind: WorkspaceKind::TempSchema,
            instance: Some(target.instance.clone()),
            flavor: Flavor::UNKNOWN,
            schema_name: "_mysql_schema_push_tmp".to_string(),
            char_set: String::new(),
            collation: String::new(),
            lock_wait: Duration::from_millis(10),
            cleanup: CleanupAction::DropSchema,
            concurrency: 1,
            registry: target.instance.registry().clone(),
        }
    }

    fn shop_schema(tables: Vec<Table>) -> Schema {
        let mut schema = Schema::new("shop", "utf8mb4", "utf8mb4_0900_ai_ci");
        schema.tables = tables;
        schema
    }

    fn add_column_diff() -> SchemaDiff {
        let mut altered = orders_table();
        altered.columns.push(Column::new("shipped_at", "datetime"));
        let altered = altered.with_generated_create();
        SchemaDiff::new(
            Some(&shop_schema(vec![orders_table()])),
            &shop_schema(vec![altered]),
        )
    }

    #[tokio::test]
    async fn test_missing_schema_skips_without_workspace() {
        let t = target(true);
        let diff = SchemaDiff::new(None, &shop_schema(vec![orders_table()]));
        // The workspace instance is unreachable, so any sandbox use would fail.
        verify_diff(&diff, &t, &workspace(&t), &Lifecycle::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_verify_disabled_skips() {
        let t = target(false);
        verify_diff(&add_column_diff(), &t, &workspace(&t), &Lifecycle::new())
            .await
            .unwrap();
    }

    #[test]
    fn test_replay_plan() {
        let plan = ReplayPlan::build(&add_column_diff(), "", "", Flavor::UNKNOWN).unwrap();
        assert_eq!(plan.logical_schema.creates.len(), 1);
        assert_eq!(plan.logical_schema.alters.len(), 1);
        assert_eq!(
            plan.logical_schema.alters[0].text,
            "ALTER TABLE `orders` ADD COLUMN `shipped_at` datetime"
        );
        let expected = &plan.expected["orders"];
        assert!(expected.contains("`shipped_at` datetime"));
        assert!(!expected.contains("AUTO_INCREMENT="));
    }

    #[test]
    fn test_verification_modifiers_force_copy() {
        let mariadb = Flavor::parse("mariadb:10.6");
        assert_eq!(verification_modifiers(mariadb).algorithm_clause, "copy");
        let mysql = Flavor::parse("mysql:8.0");
        assert_eq!(verification_modifiers(mysql).algorithm_clause, "copy");
        assert!(verification_modifiers(mysql).allow_unsafe);
        assert_eq!(verification_modifiers(Flavor::parse("mysql:5.6")).algorithm_clause, "copy");
        assert!(verification_modifiers(Flavor::parse("mysql:5.5"))
            .algorithm_clause
            .is_empty());
    }

    #[test]
    fn test_normalize_create() {
        let create = "CREATE TABLE `t` (\n  `id` int NOT NULL AUTO_INCREMENT,\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB AUTO_INCREMENT=42 DEFAULT CHARSET=utf8mb4\n/*!50100 PARTITION BY HASH (`id`)\nPARTITIONS 4 */";
        assert_eq!(
            normalize_create(create),
            "CREATE TABLE `t` (\n  `id` int NOT NULL AUTO_INCREMENT,\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"
        );
    }
}
