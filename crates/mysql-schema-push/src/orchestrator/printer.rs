//! Serialized DDL output shared by all workers.

use std::collections::HashSet;
use std::io::Write;
use std::sync::Mutex;

use tracing::warn;

use super::Target;
use crate::ddl::DdlStatement;

/// Database-level SQL runs unscoped and must not be preceded by `USE`.
fn is_schema_scoped(stmt: &DdlStatement) -> bool {
    !matches!(stmt, DdlStatement::Sql { schema, .. } if schema.is_empty())
}

#[derive(Debug, Default)]
struct PrinterState {
    last_instance: Option<String>,
    last_schema: Option<String>,
    seen_instances: HashSet<String>,
}

/// Writes statements to stdout with `-- instance:` and `USE` headers.
///
/// Headers are only emitted when the instance or schema changes from the
/// previous output. `USE` is written just before the first schema-scoped
/// statement, so a `CREATE DATABASE` precedes it. In brief mode only the names of instances with
/// differences are printed, once each.
#[derive(Debug, Default)]
pub struct Printer {
    brief: bool,
    state: Mutex<PrinterState>,
}

impl Printer {
    pub fn new(brief: bool) -> Self {
        Self {
            brief,
            state: Mutex::new(PrinterState::default()),
        }
    }

    /// Render output for `statements` of `target`, updating header state.
    pub fn render(&self, target: &Target, statements: &[DdlStatement]) -> String {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let instance = target.instance.to_string();
        let mut out = String::new();

        if self.brief {
            if !statements.is_empty() && state.seen_instances.insert(instance.clone()) {
                out.push_str(&instance);
                out.push('\n');
            }
            return out;
        }
        if statements.is_empty() {
            return out;
        }

        if state.last_instance.as_deref() != Some(instance.as_str()) {
            if state.last_instance.is_some() {
                out.push('\n');
            }
            out.push_str(&format!("-- instance: {}\n", instance));
            state.last_instance = Some(instance);
            state.last_schema = None;
        }
        for stmt in statements {
            if is_schema_scoped(stmt)
                && state.last_schema.as_deref() != Some(target.schema_name.as_str())
            {
                out.push_str(&format!("USE `{}`;\n", target.schema_name.replace('`', "``")));
                state.last_schema = Some(target.schema_name.clone());
            }
            out.push_str(&stmt.to_string());
            out.push('\n');
        }
        out
    }

    /// Print output for `statements` of `target` to stdout.
    pub fn print(&self, target: &Target, statements: &[DdlStatement]) {
        let out = self.render(target, statements);
        if out.is_empty() {
            return;
        }
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        if let Err(e) = handle.write_all(out.as_bytes()).and_then(|()| handle.flush()) {
            warn!("Error writing DDL for {} to stdout: {}", target, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use crate::config::OptionSet;
    use crate::fs::LogicalSchema;
    use crate::instance::{Instance, PoolRegistry};

    fn target(host: &str, schema: &str) -> Target {
        let instance =
            Instance::new(host, 3306, None, "root", "", "", Arc::new(PoolRegistry::new())).unwrap();
        Target {
            instance,
            dir_path: PathBuf::from("/schemas"),
            options: OptionSet::new(),
            environment: "production".to_string(),
            schema_name: schema.to_string(),
            logical_schema: Arc::new(LogicalSchema::default()),
        }
    }

    fn shell(cmd: &str) -> DdlStatement {
        DdlStatement::Shell {
            command: cmd.to_string(),
        }
    }

    #[test]
    fn test_headers_only_on_change() {
        let printer = Printer::new(false);
        let a = target("db1", "shop");
        assert_eq!(
            printer.render(&a, &[shell("one")]),
            "-- instance: db1:3306\nUSE `shop`;\n\\! one\n"
        );
        assert_eq!(printer.render(&a, &[shell("two")]), "\\! two\n");
        assert_eq!(
            printer.render(&target("db1", "billing"), &[shell("three")]),
            "USE `billing`;\n\\! three\n"
        );
        assert_eq!(
            printer.render(&target("db2", "billing"), &[shell("four")]),
            "\n-- instance: db2:3306\nUSE `billing`;\n\\! four\n"
        );
        assert_eq!(printer.render(&a, &[]), "");
    }

    #[test]
    fn test_use_follows_create_database() {
        let printer = Printer::new(false);
        let t = target("db1", "shop");
        let sql = |text: &str, schema: &str| DdlStatement::Sql {
            text: text.to_string(),
            instance: t.instance.clone(),
            schema: schema.to_string(),
            params: Vec::new(),
        };
        let stmts = [
            sql("CREATE DATABASE `shop`", ""),
            sql("CREATE TABLE `orders` (`id` int)", "shop"),
        ];
        assert_eq!(
            printer.render(&t, &stmts),
            "-- instance: db1:3306\nCREATE DATABASE `shop`;\nUSE `shop`;\nCREATE TABLE `orders` (`id` int);\n"
        );
    }

    #[test]
    fn test_brief_prints_each_instance_once() {
        let printer = Printer::new(true);
        assert_eq!(printer.render(&target("db1", "a"), &[shell("x")]), "db1:3306\n");
        assert_eq!(printer.render(&target("db1", "b"), &[shell("y")]), "");
        assert_eq!(printer.render(&target("db2", "a"), &[]), "");
    }
}
