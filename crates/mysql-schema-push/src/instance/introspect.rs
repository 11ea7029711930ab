//! Schema introspection from `information_schema` and `SHOW CREATE TABLE`.

use std::collections::HashMap;
use std::sync::OnceLock;

use mysql_async::prelude::*;
use mysql_async::Conn;
use regex::Regex;
use tracing::debug;

use super::Instance;
use crate::core::schema::{
    quote_ident, split_partitioning, Column, ColumnDefault, ForeignKey, Index, IndexPart, Schema,
    Table,
};
use crate::error::{PushError, Result};

type TableRow = (String, Option<String>, Option<String>, Option<String>, Option<String>);

type ColumnRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    String,
);

type IndexRow = (String, String, i64, Option<String>, Option<i64>, String);

type ForeignKeyRow = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
);

impl Instance {
    /// Read a schema's full definition, or None if it does not exist.
    pub async fn introspect_schema(&self, schema: &str) -> Result<Option<Schema>> {
        let mut conn = self
            .pool("", &[])
            .get_conn()
            .await
            .map_err(|e| PushError::pool(e, format!("connecting to {}", self)))?;

        let row: Option<(String, String)> = conn
            .exec_first(
                "SELECT DEFAULT_CHARACTER_SET_NAME, DEFAULT_COLLATION_NAME \
                 FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = ?",
                (schema,),
            )
            .await?;
        let Some((char_set, collation)) = row else {
            return Ok(None);
        };

        let mut result = Schema::new(schema, char_set, collation);
        let mut tables = load_tables(&mut conn, schema).await?;
        load_columns(&mut conn, schema, &mut tables).await?;
        load_indexes(&mut conn, schema, &mut tables).await?;
        load_foreign_keys(&mut conn, schema, &mut tables).await?;

        for table in tables.values_mut() {
            let sql = format!("SHOW CREATE TABLE {}.{}", quote_ident(schema), quote_ident(&table.name));
            let create: Option<(String, String)> = conn.query_first(sql).await?;
            table.create_statement = create.map(|(_, c)| c).unwrap_or_default();
            finish_table(table);
            if table.unsupported_ddl {
                debug!(
                    "{}: table {}.{} uses features outside the schema model",
                    self, schema, table.name
                );
            }
        }

        let mut tables: Vec<Table> = tables.into_values().collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        result.tables = tables;
        Ok(Some(result))
    }
}

async fn load_tables(conn: &mut Conn, schema: &str) -> Result<HashMap<String, Table>> {
    let rows: Vec<TableRow> = conn
        .exec(
            "SELECT t.TABLE_NAME, t.ENGINE, t.TABLE_COLLATION, c.CHARACTER_SET_NAME, t.TABLE_COMMENT \
             FROM information_schema.TABLES t \
             LEFT JOIN information_schema.COLLATIONS c ON c.COLLATION_NAME = t.TABLE_COLLATION \
             WHERE t.TABLE_SCHEMA = ? AND t.TABLE_TYPE = 'BASE TABLE'",
            (schema,),
        )
        .await?;

    Ok(rows
        .into_iter()
        .map(|(name, engine, collation, char_set, comment)| {
            let mut table = Table::new(name.clone());
            table.engine = engine.unwrap_or_default();
            table.collation = collation.unwrap_or_default();
            table.char_set = char_set.unwrap_or_default();
            table.comment = comment.unwrap_or_default();
            (name, table)
        })
        .collect())
}

async fn load_columns(conn: &mut Conn, schema: &str, tables: &mut HashMap<String, Table>) -> Result<()> {
    let rows: Vec<ColumnRow> = conn
        .exec(
            "SELECT TABLE_NAME, COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_DEFAULT, EXTRA, \
                    CHARACTER_SET_NAME, COLLATION_NAME, COLUMN_COMMENT \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = ? \
             ORDER BY TABLE_NAME, ORDINAL_POSITION",
            (schema,),
        )
        .await?;

    for (table_name, name, column_type, is_nullable, default, extra, char_set, collation, comment) in rows {
        let Some(table) = tables.get_mut(&table_name) else {
            continue;
        };
        let mut col = Column::new(name, column_type);
        col.nullable = is_nullable.eq_ignore_ascii_case("YES");
        col.auto_increment = extra.to_lowercase().contains("auto_increment");
        col.default = column_default(&col, default, &extra);
        col.on_update = on_update(&extra);
        col.comment = comment;

        match (char_set, collation) {
            (Some(cs), Some(co)) if cs != table.char_set => {
                col.char_set = Some(cs);
                col.collation = Some(co);
            }
            (_, Some(co)) if co != table.collation => col.collation = Some(co),
            _ => {}
        }
        table.columns.push(col);
    }
    Ok(())
}

fn column_default(col: &Column, default: Option<String>, extra: &str) -> Option<ColumnDefault> {
    match default {
        None => {
            let base = col.base_type();
            let no_implicit_default = base.ends_with("text")
                || base.ends_with("blob")
                || base == "json"
                || base == "geometry";
            if col.nullable && !no_implicit_default {
                Some(ColumnDefault::Null)
            } else {
                None
            }
        }
        Some(value) => {
            let upper = value.to_uppercase();
            if extra.contains("DEFAULT_GENERATED") || upper.starts_with("CURRENT_TIMESTAMP") {
                Some(ColumnDefault::Expression(value))
            } else {
                Some(ColumnDefault::Literal(value))
            }
        }
    }
}

fn on_update(extra: &str) -> Option<String> {
    let lower = extra.to_lowercase();
    lower
        .find("on update ")
        .map(|pos| extra[pos + "on update ".len()..].trim().to_string())
        .filter(|s| !s.is_empty())
}

async fn load_indexes(conn: &mut Conn, schema: &str, tables: &mut HashMap<String, Table>) -> Result<()> {
    let rows: Vec<IndexRow> = conn
        .exec(
            "SELECT TABLE_NAME, INDEX_NAME, NON_UNIQUE, COLUMN_NAME, SUB_PART, INDEX_COMMENT \
             FROM information_schema.STATISTICS \
             WHERE TABLE_SCHEMA = ? \
             ORDER BY TABLE_NAME, INDEX_NAME, SEQ_IN_INDEX",
            (schema,),
        )
        .await?;

    for (table_name, index_name, non_unique, column, sub_part, comment) in rows {
        let Some(table) = tables.get_mut(&table_name) else {
            continue;
        };
        let Some(column) = column else {
            // Functional index part
            table.unsupported_ddl = true;
            continue;
        };
        let part = IndexPart {
            column,
            prefix_length: sub_part.unwrap_or(0).max(0) as u32,
        };

        if index_name == "PRIMARY" {
            table
                .primary_key
                .get_or_insert_with(|| Index::primary_key(&[]))
                .parts
                .push(part);
            continue;
        }
        match table.secondary_indexes.iter_mut().find(|i| i.name == index_name) {
            Some(idx) => idx.parts.push(part),
            None => {
                let mut idx = Index::new(index_name, &[]);
                idx.unique = non_unique == 0;
                idx.comment = comment;
                idx.parts.push(part);
                table.secondary_indexes.push(idx);
            }
        }
    }
    Ok(())
}

async fn load_foreign_keys(conn: &mut Conn, schema: &str, tables: &mut HashMap<String, Table>) -> Result<()> {
    let rows: Vec<ForeignKeyRow> = conn
        .exec(
            "SELECT rc.TABLE_NAME, rc.CONSTRAINT_NAME, rc.UPDATE_RULE, rc.DELETE_RULE, \
                    kcu.COLUMN_NAME, kcu.REFERENCED_TABLE_SCHEMA, kcu.REFERENCED_TABLE_NAME, \
                    kcu.REFERENCED_COLUMN_NAME \
             FROM information_schema.REFERENTIAL_CONSTRAINTS rc \
             JOIN information_schema.KEY_COLUMN_USAGE kcu \
               ON kcu.CONSTRAINT_SCHEMA = rc.CONSTRAINT_SCHEMA \
              AND kcu.TABLE_NAME = rc.TABLE_NAME \
              AND kcu.CONSTRAINT_NAME = rc.CONSTRAINT_NAME \
             WHERE rc.CONSTRAINT_SCHEMA = ? \
             ORDER BY rc.TABLE_NAME, rc.CONSTRAINT_NAME, kcu.ORDINAL_POSITION",
            (schema,),
        )
        .await?;

    for (table_name, name, update_rule, delete_rule, column, ref_schema, ref_table, ref_column) in rows {
        let Some(table) = tables.get_mut(&table_name) else {
            continue;
        };
        let ref_schema = ref_schema.unwrap_or_default();
        let ref_schema = if ref_schema == schema { String::new() } else { ref_schema };
        match table.foreign_keys.iter_mut().find(|fk| fk.name == name) {
            Some(fk) => {
                fk.columns.push(column);
                fk.referenced_columns.push(ref_column.unwrap_or_default());
            }
            None => table.foreign_keys.push(ForeignKey {
                name,
                columns: vec![column],
                referenced_schema: ref_schema,
                referenced_table: ref_table.unwrap_or_default(),
                referenced_columns: vec![ref_column.unwrap_or_default()],
                update_rule,
                delete_rule,
            }),
        }
    }
    Ok(())
}

/// Reconcile structured metadata with the server's CREATE text.
fn finish_table(table: &mut Table) {
    let create = table.create_statement.clone();

    // The server displays indexes and constraints in its own order.
    table
        .secondary_indexes
        .sort_by_key(|idx| create.find(&format!("KEY {} (", quote_ident(&idx.name))).unwrap_or(usize::MAX));
    table.foreign_keys.sort_by_key(|fk| {
        create
            .find(&format!("CONSTRAINT {} ", quote_ident(&fk.name)))
            .unwrap_or(usize::MAX)
    });

    let (body, partitioning) = split_partitioning(&create);
    table.partitioning = partitioning.map(str::to_string);
    table.auto_increment = auto_increment_value(body);
    table.show_collation = body
        .rsplit_once(") ENGINE=")
        .is_some_and(|(_, options)| options.contains(" COLLATE="));

    let functional = table.unsupported_ddl;
    table.check_supported();
    table.unsupported_ddl |= functional;
}

fn auto_increment_value(create: &str) -> u64 {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\) ENGINE=\S+ AUTO_INCREMENT=(\d+)").expect("valid regex"));
    re.captures(create)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::tests::orders_table;

    #[test]
    fn test_on_update_extraction() {
        assert_eq!(
            on_update("DEFAULT_GENERATED on update CURRENT_TIMESTAMP"),
            Some("CURRENT_TIMESTAMP".to_string())
        );
        assert_eq!(on_update("auto_increment"), None);
    }

    #[test]
    fn test_column_default_rules() {
        let text = Column::new("note", "text");
        assert_eq!(column_default(&text, None, ""), None);

        let nullable_int = Column::new("qty", "int");
        assert_eq!(column_default(&nullable_int, None, ""), Some(ColumnDefault::Null));

        let ts = Column::new("created_at", "timestamp");
        assert_eq!(
            column_default(&ts, Some("CURRENT_TIMESTAMP".into()), "DEFAULT_GENERATED"),
            Some(ColumnDefault::Expression("CURRENT_TIMESTAMP".into()))
        );
        assert_eq!(
            column_default(&nullable_int, Some("0".into()), ""),
            Some(ColumnDefault::Literal("0".into()))
        );
    }

    #[test]
    fn test_finish_table_reads_server_display_details() {
        let mut expected = orders_table();
        expected.auto_increment = 7;
        expected.secondary_indexes.push(Index::new("idx_status", &["status"]));
        let expected = expected.with_generated_create();

        // Structured metadata arrives with indexes sorted by name and no auto-increment.
        let mut table = expected.clone();
        table.auto_increment = 0;
        table.secondary_indexes.reverse();
        table.create_statement = expected.create_statement.clone();

        finish_table(&mut table);
        assert_eq!(table.auto_increment, 7);
        assert_eq!(table.secondary_indexes[0].name, "idx_customer");
        assert!(table.show_collation);
        assert!(!table.unsupported_ddl);
    }
}
