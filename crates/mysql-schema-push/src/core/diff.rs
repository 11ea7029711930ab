//! Schema comparison and DDL rendering.
//!
//! [`SchemaDiff::new`] compares a live schema (or nothing, when the schema does
//! not exist yet) against the desired one and yields ordered [`ObjectDiff`]s:
//! the database-level difference first, then table creates, alters and drops,
//! each group sorted by table name. Rendering a difference into SQL is governed
//! by [`StatementModifiers`].

use std::collections::HashSet;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::flavor::Flavor;
use super::schema::{
    quote_ident, quote_string, split_partitioning, strip_auto_increment, ForeignKey, ObjectKey,
    Schema, Table,
};

/// Error rendering a difference into DDL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
    /// Statement is destructive and unsafe changes are not allowed.
    #[error("{reason}: {statement}")]
    Forbidden { statement: String, reason: String },

    /// Object uses features the schema model cannot express.
    #[error("{name} uses unsupported features: {reason}")]
    Unsupported { name: String, reason: String },
}

/// Kind of change a difference represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffType {
    Create,
    Alter,
    Drop,
}

impl fmt::Display for DiffType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffType::Create => write!(f, "CREATE"),
            DiffType::Alter => write!(f, "ALTER"),
            DiffType::Drop => write!(f, "DROP"),
        }
    }
}

/// How ALTERs handle a differing next AUTO_INCREMENT value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NextAutoInc {
    /// Never emit AUTO_INCREMENT, and strip it from CREATEs.
    Ignore,
    /// Emit only when the desired value is higher than the live one.
    #[default]
    IfIncreased,
    /// Emit whenever the values differ.
    Always,
}

/// How ALTERs handle partitioning differences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitioningMode {
    /// Apply new or changed partitioning, never remove it.
    #[default]
    Modify,
    /// Never touch partitioning.
    Keep,
    /// Remove partitioning, including from CREATEs.
    Remove,
}

/// Policy bundle controlling DDL rendering.
#[derive(Debug, Clone, Default)]
pub struct StatementModifiers {
    pub next_auto_inc: NextAutoInc,
    pub partitioning: PartitioningMode,
    pub allow_unsafe: bool,
    /// ALGORITHM value for ALTER TABLE, empty for none.
    pub algorithm_clause: String,
    /// LOCK value for ALTER TABLE, empty for none.
    pub lock_clause: String,
    pub strict_index_order: bool,
    pub strict_foreign_key_naming: bool,
    pub lax_column_order: bool,
    pub flavor: Flavor,
}

/// Schema-level attributes compared by a [`DatabaseDiff`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaOptions {
    pub name: String,
    pub char_set: String,
    pub collation: String,
}

impl From<&Schema> for SchemaOptions {
    fn from(s: &Schema) -> Self {
        Self {
            name: s.name.clone(),
            char_set: s.char_set.clone(),
            collation: s.collation.clone(),
        }
    }
}

/// Difference in the schema itself (existence, default charset or collation).
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseDiff {
    pub from: Option<SchemaOptions>,
    pub to: Option<SchemaOptions>,
}

impl DatabaseDiff {
    pub fn diff_type(&self) -> DiffType {
        match (&self.from, &self.to) {
            (None, _) => DiffType::Create,
            (Some(_), None) => DiffType::Drop,
            (Some(_), Some(_)) => DiffType::Alter,
        }
    }

    pub fn name(&self) -> &str {
        self.to
            .as_ref()
            .or(self.from.as_ref())
            .map(|s| s.name.as_str())
            .unwrap_or("")
    }

    pub fn statement(&self, mods: &StatementModifiers) -> Result<String, DiffError> {
        let name = quote_ident(self.name());
        match (&self.from, &self.to) {
            (None, Some(to)) => Ok(format!("CREATE DATABASE {}{}", name, charset_clause(to))),
            (Some(from), Some(to)) => {
                if from.char_set == to.char_set && from.collation == to.collation {
                    return Ok(String::new());
                }
                Ok(format!("ALTER DATABASE {}{}", name, charset_clause(to)))
            }
            (Some(_), None) => {
                let statement = format!("DROP DATABASE {}", name);
                if mods.allow_unsafe {
                    Ok(statement)
                } else {
                    Err(DiffError::Forbidden {
                        statement,
                        reason: "drops a database".to_string(),
                    })
                }
            }
            (None, None) => Ok(String::new()),
        }
    }
}

fn charset_clause(opts: &SchemaOptions) -> String {
    let mut clause = String::new();
    if !opts.char_set.is_empty() {
        clause.push_str(" CHARACTER SET ");
        clause.push_str(&opts.char_set);
    }
    if !opts.collation.is_empty() {
        clause.push_str(" COLLATE ");
        clause.push_str(&opts.collation);
    }
    clause
}

/// Difference in a single table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDiff {
    pub diff_type: DiffType,
    pub from: Option<Table>,
    pub to: Option<Table>,
}

impl TableDiff {
    pub fn create(to: Table) -> Self {
        Self {
            diff_type: DiffType::Create,
            from: None,
            to: Some(to),
        }
    }

    pub fn alter(from: Table, to: Table) -> Self {
        Self {
            diff_type: DiffType::Alter,
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn drop(from: Table) -> Self {
        Self {
            diff_type: DiffType::Drop,
            from: Some(from),
            to: None,
        }
    }

    pub fn name(&self) -> &str {
        self.to
            .as_ref()
            .or(self.from.as_ref())
            .map(|t| t.name.as_str())
            .unwrap_or("")
    }

    /// Render the full DDL statement, or an empty string when nothing needs to change.
    pub fn statement(&self, mods: &StatementModifiers) -> Result<String, DiffError> {
        match (self.diff_type, &self.from, &self.to) {
            (DiffType::Create, _, Some(to)) => Ok(create_statement(to, mods)),
            (DiffType::Drop, Some(from), _) => {
                let statement = format!("DROP TABLE {}", quote_ident(&from.name));
                if mods.allow_unsafe {
                    Ok(statement)
                } else {
                    Err(DiffError::Forbidden {
                        statement,
                        reason: format!("drops table {}", quote_ident(&from.name)),
                    })
                }
            }
            (DiffType::Alter, Some(from), Some(to)) => {
                let clauses = self.clauses(mods)?;
                if clauses.is_empty() {
                    return Ok(String::new());
                }
                let statement = format!("ALTER TABLE {} {}", quote_ident(&from.name), clauses);
                let reasons = unsafe_reasons(from, to);
                if !mods.allow_unsafe && !reasons.is_empty() {
                    return Err(DiffError::Forbidden {
                        statement,
                        reason: reasons.join("; "),
                    });
                }
                Ok(statement)
            }
            _ => Ok(String::new()),
        }
    }

    /// Alter specification following `ALTER TABLE <name>`, empty if none.
    pub fn clauses(&self, mods: &StatementModifiers) -> Result<String, DiffError> {
        let (from, to) = match (&self.from, &self.to) {
            (Some(from), Some(to)) if self.diff_type == DiffType::Alter => (from, to),
            _ => return Ok(String::new()),
        };
        if from.unsupported_ddl || to.unsupported_ddl {
            return Err(DiffError::Unsupported {
                name: ObjectKey::table(&to.name).to_string(),
                reason: "table definition cannot be reproduced from introspected metadata".to_string(),
            });
        }
        Ok(alter_clauses(from, to, mods))
    }
}

/// Any schema object difference.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectDiff {
    Database(DatabaseDiff),
    Table(TableDiff),
}

impl ObjectDiff {
    pub fn diff_type(&self) -> DiffType {
        match self {
            ObjectDiff::Database(d) => d.diff_type(),
            ObjectDiff::Table(t) => t.diff_type,
        }
    }

    pub fn object_key(&self) -> ObjectKey {
        match self {
            ObjectDiff::Database(d) => ObjectKey::database(d.name()),
            ObjectDiff::Table(t) => ObjectKey::table(t.name()),
        }
    }

    /// Current definition, if the object exists.
    pub fn from_definition(&self) -> Option<String> {
        match self {
            ObjectDiff::Database(d) => d.from.as_ref().map(|s| s.name.clone()),
            ObjectDiff::Table(t) => t.from.as_ref().map(|t| t.create_statement.clone()),
        }
    }

    /// Desired definition, if the object should exist.
    pub fn to_definition(&self) -> Option<String> {
        match self {
            ObjectDiff::Database(d) => d.to.as_ref().map(|s| s.name.clone()),
            ObjectDiff::Table(t) => t.to.as_ref().map(|t| t.create_statement.clone()),
        }
    }

    pub fn statement(&self, mods: &StatementModifiers) -> Result<String, DiffError> {
        match self {
            ObjectDiff::Database(d) => d.statement(mods),
            ObjectDiff::Table(t) => t.statement(mods),
        }
    }

    /// Alter specification only; empty for non-ALTER differences.
    pub fn clauses(&self, mods: &StatementModifiers) -> Result<String, DiffError> {
        match self {
            ObjectDiff::Database(_) => Ok(String::new()),
            ObjectDiff::Table(t) => t.clauses(mods),
        }
    }

    pub fn as_table(&self) -> Option<&TableDiff> {
        match self {
            ObjectDiff::Table(t) => Some(t),
            ObjectDiff::Database(_) => None,
        }
    }
}

/// Ordered set of differences between a live schema and a desired schema.
#[derive(Debug, Clone, Default)]
pub struct SchemaDiff {
    pub object_diffs: Vec<ObjectDiff>,
}

impl SchemaDiff {
    /// Compare `from` (None when the schema does not exist) against `to`.
    pub fn new(from: Option<&Schema>, to: &Schema) -> Self {
        let mut object_diffs = Vec::new();

        match from {
            None => object_diffs.push(ObjectDiff::Database(DatabaseDiff {
                from: None,
                to: Some(to.into()),
            })),
            Some(f) if f.char_set != to.char_set || f.collation != to.collation => {
                object_diffs.push(ObjectDiff::Database(DatabaseDiff {
                    from: Some(f.into()),
                    to: Some(to.into()),
                }))
            }
            Some(_) => {}
        }

        let mut to_tables: Vec<&Table> = to.tables.iter().collect();
        to_tables.sort_by(|a, b| a.name.cmp(&b.name));

        let mut creates = Vec::new();
        let mut alters = Vec::new();
        for t in to_tables {
            match from.and_then(|f| f.table(&t.name)) {
                None => creates.push(ObjectDiff::Table(TableDiff::create(t.clone()))),
                Some(existing) if existing.create_statement != t.create_statement => {
                    alters.push(ObjectDiff::Table(TableDiff::alter(existing.clone(), t.clone())))
                }
                Some(_) => {}
            }
        }

        let mut drops = Vec::new();
        if let Some(f) = from {
            let mut from_tables: Vec<&Table> = f.tables.iter().collect();
            from_tables.sort_by(|a, b| a.name.cmp(&b.name));
            for t in from_tables {
                if to.table(&t.name).is_none() {
                    drops.push(ObjectDiff::Table(TableDiff::drop(t.clone())));
                }
            }
        }

        object_diffs.extend(creates);
        object_diffs.extend(alters);
        object_diffs.extend(drops);
        Self { object_diffs }
    }

    pub fn is_empty(&self) -> bool {
        self.object_diffs.is_empty()
    }

    /// Table ALTER differences.
    pub fn alters(&self) -> impl Iterator<Item = &TableDiff> {
        self.object_diffs
            .iter()
            .filter_map(ObjectDiff::as_table)
            .filter(|t| t.diff_type == DiffType::Alter)
    }

    /// Drop table differences whose name matches `pattern`; returns how many were removed.
    pub fn ignore_tables(&mut self, pattern: &Regex) -> usize {
        let before = self.object_diffs.len();
        self.object_diffs.retain(|d| match d {
            ObjectDiff::Table(t) => !pattern.is_match(t.name()),
            ObjectDiff::Database(_) => true,
        });
        before - self.object_diffs.len()
    }
}

fn create_statement(to: &Table, mods: &StatementModifiers) -> String {
    let mut create = to.create_statement.clone();
    if mods.next_auto_inc == NextAutoInc::Ignore {
        create = strip_auto_increment(&create);
    }
    if mods.partitioning == PartitioningMode::Remove {
        create = split_partitioning(&create).0.to_string();
    }
    create
}

fn unsafe_reasons(from: &Table, to: &Table) -> Vec<String> {
    let mut reasons = Vec::new();
    for col in &from.columns {
        match to.column(&col.name) {
            None => reasons.push(format!("drops column {}", quote_ident(&col.name))),
            Some(new) if new.type_in_db != col.type_in_db => reasons.push(format!(
                "modifies type of column {} from {} to {}",
                quote_ident(&col.name),
                col.type_in_db,
                new.type_in_db
            )),
            Some(_) => {}
        }
    }
    reasons
}

fn alter_clauses(from: &Table, to: &Table, mods: &StatementModifiers) -> String {
    let mut clauses = Vec::new();

    // Foreign keys are dropped first and added last so referenced indexes exist.
    let fk_retained = |fk: &ForeignKey, others: &[ForeignKey]| {
        others.iter().any(|o| {
            o.equivalent(fk) && (!mods.strict_foreign_key_naming || o.name == fk.name)
        })
    };
    for fk in &from.foreign_keys {
        if !fk_retained(fk, &to.foreign_keys) {
            clauses.push(format!("DROP FOREIGN KEY {}", quote_ident(&fk.name)));
        }
    }

    let pk_changed = from.primary_key != to.primary_key;
    if pk_changed && from.primary_key.is_some() {
        clauses.push("DROP PRIMARY KEY".to_string());
    }

    let readd = reordered_indexes(from, to, mods.strict_index_order);
    let index_kept = |name: &str| {
        match (from.secondary_index(name), to.secondary_index(name)) {
            (Some(a), Some(b)) => a.equivalent(b) && !readd.contains(name),
            _ => false,
        }
    };
    for idx in &from.secondary_indexes {
        if !index_kept(&idx.name) {
            clauses.push(format!("DROP KEY {}", quote_ident(&idx.name)));
        }
    }

    column_clauses(from, to, mods.lax_column_order, &mut clauses);

    if pk_changed {
        if let Some(pk) = &to.primary_key {
            clauses.push(format!("ADD {}", pk.definition()));
        }
    }
    for idx in &to.secondary_indexes {
        if !index_kept(&idx.name) {
            clauses.push(format!("ADD {}", idx.definition()));
        }
    }
    for fk in &to.foreign_keys {
        if !fk_retained(fk, &from.foreign_keys) {
            clauses.push(format!("ADD {}", fk.definition()));
        }
    }

    if from.engine != to.engine {
        clauses.push(format!("ENGINE={}", to.engine));
    }
    let emit_auto_inc = match mods.next_auto_inc {
        NextAutoInc::Ignore => false,
        NextAutoInc::IfIncreased => to.auto_increment > from.auto_increment,
        NextAutoInc::Always => to.auto_increment != from.auto_increment,
    };
    if emit_auto_inc && to.auto_increment > 1 {
        clauses.push(format!("AUTO_INCREMENT={}", to.auto_increment));
    }
    if from.char_set != to.char_set || from.collation != to.collation {
        clauses.push(format!("DEFAULT CHARSET={} COLLATE={}", to.char_set, to.collation));
    }
    if from.comment != to.comment {
        clauses.push(format!("COMMENT={}", quote_string(&to.comment)));
    }

    if !clauses.is_empty() {
        if !mods.algorithm_clause.is_empty() {
            clauses.push(format!("ALGORITHM={}", mods.algorithm_clause.to_uppercase()));
        }
        if !mods.lock_clause.is_empty() {
            clauses.push(format!("LOCK={}", mods.lock_clause.to_uppercase()));
        }
    }

    let mut spec = clauses.join(", ");

    // Partition options follow the alter specification without a comma.
    let partition_clause = match mods.partitioning {
        PartitioningMode::Keep => None,
        PartitioningMode::Remove => from
            .partitioning
            .as_ref()
            .map(|_| "REMOVE PARTITIONING".to_string()),
        PartitioningMode::Modify => match (&from.partitioning, &to.partitioning) {
            (old, Some(new)) if old.as_ref() != Some(new) => Some(new.clone()),
            _ => None,
        },
    };
    if let Some(p) = partition_clause {
        if !spec.is_empty() {
            spec.push(' ');
        }
        spec.push_str(&p);
    }
    spec
}

/// Names of secondary indexes that must be dropped and re-added to match the desired order.
fn reordered_indexes<'a>(from: &Table, to: &'a Table, strict: bool) -> HashSet<&'a str> {
    let mut readd = HashSet::new();
    if !strict {
        return readd;
    }
    let retained: Vec<&str> = from
        .secondary_indexes
        .iter()
        .filter(|i| to.secondary_index(&i.name).is_some_and(|t| t.equivalent(i)))
        .map(|i| i.name.as_str())
        .collect();

    let mut next = 0;
    let mut reorder = false;
    for idx in &to.secondary_indexes {
        let is_retained = retained.contains(&idx.name.as_str());
        if reorder {
            if is_retained {
                readd.insert(idx.name.as_str());
            }
            continue;
        }
        if is_retained {
            if retained.get(next) == Some(&idx.name.as_str()) {
                next += 1;
            } else {
                reorder = true;
                readd.insert(idx.name.as_str());
            }
        } else if next < retained.len() {
            // New indexes are appended, so every retained index after this point moves.
            reorder = true;
        }
    }
    readd
}

fn column_clauses(from: &Table, to: &Table, lax_order: bool, clauses: &mut Vec<String>) {
    for col in &from.columns {
        if to.column(&col.name).is_none() {
            clauses.push(format!("DROP COLUMN {}", quote_ident(&col.name)));
        }
    }

    let mut moved: HashSet<&str> = HashSet::new();
    if !lax_order {
        let mut current: Vec<&str> = from
            .columns
            .iter()
            .filter(|c| to.column(&c.name).is_some())
            .map(|c| c.name.as_str())
            .collect();
        let desired = to
            .columns
            .iter()
            .filter(|c| from.column(&c.name).is_some())
            .map(|c| c.name.as_str());
        for (i, name) in desired.enumerate() {
            if current.get(i) != Some(&name) {
                if let Some(pos) = current.iter().position(|n| *n == name) {
                    let n = current.remove(pos);
                    current.insert(i, n);
                }
                moved.insert(name);
            }
        }
    }

    let last = to.columns.len().saturating_sub(1);
    for (i, col) in to.columns.iter().enumerate() {
        let position = if i == 0 {
            " FIRST".to_string()
        } else {
            format!(" AFTER {}", quote_ident(&to.columns[i - 1].name))
        };
        match from.column(&col.name) {
            None => {
                let position = if i == last { String::new() } else { position };
                clauses.push(format!("ADD COLUMN {}{}", col.definition(), position));
            }
            Some(old) => {
                let is_moved = moved.contains(col.name.as_str());
                if is_moved || old.definition() != col.definition() {
                    let position = if is_moved { position } else { String::new() };
                    clauses.push(format!("MODIFY COLUMN {}{}", col.definition(), position));
                }
            }
        }
    }
}
