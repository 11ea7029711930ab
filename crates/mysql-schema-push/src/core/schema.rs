//! Schema and metadata types for schemas, tables, columns, indexes, and foreign keys.
//!
//! A [`Table`] keeps both the structured metadata read from `information_schema`
//! and the server's own `SHOW CREATE TABLE` text. The structured form drives
//! ALTER generation; the server text is the ground truth for verification.
//! When the two disagree the table uses features this model does not cover,
//! and it is flagged [`Table::unsupported_ddl`].

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Kind of schema object a difference applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Database,
    Table,
}

impl ObjectKind {
    /// Upper-case name as exposed to wrapper commands.
    pub fn caps(&self) -> &'static str {
        match self {
            ObjectKind::Database => "DATABASE",
            ObjectKind::Table => "TABLE",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Database => write!(f, "database"),
            ObjectKind::Table => write!(f, "table"),
        }
    }
}

/// Identifies one schema object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: ObjectKind,
    pub name: String,
}

impl ObjectKey {
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            kind: ObjectKind::Table,
            name: name.into(),
        }
    }

    pub fn database(name: impl Into<String>) -> Self {
        Self {
            kind: ObjectKind::Database,
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, quote_ident(&self.name))
    }
}

/// A schema (database) and the tables inside it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Schema name.
    pub name: String,

    /// Default character set.
    pub char_set: String,

    /// Default collation.
    pub collation: String,

    /// Tables sorted by name.
    pub tables: Vec<Table>,
}

impl Schema {
    pub fn new(name: impl Into<String>, char_set: impl Into<String>, collation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            char_set: char_set.into(),
            collation: collation.into(),
            tables: Vec::new(),
        }
    }

    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Names of all tables.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }
}

/// Literal or expression default value of a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnDefault {
    /// `DEFAULT NULL`
    Null,
    /// Quoted literal, e.g. `DEFAULT '0'`
    Literal(String),
    /// Unquoted expression, e.g. `DEFAULT CURRENT_TIMESTAMP`
    Expression(String),
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,

    /// Full type as reported by `COLUMN_TYPE`, e.g. `int unsigned` or `varchar(40)`.
    pub type_in_db: String,

    pub nullable: bool,
    pub auto_increment: bool,
    pub default: Option<ColumnDefault>,

    /// `ON UPDATE` expression, if any.
    pub on_update: Option<String>,

    /// Character set, only when it differs from the table default.
    pub char_set: Option<String>,

    /// Collation, only when it differs from the table default.
    pub collation: Option<String>,

    pub comment: String,
}

impl Column {
    pub fn new(name: impl Into<String>, type_in_db: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_in_db: type_in_db.into(),
            nullable: true,
            auto_increment: false,
            default: None,
            on_update: None,
            char_set: None,
            collation: None,
            comment: String::new(),
        }
    }

    /// Column definition as it appears inside CREATE TABLE.
    pub fn definition(&self) -> String {
        let mut def = format!("{} {}", quote_ident(&self.name), self.type_in_db);
        if let Some(cs) = &self.char_set {
            def.push_str(" CHARACTER SET ");
            def.push_str(cs);
        }
        if let Some(co) = &self.collation {
            def.push_str(" COLLATE ");
            def.push_str(co);
        }
        if !self.nullable {
            def.push_str(" NOT NULL");
        }
        match &self.default {
            Some(ColumnDefault::Null) => def.push_str(" DEFAULT NULL"),
            Some(ColumnDefault::Literal(v)) => {
                def.push_str(" DEFAULT ");
                def.push_str(&quote_string(v));
            }
            Some(ColumnDefault::Expression(e)) => {
                def.push_str(" DEFAULT ");
                def.push_str(e);
            }
            None => {}
        }
        if let Some(expr) = &self.on_update {
            def.push_str(" ON UPDATE ");
            def.push_str(expr);
        }
        if self.auto_increment {
            def.push_str(" AUTO_INCREMENT");
        }
        if !self.comment.is_empty() {
            def.push_str(" COMMENT ");
            def.push_str(&quote_string(&self.comment));
        }
        def
    }

    /// The base type without display width or attributes, lowercased.
    pub fn base_type(&self) -> String {
        self.type_in_db
            .split(|c: char| c == '(' || c == ' ')
            .next()
            .unwrap_or("")
            .to_lowercase()
    }
}

/// One column (or column prefix) of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPart {
    pub column: String,
    /// Prefix length in characters, 0 for the full column.
    pub prefix_length: u32,
}

impl IndexPart {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            prefix_length: 0,
        }
    }
}

/// Primary key or secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub parts: Vec<IndexPart>,
    pub primary: bool,
    pub unique: bool,
    pub comment: String,
}

impl Index {
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            parts: columns.iter().map(|c| IndexPart::new(*c)).collect(),
            primary: false,
            unique: false,
            comment: String::new(),
        }
    }

    pub fn primary_key(columns: &[&str]) -> Self {
        Self {
            primary: true,
            unique: true,
            ..Self::new("PRIMARY", columns)
        }
    }

    fn parts_list(&self) -> String {
        let parts: Vec<String> = self
            .parts
            .iter()
            .map(|p| {
                if p.prefix_length > 0 {
                    format!("{}({})", quote_ident(&p.column), p.prefix_length)
                } else {
                    quote_ident(&p.column)
                }
            })
            .collect();
        format!("({})", parts.join(","))
    }

    /// Index definition as it appears inside CREATE TABLE.
    pub fn definition(&self) -> String {
        let mut def = if self.primary {
            format!("PRIMARY KEY {}", self.parts_list())
        } else if self.unique {
            format!("UNIQUE KEY {} {}", quote_ident(&self.name), self.parts_list())
        } else {
            format!("KEY {} {}", quote_ident(&self.name), self.parts_list())
        };
        if !self.comment.is_empty() {
            def.push_str(" COMMENT ");
            def.push_str(&quote_string(&self.comment));
        }
        def
    }

    /// True if both indexes are functionally identical, ignoring name.
    pub fn equivalent(&self, other: &Index) -> bool {
        self.parts == other.parts
            && self.primary == other.primary
            && self.unique == other.unique
            && self.comment == other.comment
    }
}

/// Foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    /// Referenced schema, empty when it is the same schema.
    pub referenced_schema: String,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub update_rule: String,
    pub delete_rule: String,
}

impl ForeignKey {
    /// Constraint definition as it appears inside CREATE TABLE.
    pub fn definition(&self) -> String {
        let cols: Vec<String> = self.columns.iter().map(|c| quote_ident(c)).collect();
        let ref_cols: Vec<String> = self
            .referenced_columns
            .iter()
            .map(|c| quote_ident(c))
            .collect();
        let ref_table = if self.referenced_schema.is_empty() {
            quote_ident(&self.referenced_table)
        } else {
            format!(
                "{}.{}",
                quote_ident(&self.referenced_schema),
                quote_ident(&self.referenced_table)
            )
        };
        let mut def = format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            quote_ident(&self.name),
            cols.join(", "),
            ref_table,
            ref_cols.join(", ")
        );
        if !is_default_fk_rule(&self.delete_rule) {
            def.push_str(" ON DELETE ");
            def.push_str(&self.delete_rule);
        }
        if !is_default_fk_rule(&self.update_rule) {
            def.push_str(" ON UPDATE ");
            def.push_str(&self.update_rule);
        }
        def
    }

    /// True if both constraints are functionally identical, ignoring name.
    pub fn equivalent(&self, other: &ForeignKey) -> bool {
        self.columns == other.columns
            && self.referenced_schema == other.referenced_schema
            && self.referenced_table == other.referenced_table
            && self.referenced_columns == other.referenced_columns
            && normalize_fk_rule(&self.update_rule) == normalize_fk_rule(&other.update_rule)
            && normalize_fk_rule(&self.delete_rule) == normalize_fk_rule(&other.delete_rule)
    }
}

fn is_default_fk_rule(rule: &str) -> bool {
    rule.is_empty() || rule.eq_ignore_ascii_case("RESTRICT") || rule.eq_ignore_ascii_case("NO ACTION")
}

fn normalize_fk_rule(rule: &str) -> &str {
    if is_default_fk_rule(rule) {
        "RESTRICT"
    } else {
        rule
    }
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub engine: String,
    pub char_set: String,
    pub collation: String,

    /// Whether `SHOW CREATE TABLE` prints the COLLATE table option.
    pub show_collation: bool,

    pub comment: String,

    /// Next AUTO_INCREMENT value; values <= 1 are not displayed.
    pub auto_increment: u64,

    pub columns: Vec<Column>,
    pub primary_key: Option<Index>,

    /// Secondary indexes in the order the server displays them.
    pub secondary_indexes: Vec<Index>,

    /// Foreign keys in the order the server displays them.
    pub foreign_keys: Vec<ForeignKey>,

    /// Partitioning clause exactly as displayed, e.g. `/*!50100 PARTITION BY HASH (`id`) PARTITIONS 4 */`.
    pub partitioning: Option<String>,

    /// Server's `SHOW CREATE TABLE` output.
    pub create_statement: String,

    /// True when [`Table::generated_create_statement`] cannot reproduce `create_statement`.
    pub unsupported_ddl: bool,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            engine: "InnoDB".to_string(),
            char_set: "utf8mb4".to_string(),
            collation: "utf8mb4_0900_ai_ci".to_string(),
            show_collation: true,
            comment: String::new(),
            auto_increment: 0,
            columns: Vec::new(),
            primary_key: None,
            secondary_indexes: Vec::new(),
            foreign_keys: Vec::new(),
            partitioning: None,
            create_statement: String::new(),
            unsupported_ddl: false,
        }
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Position of a column, if present.
    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Look up a secondary index by name.
    pub fn secondary_index(&self, name: &str) -> Option<&Index> {
        self.secondary_indexes.iter().find(|i| i.name == name)
    }

    /// Look up a foreign key by name.
    pub fn foreign_key(&self, name: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|fk| fk.name == name)
    }

    /// Table options line following the closing parenthesis.
    pub fn options_clause(&self) -> String {
        let mut clause = format!("ENGINE={}", self.engine);
        if self.auto_increment > 1 {
            clause.push_str(&format!(" AUTO_INCREMENT={}", self.auto_increment));
        }
        clause.push_str(&format!(" DEFAULT CHARSET={}", self.char_set));
        if self.show_collation && !self.collation.is_empty() {
            clause.push_str(&format!(" COLLATE={}", self.collation));
        }
        if !self.comment.is_empty() {
            clause.push_str(&format!(" COMMENT={}", quote_string(&self.comment)));
        }
        clause
    }

    /// Render CREATE TABLE from the structured metadata.
    pub fn generated_create_statement(&self) -> String {
        let mut defs: Vec<String> = self.columns.iter().map(|c| c.definition()).collect();
        if let Some(pk) = &self.primary_key {
            defs.push(pk.definition());
        }
        defs.extend(self.secondary_indexes.iter().map(|i| i.definition()));
        defs.extend(self.foreign_keys.iter().map(|fk| fk.definition()));

        let body: Vec<String> = defs.into_iter().map(|d| format!("  {}", d)).collect();
        let mut stmt = format!(
            "CREATE TABLE {} (\n{}\n) {}",
            quote_ident(&self.name),
            body.join(",\n"),
            self.options_clause()
        );
        if let Some(p) = &self.partitioning {
            stmt.push('\n');
            stmt.push_str(p);
        }
        stmt
    }

    /// Recompute [`Table::unsupported_ddl`] against the server's CREATE text.
    pub fn check_supported(&mut self) {
        self.unsupported_ddl = self.generated_create_statement() != self.create_statement;
    }

    /// Fill `create_statement` from the structured metadata; used for definitions built in code.
    pub fn with_generated_create(mut self) -> Self {
        self.create_statement = self.generated_create_statement();
        self.unsupported_ddl = false;
        self
    }
}

/// Remove the `AUTO_INCREMENT=N` table option from a CREATE TABLE statement.
pub fn strip_auto_increment(create: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r" AUTO_INCREMENT=\d+").expect("valid regex"));
    re.replace(create, "").into_owned()
}

/// Split a trailing partitioning clause off a `SHOW CREATE TABLE` statement.
pub fn split_partitioning(create: &str) -> (&str, Option<&str>) {
    for marker in ["\n/*!50100 PARTITION", "\n/*!50500 PARTITION", "\nPARTITION BY"] {
        if let Some(pos) = create.find(marker) {
            return (&create[..pos], Some(&create[pos + 1..]));
        }
    }
    (create, None)
}

/// Quote a MySQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Quote a string literal the way `SHOW CREATE TABLE` does.
pub fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// `orders` table used by tests across the crate.
    pub(crate) fn orders_table() -> Table {
        let mut id = Column::new("id", "bigint unsigned");
        id.nullable = false;
        id.auto_increment = true;
        let mut customer = Column::new("customer_id", "int");
        customer.nullable = false;
        let mut status = Column::new("status", "varchar(20)");
        status.default = Some(ColumnDefault::Literal("new".to_string()));
        let mut note = Column::new("note", "text");
        note.comment = "free-form".to_string();

        let mut t = Table::new("orders");
        t.columns = vec![id, customer, status, note];
        t.primary_key = Some(Index::primary_key(&["id"]));
        t.secondary_indexes = vec![Index::new("idx_customer", &["customer_id"])];
        t.with_generated_create()
    }

    #[test]
    fn test_generated_create_statement() {
        let t = orders_table();
        let expected = "CREATE TABLE `orders` (\n\
            \x20 `id` bigint unsigned NOT NULL AUTO_INCREMENT,\n\
            \x20 `customer_id` int NOT NULL,\n\
            \x20 `status` varchar(20) DEFAULT 'new',\n\
            \x20 `note` text COMMENT 'free-form',\n\
            \x20 PRIMARY KEY (`id`),\n\
            \x20 KEY `idx_customer` (`customer_id`)\n\
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_0900_ai_ci";
        assert_eq!(t.create_statement, expected);
        assert!(!t.unsupported_ddl);
    }

    #[test]
    fn test_check_supported_flags_unknown_features() {
        let mut t = orders_table();
        t.create_statement = t.create_statement.replace(
            "ENGINE=InnoDB",
            "ENGINE=InnoDB STATS_PERSISTENT=0",
        );
        t.check_supported();
        assert!(t.unsupported_ddl);
    }

    #[test]
    fn test_strip_auto_increment() {
        let mut t = orders_table();
        t.auto_increment = 42;
        let t = t.with_generated_create();
        assert!(t.create_statement.contains("AUTO_INCREMENT=42"));
        let stripped = strip_auto_increment(&t.create_statement);
        assert!(!stripped.contains("AUTO_INCREMENT=42"));
        // Column attribute is preserved
        assert!(stripped.contains("NOT NULL AUTO_INCREMENT,"));
    }

    #[test]
    fn test_split_partitioning() {
        let create = "CREATE TABLE `t` (\n  `id` int NOT NULL\n) ENGINE=InnoDB\n/*!50100 PARTITION BY HASH (`id`)\nPARTITIONS 4 */";
        let (body, part) = split_partitioning(create);
        assert_eq!(body, "CREATE TABLE `t` (\n  `id` int NOT NULL\n) ENGINE=InnoDB");
        assert_eq!(part, Some("/*!50100 PARTITION BY HASH (`id`)\nPARTITIONS 4 */"));

        let (body, part) = split_partitioning("CREATE TABLE `t` (`id` int)");
        assert_eq!(body, "CREATE TABLE `t` (`id` int)");
        assert!(part.is_none());
    }

    #[test]
    fn test_foreign_key_definition_omits_default_rules() {
        let fk = ForeignKey {
            name: "fk_customer".into(),
            columns: vec!["customer_id".into()],
            referenced_schema: String::new(),
            referenced_table: "customers".into(),
            referenced_columns: vec!["id".into()],
            update_rule: "RESTRICT".into(),
            delete_rule: "CASCADE".into(),
        };
        assert_eq!(
            fk.definition(),
            "CONSTRAINT `fk_customer` FOREIGN KEY (`customer_id`) REFERENCES `customers` (`id`) ON DELETE CASCADE"
        );
        let mut renamed = fk.clone();
        renamed.name = "orders_ibfk_1".into();
        renamed.update_rule = "NO ACTION".into();
        assert!(fk.equivalent(&renamed));
    }

    #[test]
    fn test_quote_helpers() {
        assert_eq!(quote_ident("we`ird"), "`we``ird`");
        assert_eq!(quote_string("it's"), "'it''s'");
    }
}
