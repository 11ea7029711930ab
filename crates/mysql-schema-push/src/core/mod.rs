//! Schema model and comparison.
//!
//! - [`schema`]: schema, table, column, index and foreign key metadata
//! - [`flavor`]: database vendor and version identification
//! - [`diff`]: comparison of two schemas into ordered object differences

pub mod diff;
pub mod flavor;
pub mod schema;

// Re-export commonly used types for convenience
pub use diff::{
    DatabaseDiff, DiffError, DiffType, NextAutoInc, ObjectDiff, PartitioningMode, SchemaDiff,
    SchemaOptions, StatementModifiers, TableDiff,
};
pub use flavor::{Flavor, Vendor};
pub use schema::{
    strip_auto_increment, Column, ColumnDefault, ForeignKey, Index, IndexPart, ObjectKey,
    ObjectKind, Schema, Table,
};
