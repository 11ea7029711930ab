//! Configuration type definitions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Every option a `.push.yaml` file or the command line may set, with its default.
pub const KNOWN_OPTIONS: &[(&str, &str)] = &[
    ("host", ""),
    ("port", "3306"),
    ("socket", ""),
    ("user", "root"),
    ("password", ""),
    ("schema", ""),
    ("default-character-set", ""),
    ("default-collation", ""),
    ("connect-options", ""),
    ("allow-unsafe", "false"),
    ("safe-below-size", "0"),
    ("alter-wrapper", ""),
    ("alter-wrapper-min-size", "0"),
    ("ddl-wrapper", ""),
    ("alter-algorithm", ""),
    ("alter-lock", ""),
    ("exact-match", "false"),
    ("lax-column-order", "false"),
    ("partitioning", "modify"),
    ("foreign-key-checks", "false"),
    ("verify", "true"),
    ("workspace", "temp-schema"),
    ("temp-schema", "_mysql_schema_push_tmp"),
    ("reuse-temp-schema", "false"),
    ("temp-schema-threads", "5"),
    ("lock-wait-timeout", "30s"),
    ("docker-cleanup", "none"),
    ("flavor", ""),
    ("first-only", "false"),
    ("ignore-table", ""),
];

/// Default value of a known option, or None if the name is unknown.
pub fn default_for(name: &str) -> Option<&'static str> {
    KNOWN_OPTIONS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, d)| *d)
}

/// Where an option value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionSource {
    /// Option file at the given path, optionally from an environment section.
    File {
        path: String,
        environment: Option<String>,
    },
    /// Command-line flag.
    CommandLine,
}

impl fmt::Display for OptionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionSource::File {
                path,
                environment: Some(env),
            } => write!(f, "{} [{}]", path, env),
            OptionSource::File {
                path,
                environment: None,
            } => write!(f, "{}", path),
            OptionSource::CommandLine => write!(f, "command line"),
        }
    }
}

/// A single explicitly-set option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionValue {
    pub value: String,
    pub source: OptionSource,
}

/// Contents of one `.push.yaml` file.
///
/// Top-level keys are options; the `environments` map holds per-environment
/// overrides applied on top of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionFile {
    /// Per-environment option overrides.
    #[serde(default)]
    pub environments: BTreeMap<String, BTreeMap<String, serde_yaml::Value>>,

    /// Top-level options.
    #[serde(flatten)]
    pub options: BTreeMap<String, serde_yaml::Value>,
}

/// Layered option values for one directory.
///
/// Lookups resolve command-line overrides first, then values set by option
/// files (the nearest directory wins), then built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct OptionSet {
    pub(crate) values: BTreeMap<String, OptionValue>,
    pub(crate) overrides: BTreeMap<String, String>,
}

/// Run-wide settings that do not vary per directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunOptions {
    /// Environment section to apply from option files (default: "production").
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Number of instances to process concurrently (default: 1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrent_instances: Option<usize>,

    /// Print DDL without executing it.
    #[serde(default)]
    pub dry_run: bool,

    /// Only print the names of instances with differences.
    #[serde(default)]
    pub brief: bool,

    /// Maximum directory recursion depth (default: 32).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            concurrent_instances: None,
            dry_run: false,
            brief: false,
            max_depth: None,
        }
    }
}

impl RunOptions {
    pub fn get_concurrent_instances(&self) -> usize {
        self.concurrent_instances.unwrap_or(1).max(1)
    }

    pub fn get_max_depth(&self) -> usize {
        self.max_depth.unwrap_or(32)
    }
}

fn default_environment() -> String {
    "production".to_string()
}
