//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;
pub use validation::{parse_bytes, parse_connect_options, parse_duration};

use std::path::Path;
use std::time::Duration;

use regex::Regex;

use crate::error::{PushError, Result};

/// File name of per-directory option files.
pub const OPTION_FILE_NAME: &str = ".push.yaml";

impl OptionFile {
    /// Load an option file, returning None if it does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map(Some)
    }

    /// Parse an option file from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: OptionFile = serde_yaml::from_str(yaml)?;
        Ok(file)
    }

    /// Environments other than `environment` whose section sets `name`.
    pub fn other_environments_setting(&self, environment: &str, name: &str) -> Vec<String> {
        self.environments
            .iter()
            .filter(|(env, opts)| env.as_str() != environment && opts.contains_key(name))
            .map(|(env, _)| env.clone())
            .collect()
    }
}

impl OptionSet {
    /// Option set holding only built-in defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set command-line overrides; these win over every option file.
    pub fn with_overrides<I, K, V>(mut self, overrides: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in overrides {
            let name = name.into();
            check_known(&name, &OptionSource::CommandLine)?;
            self.overrides.insert(name, value.into());
        }
        Ok(self)
    }

    /// Explicitly set one option.
    pub fn set(&mut self, name: &str, value: impl Into<String>, source: OptionSource) -> Result<()> {
        check_known(name, &source)?;
        self.values.insert(
            name.to_string(),
            OptionValue {
                value: value.into(),
                source,
            },
        );
        Ok(())
    }

    /// Apply an option file's top-level values, then its section for `environment`.
    pub fn apply_file(&mut self, file: &OptionFile, path: &str, environment: &str) -> Result<()> {
        for (name, value) in &file.options {
            let source = OptionSource::File {
                path: path.to_string(),
                environment: None,
            };
            self.set(name, yaml_to_string(name, value)?, source)?;
        }
        if let Some(env) = file.environments.get(environment) {
            for (name, value) in env {
                let source = OptionSource::File {
                    path: path.to_string(),
                    environment: Some(environment.to_string()),
                };
                self.set(name, yaml_to_string(name, value)?, source)?;
            }
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> &str {
        if let Some(v) = self.overrides.get(name) {
            return v;
        }
        if let Some(v) = self.values.get(name) {
            return &v.value;
        }
        default_for(name).unwrap_or("")
    }

    /// True if the option was set anywhere other than its default.
    pub fn changed(&self, name: &str) -> bool {
        self.overrides.contains_key(name) || self.values.contains_key(name)
    }

    /// Where the option's effective value came from, if explicitly set.
    pub fn source(&self, name: &str) -> Option<OptionSource> {
        if self.overrides.contains_key(name) {
            return Some(OptionSource::CommandLine);
        }
        self.values.get(name).map(|v| v.source.clone())
    }

    /// String value, empty when unset with no default.
    pub fn get_str(&self, name: &str) -> String {
        self.lookup(name).trim().to_string()
    }

    /// Boolean value; a present but empty value counts as true.
    pub fn get_bool(&self, name: &str) -> Result<bool> {
        let raw = self.lookup(name).trim().to_lowercase();
        match raw.as_str() {
            "" if self.changed(name) => Ok(true),
            "true" | "1" | "yes" | "on" => Ok(true),
            "" | "false" | "0" | "no" | "off" => Ok(false),
            other => Err(PushError::config(format!(
                "option {} has invalid boolean value \"{}\"",
                name, other
            ))),
        }
    }

    /// Lowercased value constrained to `allowed`.
    pub fn get_enum(&self, name: &str, allowed: &[&str]) -> Result<String> {
        let value = self.get_str(name).to_lowercase();
        if allowed.iter().any(|a| *a == value) {
            Ok(value)
        } else {
            Err(PushError::config(format!(
                "option {} has invalid value \"{}\": must be one of {}",
                name,
                value,
                allowed.join(", ")
            )))
        }
    }

    /// Byte size with optional K, M or G suffix.
    pub fn get_bytes(&self, name: &str) -> Result<u64> {
        parse_bytes(&self.get_str(name))
            .map_err(|e| PushError::config(format!("option {}: {}", name, e)))
    }

    /// Duration with optional ms, s or m suffix.
    pub fn get_duration(&self, name: &str) -> Result<Duration> {
        parse_duration(&self.get_str(name))
            .map_err(|e| PushError::config(format!("option {}: {}", name, e)))
    }

    /// Non-negative integer value.
    pub fn get_usize(&self, name: &str) -> Result<usize> {
        let raw = self.get_str(name);
        raw.parse::<usize>().map_err(|_| {
            PushError::config(format!("option {} has invalid numeric value \"{}\"", name, raw))
        })
    }

    /// Compiled regular expression, None when unset.
    pub fn get_regex(&self, name: &str) -> Result<Option<Regex>> {
        let raw = self.get_str(name);
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(Regex::new(&raw)?))
    }

    /// Validate every option value that has a constrained format.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

fn check_known(name: &str, source: &OptionSource) -> Result<()> {
    if default_for(name).is_none() {
        return Err(PushError::config(format!(
            "unknown option \"{}\" in {}",
            name, source
        )));
    }
    Ok(())
}

fn yaml_to_string(name: &str, value: &serde_yaml::Value) -> Result<String> {
    use serde_yaml::Value;
    match value {
        Value::Null => Ok(String::new()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(s.clone()),
        Value::Sequence(items) => {
            let parts = items
                .iter()
                .map(|v| yaml_to_string(name, v))
                .collect::<Result<Vec<_>>>()?;
            Ok(parts.join(","))
        }
        _ => Err(PushError::config(format!(
            "option {} must be a scalar or a list",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
host: db1.internal
schema: shop
allow-unsafe: true
safe-below-size: 10M
environments:
  development:
    host: localhost
    port: 3307
  staging:
    host: [stage1, "stage2:3310"]
"#;

    fn file_options(env: &str) -> OptionSet {
        let file = OptionFile::from_yaml(YAML).unwrap();
        let mut opts = OptionSet::new();
        opts.apply_file(&file, "shop/.push.yaml", env).unwrap();
        opts
    }

    #[test]
    fn test_defaults() {
        let opts = OptionSet::new();
        assert_eq!(opts.get_str("port"), "3306");
        assert_eq!(opts.get_str("user"), "root");
        assert!(opts.get_bool("verify").unwrap());
        assert!(!opts.get_bool("allow-unsafe").unwrap());
        assert!(!opts.changed("verify"));
        assert_eq!(
            opts.get_duration("lock-wait-timeout").unwrap(),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_environment_section_overrides_top_level() {
        let opts = file_options("development");
        assert_eq!(opts.get_str("host"), "localhost");
        assert_eq!(opts.get_str("port"), "3307");
        assert_eq!(opts.get_bytes("safe-below-size").unwrap(), 10 * 1024 * 1024);

        let prod = file_options("production");
        assert_eq!(prod.get_str("host"), "db1.internal");
    }

    #[test]
    fn test_sequence_values_join_with_commas() {
        let opts = file_options("staging");
        assert_eq!(opts.get_str("host"), "stage1,stage2:3310");
    }

    #[test]
    fn test_command_line_wins() {
        let opts = file_options("development")
            .with_overrides([("host", "override.local")])
            .unwrap();
        assert_eq!(opts.get_str("host"), "override.local");
        assert_eq!(opts.source("host"), Some(OptionSource::CommandLine));
    }

    #[test]
    fn test_unknown_option_rejected() {
        let file = OptionFile::from_yaml("hots: typo\n").unwrap();
        let err = OptionSet::new()
            .apply_file(&file, ".push.yaml", "production")
            .unwrap_err();
        assert!(err.to_string().contains("hots"));
        assert!(OptionSet::new().with_overrides([("nope", "1")]).is_err());
    }

    #[test]
    fn test_get_enum() {
        let mut opts = OptionSet::new();
        assert_eq!(
            opts.get_enum("partitioning", &["modify", "keep", "remove"]).unwrap(),
            "modify"
        );
        opts.set("partitioning", "KEEP", OptionSource::CommandLine).unwrap();
        assert_eq!(
            opts.get_enum("partitioning", &["modify", "keep", "remove"]).unwrap(),
            "keep"
        );
        opts.set("partitioning", "sometimes", OptionSource::CommandLine)
            .unwrap();
        assert!(opts.get_enum("partitioning", &["modify", "keep", "remove"]).is_err());
    }

    #[test]
    fn test_empty_flag_value_is_true() {
        let file = OptionFile::from_yaml("allow-unsafe:\n").unwrap();
        let mut opts = OptionSet::new();
        opts.apply_file(&file, ".push.yaml", "production").unwrap();
        assert!(opts.get_bool("allow-unsafe").unwrap());
    }

    #[test]
    fn test_other_environments_setting() {
        let file = OptionFile::from_yaml(YAML).unwrap();
        assert_eq!(
            file.other_environments_setting("production", "host"),
            vec!["development".to_string(), "staging".to_string()]
        );
        assert_eq!(
            file.other_environments_setting("staging", "host"),
            vec!["development".to_string()]
        );
        assert!(file.other_environments_setting("staging", "port").len() == 1);
    }

    #[test]
    fn test_get_regex() {
        let mut opts = OptionSet::new();
        assert!(opts.get_regex("ignore-table").unwrap().is_none());
        opts.set("ignore-table", "^_", OptionSource::CommandLine).unwrap();
        assert!(opts.get_regex("ignore-table").unwrap().unwrap().is_match("_tmp"));
        opts.set("ignore-table", "(", OptionSource::CommandLine).unwrap();
        assert!(opts.get_regex("ignore-table").is_err());
    }
}
