//! Configuration validation and option value parsing.

use std::time::Duration;

use super::OptionSet;
use crate::error::{PushError, Result};

/// Parse a byte size such as `0`, `512`, `64K`, `10M` or `2G` (powers of 1024).
pub fn parse_bytes(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(0);
    }
    let (digits, multiplier) = match s.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&s[..s.len() - 1], 1024u64),
        Some('M') => (&s[..s.len() - 1], 1024 * 1024),
        Some('G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    let n: u64 = digits
        .trim()
        .parse()
        .map_err(|_| PushError::config(format!("invalid byte size \"{}\"", s)))?;
    n.checked_mul(multiplier)
        .ok_or_else(|| PushError::config(format!("byte size \"{}\" is too large", s)))
}

/// Parse a duration such as `250ms`, `30s` or `2m`; a bare number is seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let invalid = || PushError::config(format!("invalid duration \"{}\"", s));
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.trim().parse().map(Duration::from_millis).map_err(|_| invalid());
    }
    if let Some(secs) = s.strip_suffix('s') {
        return secs.trim().parse().map(Duration::from_secs).map_err(|_| invalid());
    }
    if let Some(mins) = s.strip_suffix('m') {
        let mins: u64 = mins.trim().parse().map_err(|_| invalid())?;
        return mins
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| PushError::config(format!("duration \"{}\" is too large", s)));
    }
    s.parse().map(Duration::from_secs).map_err(|_| invalid())
}

/// Parse `connect-options` into session variable assignments.
///
/// Format is a comma-separated list of `name=value` pairs. Values may be
/// single-quoted to contain commas.
pub fn parse_connect_options(s: &str) -> Result<Vec<(String, String)>> {
    let mut result = Vec::new();
    let mut name = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut in_quote = false;

    let mut finish = |name: &mut String, value: &mut String| -> Result<()> {
        let n = name.trim().to_string();
        let v = value.trim().to_string();
        name.clear();
        value.clear();
        if n.is_empty() && v.is_empty() {
            return Ok(());
        }
        if n.is_empty() || !n.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(PushError::config(format!(
                "connect-options: invalid variable name \"{}\"",
                n
            )));
        }
        if v.is_empty() {
            return Err(PushError::config(format!(
                "connect-options: variable {} has no value",
                n
            )));
        }
        if n.eq_ignore_ascii_case("autocommit") && v != "1" {
            return Err(PushError::config(
                "connect-options: autocommit cannot be disabled",
            ));
        }
        result.push((n.to_lowercase(), v));
        Ok(())
    };

    for c in s.chars() {
        match c {
            '\'' if in_value => {
                in_quote = !in_quote;
                value.push(c);
            }
            ',' if !in_quote => {
                if !in_value && !name.trim().is_empty() {
                    return Err(PushError::config(format!(
                        "connect-options: \"{}\" is missing '='",
                        name.trim()
                    )));
                }
                finish(&mut name, &mut value)?;
                in_value = false;
            }
            '=' if !in_value => in_value = true,
            _ if in_value => value.push(c),
            _ => name.push(c),
        }
    }
    if in_quote {
        return Err(PushError::config("connect-options: unterminated quote"));
    }
    if !in_value && !name.trim().is_empty() {
        return Err(PushError::config(format!(
            "connect-options: \"{}\" is missing '='",
            name.trim()
        )));
    }
    finish(&mut name, &mut value)?;
    Ok(result)
}

/// Validate every option value that has a constrained format.
pub fn validate(options: &OptionSet) -> Result<()> {
    for name in [
        "allow-unsafe",
        "exact-match",
        "lax-column-order",
        "foreign-key-checks",
        "verify",
        "reuse-temp-schema",
        "first-only",
    ] {
        options.get_bool(name)?;
    }
    options.get_bytes("safe-below-size")?;
    options.get_bytes("alter-wrapper-min-size")?;
    options.get_duration("lock-wait-timeout")?;
    options.get_enum("partitioning", &["modify", "keep", "remove"])?;
    options.get_enum("docker-cleanup", &["none", "stop", "destroy"])?;
    options.get_enum("workspace", &["temp-schema", "docker"])?;
    options.get_enum("alter-algorithm", &["", "inplace", "copy", "instant", "nocopy", "default"])?;
    options.get_enum("alter-lock", &["", "none", "shared", "exclusive", "default"])?;
    options.get_regex("ignore-table")?;
    parse_connect_options(&options.get_str("connect-options"))?;

    let port = options.get_str("port");
    if port.parse::<u16>().map_or(true, |p| p == 0) {
        return Err(PushError::config(format!("invalid port \"{}\"", port)));
    }
    if options.get_usize("temp-schema-threads")? == 0 {
        return Err(PushError::config("temp-schema-threads must be at least 1"));
    }
    if options.get_str("temp-schema").is_empty() {
        return Err(PushError::config("temp-schema cannot be empty"));
    }
    if options.get_str("workspace").eq_ignore_ascii_case("docker") {
        let flavor = crate::core::Flavor::parse(&options.get_str("flavor"));
        if options.changed("flavor") && !flavor.known() {
            return Err(PushError::config(format!(
                "invalid flavor \"{}\"",
                options.get_str("flavor")
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptionSource;

    #[test]
    fn test_parse_bytes() {
        assert_eq!(parse_bytes("0").unwrap(), 0);
        assert_eq!(parse_bytes("").unwrap(), 0);
        assert_eq!(parse_bytes("512").unwrap(), 512);
        assert_eq!(parse_bytes("64k").unwrap(), 64 * 1024);
        assert_eq!(parse_bytes("10M").unwrap(), 10 * 1024 * 1024);
        assert_eq!(parse_bytes("2G").unwrap(), 2 * 1024 * 1024 * 1024);
        assert!(parse_bytes("ten").is_err());
        assert!(parse_bytes("5T").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("5").unwrap(), Duration::from_secs(5));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration(&format!("{}m", u64::MAX)).is_err());
    }

    #[test]
    fn test_parse_connect_options() {
        let opts = parse_connect_options("innodb_lock_wait_timeout=5, sql_mode='STRICT_ALL_TABLES,NO_ZERO_DATE'").unwrap();
        assert_eq!(
            opts,
            vec![
                ("innodb_lock_wait_timeout".to_string(), "5".to_string()),
                (
                    "sql_mode".to_string(),
                    "'STRICT_ALL_TABLES,NO_ZERO_DATE'".to_string()
                ),
            ]
        );
        assert!(parse_connect_options("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_connect_options_rejects_malformed() {
        assert!(parse_connect_options("wait_timeout").is_err());
        assert!(parse_connect_options("bad-name=1").is_err());
        assert!(parse_connect_options("sql_mode='unterminated").is_err());
        assert!(parse_connect_options("wait_timeout=").is_err());
        assert!(parse_connect_options("autocommit=0").is_err());
    }

    #[test]
    fn test_valid_defaults() {
        assert!(validate(&OptionSet::new()).is_ok());
    }

    #[test]
    fn test_invalid_port() {
        let mut opts = OptionSet::new();
        opts.set("port", "99999", OptionSource::CommandLine).unwrap();
        assert!(validate(&opts).is_err());
    }

    #[test]
    fn test_invalid_docker_cleanup() {
        let mut opts = OptionSet::new();
        opts.set("docker-cleanup", "shred", OptionSource::CommandLine).unwrap();
        assert!(validate(&opts).is_err());
    }

    #[test]
    fn test_invalid_workspace_kind() {
        let mut opts = OptionSet::new();
        opts.set("workspace", "tmp-schema", OptionSource::CommandLine).unwrap();
        let err = validate(&opts).unwrap_err();
        assert!(matches!(err, PushError::Config(_)));
        assert!(err.to_string().contains("tmp-schema"));
    }

    #[test]
    fn test_zero_temp_schema_threads() {
        let mut opts = OptionSet::new();
        opts.set("temp-schema-threads", "0", OptionSource::CommandLine).unwrap();
        assert!(validate(&opts).is_err());
    }
}
