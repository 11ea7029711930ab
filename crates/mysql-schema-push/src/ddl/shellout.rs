//! Wrapper command templates.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::error::{PushError, Result};

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z0-9_]*)\}").expect("valid regex"))
}

/// Substitute `{VAR}` placeholders in `template` with shell-escaped values.
///
/// Placeholder names are matched case-insensitively against the upper-case
/// keys of `vars`. An unknown placeholder is a configuration error.
pub fn interpolate(template: &str, vars: &HashMap<&'static str, String>) -> Result<String> {
    let mut unknown = None;
    let rendered = placeholder_re().replace_all(template, |caps: &Captures| {
        let name = caps[1].to_ascii_uppercase();
        match vars.get(name.as_str()) {
            Some(value) => escape(value),
            None => {
                unknown.get_or_insert(caps[0].to_string());
                String::new()
            }
        }
    });
    if let Some(placeholder) = unknown {
        return Err(PushError::config(format!(
            "unknown variable {} in wrapper command \"{}\"",
            placeholder, template
        )));
    }
    Ok(rendered.into_owned())
}

/// Quote `value` for `/bin/sh` unless it only contains safe characters.
pub fn escape(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-.,:/@%+=".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}
