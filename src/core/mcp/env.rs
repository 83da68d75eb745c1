//! `${VAR}` substitution over configuration documents

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use super::config::ConfigError;

/// `${NAME}` or `${NAME:-default}`, optionally preceded by an escape (`\` or `$`)
static VARIABLE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(\\|\$)?\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").ok()
});

/// Substitute variables in every string of `value` using the process environment.
pub fn substitute(value: &mut Value) -> Result<(), ConfigError> {
    substitute_value(value, &|name| std::env::var(name).ok())
}

/// Substitute variables in every string of `value` using `lookup`.
///
/// Walks objects and arrays recursively. Keys are left alone.
pub fn substitute_value(
    value: &mut Value,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    match value {
        Value::String(s) => {
            if s.contains("${") {
                *s = substitute_with(s, lookup)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute_value(item, lookup)?;
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                substitute_value(item, lookup)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Substitute variables in a single string.
///
/// `${VAR:-default}` falls back when `VAR` is unset or empty. `\${VAR}` and
/// `$${VAR}` produce a literal `${VAR}`.
pub fn substitute_with(
    input: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let Some(pattern) = VARIABLE.as_ref() else {
        return Ok(input.to_string());
    };

    let mut out = String::with_capacity(input.len());
    let mut last = 0;

    for caps in pattern.captures_iter(input) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&input[last..whole.start()]);
        last = whole.end();
        out.push_str(&resolve(&caps, lookup)?);
    }

    out.push_str(&input[last..]);
    Ok(out)
}

fn resolve(
    caps: &Captures<'_>,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let name = &caps[2];

    if caps.get(1).is_some() {
        let literal = caps[0].get(1..).unwrap_or_default();
        return Ok(literal.to_string());
    }

    let value = lookup(name);
    match (value, caps.get(3)) {
        (Some(v), Some(default)) if v.is_empty() => Ok(default.as_str().to_string()),
        (Some(v), _) => Ok(v),
        (None, Some(default)) => Ok(default.as_str().to_string()),
        (None, None) => Err(ConfigError::UnresolvedVariable {
            name: name.to_string(),
        }),
    }
}
