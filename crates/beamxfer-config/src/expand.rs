//! `$VAR` / `${VAR}` interpolation over YAML documents.
//!
//! Unset variables are left in place, matching shell `expandvars` behaviour.

use once_cell::sync::OnceCell;
use regex::{Captures, Regex};
use serde_yaml::Value;

use crate::error::{ConfigError, ConfigResult};

static ENV_REFERENCE: OnceCell<Regex> = OnceCell::new();

fn env_reference() -> ConfigResult<&'static Regex> {
    ENV_REFERENCE.get_or_try_init(|| {
        Regex::new(r"\$(?:\{(?P<braced>[A-Za-z_][A-Za-z0-9_]*)\}|(?P<bare>[A-Za-z_][A-Za-z0-9_]*))")
            .map_err(|source| ConfigError::Pattern { source })
    })
}

/// Expand environment references in every string of `value`, recursing into
/// mappings and sequences. Mapping keys are left untouched.
///
/// # Errors
///
/// Returns an error only if the interpolation pattern cannot be compiled.
pub fn expand_env_vars<F>(value: Value, lookup: &F) -> ConfigResult<Value>
where
    F: Fn(&str) -> Option<String> + ?Sized,
{
    let pattern = env_reference()?;
    Ok(expand_value(pattern, value, lookup))
}

fn expand_value<F>(pattern: &Regex, value: Value, lookup: &F) -> Value
where
    F: Fn(&str) -> Option<String> + ?Sized,
{
    match value {
        Value::String(text) => Value::String(expand_str(pattern, &text, lookup)),
        Value::Sequence(items) => Value::Sequence(
            items
                .into_iter()
                .map(|item| expand_value(pattern, item, lookup))
                .collect(),
        ),
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(key, item)| (key, expand_value(pattern, item, lookup)))
                .collect(),
        ),
        other => other,
    }
}

fn expand_str<F>(pattern: &Regex, text: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String> + ?Sized,
{
    pattern
        .replace_all(text, |caps: &Captures<'_>| {
            let name = caps
                .name("braced")
                .or_else(|| caps.name("bare"))
                .map_or("", |m| m.as_str());
            lookup(name).unwrap_or_else(|| caps.get(0).map_or("", |m| m.as_str()).to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "GLOBUS_CLIENT_ID" => Some("abc-123".into()),
            "SCRATCH" => Some("/pscratch/sd/a".into()),
            _ => None,
        }
    }

    #[test]
    fn expands_nested_strings_and_keeps_unknown_references() -> anyhow::Result<()> {
        let document: Value = serde_yaml::from_str(
            r"
globus_apps:
  als_transfer:
    client_id: $GLOBUS_CLIENT_ID
    client_secret: ${MISSING_SECRET}
roots:
  - ${SCRATCH}/raw
  - 42
",
        )?;
        let expanded = expand_env_vars(document, &lookup)?;
        let app = &expanded["globus_apps"]["als_transfer"];
        assert_eq!(app["client_id"].as_str(), Some("abc-123"));
        assert_eq!(app["client_secret"].as_str(), Some("${MISSING_SECRET}"));
        assert_eq!(expanded["roots"][0].as_str(), Some("/pscratch/sd/a/raw"));
        assert_eq!(expanded["roots"][1].as_u64(), Some(42));
        Ok(())
    }

    #[test]
    fn leaves_plain_dollar_signs_alone() -> anyhow::Result<()> {
        let expanded = expand_env_vars(Value::String("cost: $5 and $".into()), &lookup)?;
        assert_eq!(expanded.as_str(), Some("cost: $5 and $"));
        Ok(())
    }
}
