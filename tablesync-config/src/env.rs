// Environment variable overrides

use serde_json::{Map, Value};
use std::env;

/// Separator between section and key in variable names:
/// `TABLESYNC_ID__CLOCK_TOLERANCE_MS` -> `id.clock_tolerance_ms`.
pub const SECTION_SEPARATOR: &str = "__";

/// Collects prefixed environment variables into a nested JSON tree.
pub struct EnvLoader {
    prefix: String,
}

impl EnvLoader {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load overrides from the process environment
    pub fn load(&self) -> Value {
        self.from_pairs(env::vars())
    }

    /// Build overrides from explicit pairs. Variables without the prefix or
    /// without a section are ignored.
    pub fn from_pairs<I, K, V>(&self, vars: I) -> Value
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut root = Map::new();
        let prefix = format!("{}_", self.prefix);

        for (key, value) in vars {
            let Some(rest) = key.as_ref().strip_prefix(&prefix) else {
                continue;
            };
            let Some((section, field)) = rest.split_once(SECTION_SEPARATOR) else {
                continue;
            };
            if section.is_empty() || field.is_empty() {
                continue;
            }

            let section = root
                .entry(section.to_ascii_lowercase())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(section) = section {
                section.insert(field.to_ascii_lowercase(), parse_scalar(value.as_ref()));
            }
        }

        Value::Object(root)
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new("TABLESYNC")
    }
}

/// Interpret an environment string as a JSON scalar: integers, floats and
/// booleans keep their type, anything else stays a string.
fn parse_scalar(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(n) = trimmed.parse::<u64>() {
        return Value::from(n);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return Value::from(f);
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // std::env::set_var is unsafe in edition 2024, so overrides are tested
    // through explicit pairs.

    #[test]
    fn test_sections_are_nested() {
        let loader = EnvLoader::default();
        let value = loader.from_pairs([
            ("TABLESYNC_ID__CLOCK_TOLERANCE_MS", "7"),
            ("TABLESYNC_NODE__OWNER", "worker-a"),
            ("TABLESYNC_PRESENCE__TTL_SECS", "120"),
        ]);

        assert_eq!(value["id"]["clock_tolerance_ms"], 7);
        assert_eq!(value["node"]["owner"], "worker-a");
        assert_eq!(value["presence"]["ttl_secs"], 120);
    }

    #[test]
    fn test_unrelated_and_sectionless_vars_ignored() {
        let loader = EnvLoader::new("APP");
        let value = loader.from_pairs([("PATH", "/bin"), ("APP_DEBUG", "1"), ("APP___X", "1")]);
        assert_eq!(value, Value::Object(Map::new()));
    }

    #[test]
    fn test_parse_scalar() {
        assert_eq!(parse_scalar("42"), Value::from(42));
        assert_eq!(parse_scalar("TRUE"), Value::Bool(true));
        assert_eq!(parse_scalar("1.5"), Value::from(1.5));
        assert_eq!(parse_scalar("node-7"), Value::String("node-7".into()));
    }
}
