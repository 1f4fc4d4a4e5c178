// Environment variable loading

use crate::{ConfigError, Result};
use serde_json::Value;
use std::env;

/// Separator used in variable names to address nested keys.
///
/// `MULTISITE_BASE_URL_DOMAINS__DEV=site.test` becomes the path
/// `["base_url_domains", "dev"]`.
pub const NESTING_SEPARATOR: &str = "__";

/// Environment variable loader
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    /// Create a new environment loader
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    /// Collect matching variables as `(key path, value)` pairs.
    ///
    /// Keys are lowercased with the prefix removed; values go through
    /// [`parse_value`] so numbers and booleans keep their type.
    pub fn load(&self) -> Result<Vec<(Vec<String>, Value)>> {
        Ok(self.collect(env::vars()))
    }

    fn collect(&self, vars: impl Iterator<Item = (String, String)>) -> Vec<(Vec<String>, Value)> {
        vars.filter_map(|(key, value)| {
            let key = match &self.prefix {
                Some(prefix) => key.strip_prefix(prefix.as_str())?.strip_prefix('_')?.to_string(),
                None => key,
            };
            let path: Vec<String> = key
                .to_lowercase()
                .split(NESTING_SEPARATOR)
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect();
            if path.is_empty() {
                None
            } else {
                Some((path, parse_value(&value)))
            }
        })
        .collect()
    }

    /// Load a specific environment variable
    pub fn load_var(&self, key: &str) -> Result<String> {
        let full_key = match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix, key.to_uppercase()),
            None => key.to_uppercase(),
        };

        env::var(&full_key).map_err(ConfigError::EnvError)
    }

    /// Load with default value
    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|_| default.to_string())
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Interpret a raw variable value.
///
/// Integers, floats, booleans and `null` become typed JSON values, anything
/// else stays a string. JSON objects and arrays are accepted verbatim.
pub fn parse_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    let looks_structured = trimmed.starts_with('{') || trimmed.starts_with('[');
    let looks_scalar = trimmed == "true"
        || trimmed == "false"
        || trimmed == "null"
        || trimmed.parse::<f64>().is_ok();

    if looks_structured || looks_scalar {
        if let Ok(value) = serde_json::from_str(trimmed) {
            return value;
        }
    }
    Value::String(raw.to_string())
}
