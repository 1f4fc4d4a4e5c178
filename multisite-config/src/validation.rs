// Configuration validation

use crate::{ConfigError, Result};
use regex::Regex;
use std::sync::LazyLock;

static IDENTIFIER_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_-]*$").expect("static regex"));

/// Trait for validating configuration
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Configuration validator with rules
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate that a value is not empty
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "{} cannot be empty",
                field
            )));
        }
        Ok(())
    }

    /// Validate that a number is within range
    pub fn in_range<T: PartialOrd + std::fmt::Display>(
        value: T,
        min: T,
        max: T,
        field: &str,
    ) -> Result<()> {
        if value < min || value > max {
            return Err(ConfigError::ValidationError(format!(
                "{} must be between {} and {}",
                field, min, max
            )));
        }
        Ok(())
    }

    /// Validate port number
    pub fn is_port(value: u16, field: &str) -> Result<()> {
        if value == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{} must be a valid port number",
                field
            )));
        }
        Ok(())
    }

    /// Validate a bare hostname: no scheme, path or whitespace.
    pub fn is_hostname(value: &str, field: &str) -> Result<()> {
        Self::not_empty(value, field)?;
        let invalid = value.contains("://")
            || value.contains('/')
            || value.chars().any(char::is_whitespace);
        if invalid {
            return Err(ConfigError::ValidationError(format!(
                "{} must be a bare hostname, got {:?}",
                field, value
            )));
        }
        Ok(())
    }

    /// Validate a string that gets prepended to storage and cookie names.
    pub fn is_identifier_prefix(value: &str, field: &str) -> Result<()> {
        if !IDENTIFIER_PREFIX.is_match(value) {
            return Err(ConfigError::ValidationError(format!(
                "{} may only contain lowercase letters, digits, '-' and '_'",
                field
            )));
        }
        Ok(())
    }

    /// Validate that `dependent` is only set together with `required`.
    pub fn requires<A, B>(dependent: &Option<A>, required: &Option<B>, field: &str, other: &str) -> Result<()> {
        if dependent.is_some() && required.is_none() {
            return Err(ConfigError::ValidationError(format!(
                "{} requires {} to be set",
                field, other
            )));
        }
        Ok(())
    }
}
