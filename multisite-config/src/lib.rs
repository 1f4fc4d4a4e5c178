// Configuration management for multisite processes

pub mod config_service;
pub mod env;
pub mod error;
pub mod loader;
pub mod options;
pub mod validation;

pub use config_service::ConfigService;
pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use options::{MultisiteOptions, Tier};
pub use validation::{ConfigValidator, Validate};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Environment variable prefix used by the multisite binary.
pub const ENV_PREFIX: &str = "MULTISITE";

/// Main configuration manager
///
/// Values live in a single JSON tree. Later sources override earlier ones
/// key by key, nested tables are merged rather than replaced, and dotted
/// keys (`base_url_domains.dev`) address nested entries.
#[derive(Clone)]
pub struct ConfigManager {
    root: Arc<RwLock<Map<String, Value>>>,
    env_prefix: Option<String>,
}

impl ConfigManager {
    /// Create a new configuration manager
    pub fn new() -> Self {
        Self {
            root: Arc::new(RwLock::new(Map::new())),
            env_prefix: None,
        }
    }

    /// Create with environment variable prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            root: Arc::new(RwLock::new(Map::new())),
            env_prefix: Some(prefix.into()),
        }
    }

    /// Load configuration from environment variables
    pub fn load_env(&self) -> Result<()> {
        let loader = EnvLoader::new(self.env_prefix.clone());
        let mut root = self.root.write();
        for (path, value) in loader.load()? {
            insert_path(&mut root, &path, value);
        }
        Ok(())
    }

    /// Load configuration from a `.env` file, then re-read the environment
    pub fn load_dotenv(&self, path: Option<&str>) -> Result<()> {
        match path {
            Some(path) => {
                dotenvy::from_path(path).map_err(|e| ConfigError::LoadError(e.to_string()))?;
            }
            None => {
                // a missing default .env is not an error
                dotenvy::dotenv().ok();
            }
        }
        self.load_env()
    }

    /// Load configuration from file
    pub fn load_file(&self, path: &str, format: FileFormat) -> Result<()> {
        let data = ConfigLoader::new(format).load_file(path)?;
        self.merge_value(data);
        Ok(())
    }

    /// Merge a JSON object into the tree.
    pub fn merge_value(&self, value: Value) {
        if let Value::Object(incoming) = value {
            let mut root = self.root.write();
            merge_maps(&mut root, incoming);
        }
    }

    /// Set a configuration value (dotted keys address nested tables)
    pub fn set<T: serde::Serialize>(&self, key: &str, value: T) -> Result<()> {
        let json_value = serde_json::to_value(value)
            .map_err(|e| ConfigError::SerializationError(e.to_string()))?;

        let path: Vec<String> = key.split('.').map(str::to_string).collect();
        let mut root = self.root.write();
        insert_path(&mut root, &path, json_value);

        Ok(())
    }

    /// Get a configuration value
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .lookup(key)
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?;

        serde_json::from_value(value)
            .map_err(|e| ConfigError::DeserializationError(format!("{}: {}", key, e)))
    }

    /// Get a configuration value with default
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// Get a string value
    pub fn get_string(&self, key: &str) -> Result<String> {
        self.get(key)
    }

    /// Get an integer value
    pub fn get_int(&self, key: &str) -> Result<i64> {
        self.get(key)
    }

    /// Get a boolean value
    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.get(key)
    }

    /// Check if a key exists
    pub fn has(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Get all top-level configuration keys
    pub fn keys(&self) -> Vec<String> {
        self.root.read().keys().cloned().collect()
    }

    /// Merge configuration from another manager
    pub fn merge(&self, other: &ConfigManager) {
        let snapshot = other.root.read().clone();
        let mut root = self.root.write();
        merge_maps(&mut root, snapshot);
    }

    /// Deserialize the whole tree into `T` and validate it
    pub fn load_validated<T: DeserializeOwned + Validate>(&self) -> Result<T> {
        let snapshot = Value::Object(self.root.read().clone());

        let validated: T = serde_json::from_value(snapshot)
            .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;

        validated.validate()?;

        Ok(validated)
    }

    fn lookup(&self, key: &str) -> Option<Value> {
        let root = self.root.read();
        let mut segments = key.split('.');
        let first = segments.next()?;
        let mut current = root.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current.clone())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn insert_path(root: &mut Map<String, Value>, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = root;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(last.clone(), value);
}

fn merge_maps(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        if let Value::Object(nested) = value {
            if let Some(Value::Object(existing)) = target.get_mut(&key) {
                merge_maps(existing, nested);
                continue;
            }
            target.insert(key, Value::Object(nested));
        } else {
            target.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let manager = ConfigManager::new();
        manager.set("dashboard_hostname", "dashboard.test").unwrap();

        let value: String = manager.get("dashboard_hostname").unwrap();
        assert_eq!(value, "dashboard.test");
    }

    #[test]
    fn test_get_or_default() {
        let manager = ConfigManager::new();

        let value: u16 = manager.get_or("port", 3000);
        assert_eq!(value, 3000);
    }

    #[test]
    fn test_dotted_keys() {
        let manager = ConfigManager::new();
        manager.set("base_url_domains.dev", "site.test").unwrap();

        assert!(manager.has("base_url_domains"));
        assert_eq!(manager.get_string("base_url_domains.dev").unwrap(), "site.test");
        assert!(!manager.has("base_url_domains.prod"));
    }

    #[test]
    fn test_merge_keeps_sibling_keys() {
        let manager = ConfigManager::new();
        manager.set("base_url_domains.dev", "site.test").unwrap();
        manager.merge_value(serde_json::json!({
            "base_url_domains": { "prod": "example.com" }
        }));

        assert_eq!(manager.get_string("base_url_domains.dev").unwrap(), "site.test");
        assert_eq!(manager.get_string("base_url_domains.prod").unwrap(), "example.com");
    }

    #[test]
    fn test_load_validated_options() {
        let manager = ConfigManager::new();
        manager.set("port", 4000).unwrap();
        manager.set("short_name_prefix", "test-multi-").unwrap();
        manager.set("max_requests_before_shutdown", 50).unwrap();

        let options: MultisiteOptions = manager.load_validated().unwrap();
        assert_eq!(options.port, 4000);
        assert_eq!(options.short_name_prefix, "test-multi-");
        assert_eq!(options.max_requests_before_shutdown, Some(50));
    }

    #[test]
    fn test_load_validated_rejects_invalid() {
        let manager = ConfigManager::new();
        manager.set("port", 0).unwrap();

        let result: Result<MultisiteOptions> = manager.load_validated();
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }
}
