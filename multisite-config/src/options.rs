//! Typed process options.
//!
//! Everything a multisite process needs to know at startup. Loaded once
//! through [`ConfigManager::load_validated`](crate::ConfigManager::load_validated)
//! and shared immutably afterwards.

use crate::{ConfigError, ConfigValidator, Result, Validate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Environment tier a process serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Local development
    #[default]
    Dev,
    /// Pre-production
    Staging,
    /// Production
    Prod,
}

impl Tier {
    /// All tiers, in declaration order.
    pub const ALL: [Tier; 3] = [Tier::Dev, Tier::Staging, Tier::Prod];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Dev => "dev",
            Tier::Staging => "staging",
            Tier::Prod => "prod",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "dev" | "development" => Ok(Tier::Dev),
            "staging" => Ok(Tier::Staging),
            "prod" | "production" => Ok(Tier::Prod),
            other => Err(ConfigError::ParseError(format!("unknown tier: {}", other))),
        }
    }
}

/// Process-level options.
///
/// Keys match the snake_case field names, so `MULTISITE_SHORT_NAME_PREFIX`
/// or `short_name_prefix = "..."` in a TOML file both land here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MultisiteOptions {
    /// Listener port
    pub port: u16,

    /// Host that routes to the dashboard tenant
    pub dashboard_hostname: String,

    /// Prepended to every storage namespace and session/cookie namespace
    pub short_name_prefix: String,

    /// Connection string handed to the storage provider
    pub storage_url: String,

    /// Tier this process serves
    pub tier: Tier,

    /// Per-instance request budget; `None` disables recycling
    pub max_requests_before_shutdown: Option<u64>,

    /// Upper bound of the random extra budget added to each instance
    pub additional_requests_before_shutdown: Option<u64>,

    /// Recycle the whole process instead of rebuilding instances
    pub exit: bool,

    /// Grace period for draining an instance before it is force-destroyed
    pub drain_timeout_ms: u64,

    /// `tier -> domain`; a site is also reachable as `{short_name}.{domain}`
    pub base_url_domains: HashMap<Tier, String>,

    /// `tier -> (hostname -> short name)` administrative overrides
    pub hostname_overrides: HashMap<Tier, HashMap<String, String>>,
}

impl Default for MultisiteOptions {
    fn default() -> Self {
        Self {
            port: 3000,
            dashboard_hostname: "dashboard.localhost".to_string(),
            short_name_prefix: "multisite-".to_string(),
            storage_url: "memory://".to_string(),
            tier: Tier::Dev,
            max_requests_before_shutdown: None,
            additional_requests_before_shutdown: None,
            exit: false,
            drain_timeout_ms: 30_000,
            base_url_domains: HashMap::new(),
            hostname_overrides: HashMap::new(),
        }
    }
}

impl MultisiteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_dashboard_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.dashboard_hostname = hostname.into();
        self
    }

    pub fn with_short_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.short_name_prefix = prefix.into();
        self
    }

    pub fn with_storage_url(mut self, url: impl Into<String>) -> Self {
        self.storage_url = url.into();
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    /// Enable recycling after `max` requests plus up to `additional` more.
    pub fn with_request_budget(mut self, max: u64, additional: Option<u64>) -> Self {
        self.max_requests_before_shutdown = Some(max);
        self.additional_requests_before_shutdown = additional;
        self
    }

    pub fn with_exit(mut self, exit: bool) -> Self {
        self.exit = exit;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_base_url_domain(mut self, tier: Tier, domain: impl Into<String>) -> Self {
        self.base_url_domains.insert(tier, domain.into());
        self
    }

    pub fn with_hostname_override(
        mut self,
        tier: Tier,
        hostname: impl Into<String>,
        short_name: impl Into<String>,
    ) -> Self {
        self.hostname_overrides
            .entry(tier)
            .or_default()
            .insert(hostname.into(), short_name.into());
        self
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Domain used to derive `{short_name}.{domain}` hosts in the current tier.
    pub fn base_url_domain(&self) -> Option<&str> {
        self.base_url_domains.get(&self.tier).map(String::as_str)
    }
}

impl Validate for MultisiteOptions {
    fn validate(&self) -> Result<()> {
        ConfigValidator::is_port(self.port, "port")?;
        ConfigValidator::is_hostname(&self.dashboard_hostname, "dashboard_hostname")?;
        ConfigValidator::is_identifier_prefix(&self.short_name_prefix, "short_name_prefix")?;
        ConfigValidator::not_empty(&self.storage_url, "storage_url")?;
        ConfigValidator::requires(
            &self.additional_requests_before_shutdown,
            &self.max_requests_before_shutdown,
            "additional_requests_before_shutdown",
            "max_requests_before_shutdown",
        )?;
        if self.max_requests_before_shutdown == Some(0) {
            return Err(ConfigError::ValidationError(
                "max_requests_before_shutdown must be at least 1".to_string(),
            ));
        }
        if self.exit && self.max_requests_before_shutdown.is_none() {
            return Err(ConfigError::ValidationError(
                "exit requires max_requests_before_shutdown to be set".to_string(),
            ));
        }
        for (tier, domain) in &self.base_url_domains {
            ConfigValidator::is_hostname(domain, &format!("base_url_domains.{}", tier))?;
        }
        for (tier, table) in &self.hostname_overrides {
            for (hostname, short_name) in table {
                ConfigValidator::is_hostname(hostname, &format!("hostname_overrides.{}", tier))?;
                ConfigValidator::not_empty(short_name, &format!("hostname_overrides.{}.{}", tier, hostname))?;
            }
        }
        Ok(())
    }
}
