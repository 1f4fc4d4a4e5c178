//! Tenant records
//!
//! A [`TenantRecord`] is the durable description of one site. It is stored
//! as a `site` piece in the dashboard's content store, so its serialized
//! form uses the piece conventions (`_id`, camelCase fields).

use crate::resolver::normalize_host;
use chrono::{DateTime, Utc};
use multisite_config::Tier;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Durable tenant description
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantRecord {
    /// Unique tenant identifier, immutable
    #[serde(rename = "_id")]
    pub id: String,

    pub title: String,

    /// Globally unique short identifier, namespaces the tenant's storage
    pub short_name: String,

    /// Hostnames bound in every tier
    #[serde(default)]
    pub hostnames: Vec<String>,

    /// Base URL used in the dev tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_base_url: Option<String>,

    /// Base URL used in the staging tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_base_url: Option<String>,

    #[serde(default = "default_published")]
    pub published: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_password_hash: Option<String>,

    /// `tier:host` bindings derived from the fields above
    #[serde(default)]
    pub routes: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_published() -> bool {
    true
}

impl TenantRecord {
    /// Create a record with a fresh id; the short name defaults to the id.
    pub fn new(title: impl Into<String>) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        Self {
            short_name: id.clone(),
            id,
            title: title.into(),
            hostnames: Vec::new(),
            dev_base_url: None,
            staging_base_url: None,
            published: true,
            admin_password_hash: None,
            routes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_short_name(mut self, short_name: impl Into<String>) -> Self {
        self.short_name = short_name.into();
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostnames.push(hostname.into());
        self
    }

    pub fn with_published(mut self, published: bool) -> Self {
        self.published = published;
        self
    }

    /// Private storage namespace: `{prefix}{short_name}`
    pub fn storage_namespace(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.short_name)
    }

    /// Session and cookie namespace: `{prefix}{id}`
    pub fn session_namespace(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.id)
    }

    /// Lowercase, strip ports, drop blanks and duplicates, keep order.
    pub fn normalize(&mut self) {
        self.short_name = self.short_name.trim().to_lowercase();
        self.title = self.title.trim().to_string();

        let mut hostnames: Vec<String> = Vec::with_capacity(self.hostnames.len());
        for host in self.hostnames.iter().map(|h| normalize_host(h)) {
            if !host.is_empty() && !hostnames.contains(&host) {
                hostnames.push(host);
            }
        }
        self.hostnames = hostnames;

        for url in [&mut self.dev_base_url, &mut self.staging_base_url] {
            if url.as_deref().is_some_and(|u| u.trim().is_empty()) {
                *url = None;
            }
        }

        self.routes = self.compute_routes();
    }

    /// Every `tier:host` this record claims.
    ///
    /// Explicit hostnames apply in all tiers; a tier base URL adds its host
    /// to that tier only.
    pub fn compute_routes(&self) -> Vec<String> {
        let mut routes = Vec::new();
        let mut push = |route: String| {
            if !routes.contains(&route) {
                routes.push(route);
            }
        };

        for tier in Tier::ALL {
            for host in &self.hostnames {
                push(route_key(tier, host));
            }
        }
        if let Some(host) = self.dev_base_url.as_deref().and_then(host_of_url) {
            push(route_key(Tier::Dev, &host));
        }
        if let Some(host) = self.staging_base_url.as_deref().and_then(host_of_url) {
            push(route_key(Tier::Staging, &host));
        }

        routes
    }

    /// Set the admin password; only a salted digest is kept.
    pub fn set_admin_password(&mut self, password: &str) {
        self.admin_password_hash = Some(hash_password(&self.id, password));
    }

    pub fn verify_admin_password(&self, password: &str) -> bool {
        self.admin_password_hash
            .as_deref()
            .is_some_and(|hash| hash == hash_password(&self.id, password))
    }

    /// Serialized form for API responses, without the password digest.
    pub fn public_view(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(map) = value.as_object_mut() {
            map.remove("adminPasswordHash");
        }
        value
    }
}

/// `"{tier}:{host}"`
pub fn route_key(tier: Tier, host: &str) -> String {
    format!("{}:{}", tier, host)
}

/// Host portion of a base URL such as `http://site.test:3000/path`.
pub fn host_of_url(url: &str) -> Option<String> {
    let rest = url.trim();
    let rest = rest.split_once("://").map(|(_, r)| r).unwrap_or(rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let authority = authority.rsplit('@').next().unwrap_or(authority);
    let host = normalize_host(authority);
    (!host.is_empty()).then_some(host)
}

/// SHA-256 of `"{id}:{password}"`, hex encoded.
pub fn hash_password(id: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Request to create a tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateTenantRequest {
    pub title: String,
    /// Defaults to the generated id
    pub short_name: Option<String>,
    pub hostnames: Vec<String>,
    pub dev_base_url: Option<String>,
    pub staging_base_url: Option<String>,
    pub published: bool,
    pub admin_password: Option<String>,
}

impl Default for CreateTenantRequest {
    fn default() -> Self {
        Self {
            title: String::new(),
            short_name: None,
            hostnames: Vec::new(),
            dev_base_url: None,
            staging_base_url: None,
            published: true,
            admin_password: None,
        }
    }
}

impl CreateTenantRequest {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_short_name(mut self, short_name: impl Into<String>) -> Self {
        self.short_name = Some(short_name.into());
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostnames.push(hostname.into());
        self
    }

    pub fn with_dev_base_url(mut self, url: impl Into<String>) -> Self {
        self.dev_base_url = Some(url.into());
        self
    }

    pub fn with_staging_base_url(mut self, url: impl Into<String>) -> Self {
        self.staging_base_url = Some(url.into());
        self
    }

    pub fn with_published(mut self, published: bool) -> Self {
        self.published = published;
        self
    }

    pub fn with_admin_password(mut self, password: impl Into<String>) -> Self {
        self.admin_password = Some(password.into());
        self
    }

    /// Turn the request into an unsaved record with a fresh id.
    pub fn into_record(self) -> TenantRecord {
        let mut record = TenantRecord::new(self.title);
        if let Some(short_name) = self.short_name.filter(|s| !s.trim().is_empty()) {
            record.short_name = short_name;
        }
        record.hostnames = self.hostnames;
        record.dev_base_url = self.dev_base_url;
        record.staging_base_url = self.staging_base_url;
        record.published = self.published;
        if let Some(password) = self.admin_password.filter(|p| !p.is_empty()) {
            record.set_admin_password(&password);
        }
        record.normalize();
        record
    }
}

/// Partial update of a tenant
///
/// Absent fields are left alone. An empty base URL clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateTenantRequest {
    pub title: Option<String>,
    pub short_name: Option<String>,
    pub hostnames: Option<Vec<String>>,
    pub dev_base_url: Option<String>,
    pub staging_base_url: Option<String>,
    pub published: Option<bool>,
    pub admin_password: Option<String>,
}

impl UpdateTenantRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_short_name(mut self, short_name: impl Into<String>) -> Self {
        self.short_name = Some(short_name.into());
        self
    }

    pub fn with_hostnames(mut self, hostnames: Vec<String>) -> Self {
        self.hostnames = Some(hostnames);
        self
    }

    pub fn with_dev_base_url(mut self, url: impl Into<String>) -> Self {
        self.dev_base_url = Some(url.into());
        self
    }

    pub fn with_published(mut self, published: bool) -> Self {
        self.published = Some(published);
        self
    }

    pub fn with_admin_password(mut self, password: impl Into<String>) -> Self {
        self.admin_password = Some(password.into());
        self
    }

    /// Apply onto `record` and re-normalize it.
    pub fn apply(self, record: &mut TenantRecord) {
        if let Some(title) = self.title {
            record.title = title;
        }
        if let Some(short_name) = self.short_name {
            record.short_name = short_name;
        }
        if let Some(hostnames) = self.hostnames {
            record.hostnames = hostnames;
        }
        if let Some(url) = self.dev_base_url {
            record.dev_base_url = Some(url);
        }
        if let Some(url) = self.staging_base_url {
            record.staging_base_url = Some(url);
        }
        if let Some(published) = self.published {
            record.published = published;
        }
        if let Some(password) = self.admin_password.filter(|p| !p.is_empty()) {
            record.set_admin_password(&password);
        }
        record.normalize();
    }
}
