//! Tenant Registry
//!
//! The durable mapping from tenant identity to [`TenantRecord`]. All writes
//! pass shape validation and then the [`UniquenessValidator`] before they
//! reach the store.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use multisite_tenancy::*;
//!
//! let registry = TenantRegistry::new(store, &options);
//!
//! let site = registry
//!     .insert(CreateTenantRequest::new("Site A").with_short_name("aaa").with_hostname("site.test"))
//!     .await?;
//!
//! // Renaming re-runs the uniqueness check
//! registry
//!     .apply(&site.id, UpdateTenantRequest::new().with_short_name("bbb"))
//!     .await?;
//! ```

use crate::TenantError;
use crate::locks::KeyedLocks;
use crate::resolver::normalize_host;
use crate::store::{RegistryQuery, RegistryStore};
use crate::tenant::{CreateTenantRequest, TenantRecord, UpdateTenantRequest, route_key};
use crate::uniqueness::UniquenessValidator;
use chrono::Utc;
use multisite_config::{MultisiteOptions, Tier};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::info;

static SHORT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("static regex")
});

/// Short name held by the dashboard's own storage namespace
pub const RESERVED_SHORT_NAME: &str = "dashboard";

/// Tenant registry
pub struct TenantRegistry {
    store: Arc<dyn RegistryStore>,
    validator: UniquenessValidator,
    records: KeyedLocks,
    tier: Tier,
    dashboard_hostname: String,
}

impl TenantRegistry {
    pub fn new(store: Arc<dyn RegistryStore>, options: &MultisiteOptions) -> Self {
        Self {
            validator: UniquenessValidator::new(store.clone(), options),
            records: KeyedLocks::new(),
            store,
            tier: options.tier,
            dashboard_hostname: normalize_host(&options.dashboard_hostname),
        }
    }

    /// Tier this registry resolves routes in
    pub fn tier(&self) -> Tier {
        self.tier
    }

    fn validate_shape(&self, record: &TenantRecord) -> Result<(), TenantError> {
        if record.title.is_empty() {
            return Err(TenantError::Invalid("title is required".to_string()));
        }
        if !SHORT_NAME.is_match(&record.short_name) {
            return Err(TenantError::Invalid(format!(
                "short name {:?} may only contain lowercase letters, digits and '-'",
                record.short_name
            )));
        }
        if record.short_name == RESERVED_SHORT_NAME {
            return Err(TenantError::Invalid(format!(
                "short name {:?} is reserved",
                record.short_name
            )));
        }
        for host in &record.hostnames {
            if host.contains('/') || host.chars().any(char::is_whitespace) {
                return Err(TenantError::Invalid(format!("bad hostname {:?}", host)));
            }
        }
        let dashboard_route_taken = Tier::ALL
            .iter()
            .any(|tier| record.routes.contains(&route_key(*tier, &self.dashboard_hostname)));
        if dashboard_route_taken {
            return Err(TenantError::Invalid(
                "the dashboard hostname cannot be assigned to a site".to_string(),
            ));
        }
        Ok(())
    }

    /// Create a new tenant record
    pub async fn insert(&self, request: CreateTenantRequest) -> Result<TenantRecord, TenantError> {
        let record = request.into_record();
        self.validate_shape(&record)?;

        let store = self.store.clone();
        let saved = self
            .validator
            .commit(record, |record| async move { store.insert(&record).await })
            .await?;

        info!(tenant = %saved.id, short_name = %saved.short_name, "tenant created");
        Ok(saved)
    }

    fn record_key(id: &str) -> String {
        format!("id:{}", id)
    }

    /// Replace a stored record, re-running every uniqueness check
    pub async fn update(&self, record: TenantRecord) -> Result<TenantRecord, TenantError> {
        let _guard = self.records.lock(&Self::record_key(&record.id)).await;
        self.replace(record).await
    }

    async fn replace(&self, mut record: TenantRecord) -> Result<TenantRecord, TenantError> {
        record.normalize();
        self.validate_shape(&record)?;

        let store = self.store.clone();
        let saved = self
            .validator
            .commit(record, |mut record| async move {
                let existing = store
                    .find(&RegistryQuery::by_id(&record.id))
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| TenantError::NotFound(record.id.clone()))?;
                record.created_at = existing.created_at;
                record.updated_at = Utc::now();
                store.update(&record).await
            })
            .await?;

        info!(tenant = %saved.id, short_name = %saved.short_name, "tenant updated");
        Ok(saved)
    }

    /// Load, apply a partial update, and save.
    ///
    /// Writes to the same record are serialized from the read to the save.
    pub async fn apply(
        &self,
        id: &str,
        request: UpdateTenantRequest,
    ) -> Result<TenantRecord, TenantError> {
        let _guard = self.records.lock(&Self::record_key(id)).await;
        let mut record = self
            .get(id)
            .await?
            .ok_or_else(|| TenantError::NotFound(id.to_string()))?;
        request.apply(&mut record);
        self.replace(record).await
    }

    pub async fn find(&self, query: &RegistryQuery) -> Result<Vec<TenantRecord>, TenantError> {
        self.store.find(query).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<TenantRecord>, TenantError> {
        Ok(self.store.find(&RegistryQuery::by_id(id)).await?.into_iter().next())
    }

    pub async fn find_by_short_name(
        &self,
        short_name: &str,
    ) -> Result<Option<TenantRecord>, TenantError> {
        Ok(self
            .store
            .find(&RegistryQuery::by_short_name(short_name))
            .await?
            .into_iter()
            .next())
    }

    /// Published record bound to `host` in the current tier
    pub async fn find_by_route(&self, host: &str) -> Result<Option<TenantRecord>, TenantError> {
        let query = RegistryQuery::by_route(route_key(self.tier, host)).published_only();
        Ok(self.store.find(&query).await?.into_iter().next())
    }

    /// Delete a record. Callers evict the cached instance first.
    pub async fn remove(&self, id: &str) -> Result<(), TenantError> {
        let _guard = self.records.lock(&Self::record_key(id)).await;
        if !self.store.remove(id).await? {
            return Err(TenantError::NotFound(id.to_string()));
        }
        info!(tenant = %id, "tenant removed");
        Ok(())
    }
}
