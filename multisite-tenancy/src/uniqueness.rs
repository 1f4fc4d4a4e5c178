//! Short name and hostname uniqueness
//!
//! Every registry write runs its conflict check and its commit while holding
//! the keyed locks for everything the record claims, so two writers racing
//! for the same short name or route are serialized and the second one sees
//! the first one's commit.

use crate::TenantError;
use crate::locks::{KeyedGuard, KeyedLocks};
use crate::store::{RegistryQuery, RegistryStore};
use crate::tenant::{TenantRecord, route_key};
use multisite_config::{MultisiteOptions, Tier};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Guards the uniqueness invariants of the registry
pub struct UniquenessValidator {
    store: Arc<dyn RegistryStore>,
    locks: KeyedLocks,
    tier: Tier,
    base_url_domain: Option<String>,
}

impl UniquenessValidator {
    pub fn new(store: Arc<dyn RegistryStore>, options: &MultisiteOptions) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
            tier: options.tier,
            base_url_domain: options.base_url_domain().map(str::to_string),
        }
    }

    /// `{short_name}.{domain}` route in the current tier, if a domain is set
    fn derived_route(&self, short_name: &str) -> Option<String> {
        self.base_url_domain
            .as_ref()
            .map(|domain| route_key(self.tier, &format!("{}.{}", short_name, domain)))
    }

    /// Short name a current-tier route would derive from, if any
    fn derived_label<'a>(&self, route: &'a str) -> Option<&'a str> {
        let domain = self.base_url_domain.as_deref()?;
        let host = route.strip_prefix(self.tier.as_str())?.strip_prefix(':')?;
        let label = host.strip_suffix(domain)?.strip_suffix('.')?;
        (!label.is_empty() && !label.contains('.')).then_some(label)
    }

    /// Every lock key `record` needs
    pub fn lock_keys(&self, record: &TenantRecord) -> Vec<String> {
        let mut keys = vec![format!("short:{}", record.short_name)];
        keys.extend(record.routes.iter().map(|route| format!("host:{}", route)));
        if let Some(route) = self.derived_route(&record.short_name) {
            keys.push(format!("host:{}", route));
        }
        keys.extend(
            record
                .routes
                .iter()
                .filter_map(|route| self.derived_label(route))
                .map(|label| format!("short:{}", label)),
        );
        keys
    }

    async fn lock(&self, record: &TenantRecord) -> Vec<KeyedGuard> {
        self.locks.lock_all(self.lock_keys(record)).await
    }

    async fn claimed_by_other(&self, query: RegistryQuery, id: &str) -> Result<bool, TenantError> {
        Ok(self
            .store
            .find(&query)
            .await?
            .iter()
            .any(|other| other.id != id))
    }

    /// Check `record` against every OTHER record in the live store.
    pub async fn check(&self, record: &TenantRecord) -> Result<(), TenantError> {
        if self
            .claimed_by_other(RegistryQuery::by_short_name(&record.short_name), &record.id)
            .await?
        {
            return Err(TenantError::DuplicateShortName(record.short_name.clone()));
        }

        for route in &record.routes {
            if self
                .claimed_by_other(RegistryQuery::by_route(route), &record.id)
                .await?
            {
                return Err(TenantError::DuplicateHostname(route.clone()));
            }
        }

        // another record may own our derived host explicitly
        if let Some(route) = self.derived_route(&record.short_name)
            && self
                .claimed_by_other(RegistryQuery::by_route(&route), &record.id)
                .await?
        {
            return Err(TenantError::DuplicateShortName(record.short_name.clone()));
        }

        // or one of our explicit hosts may be another record's derived host
        for route in &record.routes {
            if let Some(label) = self.derived_label(route)
                && self
                    .claimed_by_other(RegistryQuery::by_short_name(label), &record.id)
                    .await?
            {
                return Err(TenantError::DuplicateHostname(route.clone()));
            }
        }

        Ok(())
    }

    /// Lock, check, then run `write`. Nothing is written when the check fails.
    pub async fn commit<F, Fut>(
        &self,
        record: TenantRecord,
        write: F,
    ) -> Result<TenantRecord, TenantError>
    where
        F: FnOnce(TenantRecord) -> Fut + Send,
        Fut: Future<Output = Result<TenantRecord, TenantError>> + Send,
    {
        let _guards = self.lock(&record).await;

        if let Err(err) = self.check(&record).await {
            debug!(
                tenant = %record.id,
                short_name = %record.short_name,
                error = ?err,
                "uniqueness check failed"
            );
            return Err(err);
        }

        write(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryStorageProvider, StorageProvider};
    use crate::store::PieceRegistryStore;
    use crate::tenant::CreateTenantRequest;

    async fn setup(options: &MultisiteOptions) -> (Arc<dyn RegistryStore>, UniquenessValidator) {
        let repo = InMemoryStorageProvider::new().open("dashboard").await.unwrap();
        let store: Arc<dyn RegistryStore> = Arc::new(PieceRegistryStore::new(repo));
        let validator = UniquenessValidator::new(store.clone(), options);
        (store, validator)
    }

    fn record(short_name: &str, host: &str) -> TenantRecord {
        CreateTenantRequest::new(short_name)
            .with_short_name(short_name)
            .with_hostname(host)
            .into_record()
    }

    #[tokio::test]
    async fn test_duplicate_short_name() {
        let (store, validator) = setup(&MultisiteOptions::default()).await;
        store.insert(&record("aaa", "a.test")).await.unwrap();

        let err = validator.check(&record("aaa", "b.test")).await.unwrap_err();
        assert!(matches!(err, TenantError::DuplicateShortName(_)));
    }

    #[tokio::test]
    async fn test_duplicate_hostname() {
        let (store, validator) = setup(&MultisiteOptions::default()).await;
        store.insert(&record("aaa", "site.test")).await.unwrap();

        let err = validator.check(&record("bbb", "site.test")).await.unwrap_err();
        assert!(matches!(err, TenantError::DuplicateHostname(_)));
    }

    #[tokio::test]
    async fn test_record_does_not_conflict_with_itself() {
        let (store, validator) = setup(&MultisiteOptions::default()).await;
        let existing = record("aaa", "site.test");
        store.insert(&existing).await.unwrap();

        assert!(validator.check(&existing).await.is_ok());
    }

    #[tokio::test]
    async fn test_derived_host_conflicts() {
        let options = MultisiteOptions::default().with_base_url_domain(Tier::Dev, "site.test");
        let (store, validator) = setup(&options).await;
        store.insert(&record("aaa", "bbb.site.test")).await.unwrap();

        // bbb.site.test is already someone's explicit host
        let err = validator.check(&record("bbb", "other.test")).await.unwrap_err();
        assert!(matches!(err, TenantError::DuplicateShortName(_)));

        // and ccc.site.test would shadow tenant ccc
        store.insert(&record("ccc", "c.test")).await.unwrap();
        let err = validator.check(&record("ddd", "ccc.site.test")).await.unwrap_err();
        assert!(matches!(err, TenantError::DuplicateHostname(_)));
    }

    #[tokio::test]
    async fn test_lock_keys() {
        let options = MultisiteOptions::default().with_base_url_domain(Tier::Dev, "site.test");
        let (_, validator) = setup(&options).await;
        let keys = validator.lock_keys(&record("aaa", "bbb.site.test"));

        assert!(keys.contains(&"short:aaa".to_string()));
        assert!(keys.contains(&"host:prod:bbb.site.test".to_string()));
        assert!(keys.contains(&"host:dev:aaa.site.test".to_string()));
        assert!(keys.contains(&"short:bbb".to_string()));
    }

    #[tokio::test]
    async fn test_commit_skips_write_on_conflict() {
        let (store, validator) = setup(&MultisiteOptions::default()).await;
        store.insert(&record("aaa", "a.test")).await.unwrap();

        let store_for_write = store.clone();
        let result = validator
            .commit(record("aaa", "b.test"), |r| async move {
                store_for_write.insert(&r).await
            })
            .await;

        assert!(result.unwrap_err().is_duplicate());
        assert!(
            store
                .find(&RegistryQuery::by_route("prod:b.test"))
                .await
                .unwrap()
                .is_empty()
        );
    }
}
