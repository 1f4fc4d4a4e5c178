//! Tenant instance cache
//!
//! Holds at most one live instance per tenant. Concurrent first requests
//! for a tenant share one construction; requests for other tenants are
//! never held up by it. The map lock only guards O(1) map operations and is
//! never held across an await.

use crate::TenantError;
use crate::instance::{InstanceBuilder, TenantInstance};
use crate::locks::KeyedLocks;
use crate::recycling::RecyclingSupervisor;
use crate::registry::TenantRegistry;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Tenant instance cache
pub struct TenantInstanceCache {
    registry: Arc<TenantRegistry>,
    builder: InstanceBuilder,
    supervisor: Arc<RecyclingSupervisor>,
    entries: RwLock<HashMap<String, Arc<TenantInstance>>>,
    building: KeyedLocks,
    drain_timeout: Duration,
    constructions: AtomicU64,
}

impl TenantInstanceCache {
    pub fn new(
        registry: Arc<TenantRegistry>,
        builder: InstanceBuilder,
        supervisor: Arc<RecyclingSupervisor>,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            builder,
            supervisor,
            entries: RwLock::new(HashMap::new()),
            building: KeyedLocks::new(),
            drain_timeout,
            constructions: AtomicU64::new(0),
        }
    }

    fn usable(&self, instance: &TenantInstance) -> bool {
        instance.is_ready() && !self.supervisor.should_rebuild(instance)
    }

    /// Live instance for `tenant_id`, building one if needed.
    pub async fn resolve(&self, tenant_id: &str) -> Result<Arc<TenantInstance>, TenantError> {
        if let Some(instance) = self.get(tenant_id)
            && self.usable(&instance)
        {
            return Ok(instance);
        }

        let _guard = self.building.lock(tenant_id).await;

        // someone else may have built it while we waited
        if let Some(instance) = self.get(tenant_id) {
            if self.usable(&instance) {
                return Ok(instance);
            }
            self.entries.write().remove(tenant_id);
            self.retire(instance);
        }

        let record = self
            .registry
            .get(tenant_id)
            .await?
            .ok_or_else(|| TenantError::UnresolvedTenant(tenant_id.to_string()))?;

        let budget = self.supervisor.budget_for_new_instance();
        let instance = match self.builder.build_site(&record, budget).await {
            Ok(instance) => Arc::new(instance),
            Err(e) => {
                error!(tenant = %tenant_id, short_name = %record.short_name, error = %e, "tenant construction failed");
                return Err(e);
            }
        };
        instance.mark_ready();
        self.constructions.fetch_add(1, Ordering::AcqRel);
        self.entries
            .write()
            .insert(tenant_id.to_string(), instance.clone());

        info!(
            tenant = %tenant_id,
            short_name = %instance.short_name(),
            budget = ?instance.budget(),
            "tenant instance ready"
        );
        Ok(instance)
    }

    /// Drain a replaced instance in the background
    fn retire(&self, instance: Arc<TenantInstance>) {
        debug!(tenant = %instance.tenant_id(), requests = instance.request_count(), "retiring tenant instance");
        let timeout = self.drain_timeout;
        tokio::spawn(async move {
            if let Err(e) = instance.shutdown(timeout).await {
                warn!(tenant = %instance.tenant_id(), error = %e, "retired instance did not shut down cleanly");
            }
        });
    }

    /// Drop the cached instance for `tenant_id` and wait for it to drain.
    ///
    /// A missing entry is not an error.
    pub async fn evict(&self, tenant_id: &str) -> Result<(), TenantError> {
        let instance = {
            let _guard = self.building.lock(tenant_id).await;
            self.entries.write().remove(tenant_id)
        };
        self.drain_evicted(tenant_id, instance).await
    }

    /// Evict `tenant_id` and run `change` before anyone can build it again.
    ///
    /// The building lock is held from the eviction until `change` settles, so
    /// no request rebuilds the tenant from a record that is being rewritten or
    /// deleted. If `change` fails the instance goes back into the cache
    /// untouched. A drain timeout after a successful change is logged, not
    /// returned.
    pub async fn evict_with<F, Fut, T>(&self, tenant_id: &str, change: F) -> Result<T, TenantError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, TenantError>>,
    {
        let (output, instance) = {
            let _guard = self.building.lock(tenant_id).await;
            let instance = self.entries.write().remove(tenant_id);
            match change().await {
                Ok(output) => (output, instance),
                Err(e) => {
                    if let Some(instance) = instance {
                        self.entries.write().insert(tenant_id.to_string(), instance);
                    }
                    return Err(e);
                }
            }
        };

        if let Err(e) = self.drain_evicted(tenant_id, instance).await {
            warn!(tenant = %tenant_id, error = %e, "evicted instance was force-destroyed");
        }
        Ok(output)
    }

    async fn drain_evicted(
        &self,
        tenant_id: &str,
        instance: Option<Arc<TenantInstance>>,
    ) -> Result<(), TenantError> {
        let Some(instance) = instance else {
            return Ok(());
        };
        info!(tenant = %tenant_id, short_name = %instance.short_name(), "evicting tenant instance");
        // the evicted instance may have been the last one with budget left
        self.supervisor.check_exit(&self.instances());
        instance.shutdown(self.drain_timeout).await
    }

    /// Evict every instance concurrently. Returns the first failure.
    pub async fn evict_all(&self) -> Result<(), TenantError> {
        let instances: Vec<Arc<TenantInstance>> =
            self.entries.write().drain().map(|(_, instance)| instance).collect();

        let mut shutdowns = JoinSet::new();
        for instance in instances {
            let timeout = self.drain_timeout;
            shutdowns.spawn(async move { instance.shutdown(timeout).await });
        }

        let mut first_error = None;
        while let Some(joined) = shutdowns.join_next().await {
            let result = joined.map_err(|e| TenantError::Storage(e.to_string())).and_then(|r| r);
            if let Err(e) = result {
                warn!(error = %e, "tenant instance did not shut down cleanly");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Peek at the cached instance without building
    pub fn get(&self, tenant_id: &str) -> Option<Arc<TenantInstance>> {
        self.entries.read().get(tenant_id).cloned()
    }

    pub fn instances(&self) -> Vec<Arc<TenantInstance>> {
        self.entries.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Successful constructions since startup
    pub fn constructions(&self) -> u64 {
        self.constructions.load(Ordering::Acquire)
    }

    /// Whether every resident instance has spent its budget
    pub fn all_over_budget(&self) -> bool {
        let entries = self.entries.read();
        !entries.is_empty() && entries.values().all(|instance| instance.is_over_budget())
    }

    pub fn supervisor(&self) -> &Arc<RecyclingSupervisor> {
        &self.supervisor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::InstanceState;
    use crate::recycling::RecyclePolicy;
    use crate::storage::{InMemoryStorageProvider, StorageProvider};
    use crate::store::PieceRegistryStore;
    use crate::tenant::CreateTenantRequest;
    use multisite_config::MultisiteOptions;

    struct Fixture {
        provider: InMemoryStorageProvider,
        registry: Arc<TenantRegistry>,
        cache: TenantInstanceCache,
    }

    async fn fixture(policy: RecyclePolicy) -> Fixture {
        let provider = InMemoryStorageProvider::new();
        let repo = provider.open("t-dashboard").await.unwrap();
        let registry = Arc::new(TenantRegistry::new(
            Arc::new(PieceRegistryStore::new(repo)),
            &MultisiteOptions::default(),
        ));
        let cache = TenantInstanceCache::new(
            registry.clone(),
            InstanceBuilder::new(Arc::new(provider.clone()), "t-"),
            Arc::new(RecyclingSupervisor::new(policy)),
            Duration::from_millis(100),
        );
        Fixture {
            provider,
            registry,
            cache,
        }
    }

    async fn add_site(registry: &TenantRegistry, short_name: &str) -> String {
        registry
            .insert(CreateTenantRequest::new(short_name).with_short_name(short_name))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let f = fixture(RecyclePolicy::Disabled).await;
        let id = add_site(&f.registry, "aaa").await;

        let first = f.cache.resolve(&id).await.unwrap();
        let second = f.cache.resolve(&id).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(f.cache.constructions(), 1);
        assert_eq!(f.cache.len(), 1);
        assert_eq!(first.state(), InstanceState::Ready);
    }

    #[tokio::test]
    async fn test_unknown_tenant() {
        let f = fixture(RecyclePolicy::Disabled).await;
        let result = f.cache.resolve("missing").await;
        assert!(matches!(result, Err(TenantError::UnresolvedTenant(_))));
        assert!(f.cache.is_empty());
    }

    #[tokio::test]
    async fn test_failed_construction_not_cached() {
        let f = fixture(RecyclePolicy::Disabled).await;
        let id = add_site(&f.registry, "aaa").await;
        let other = add_site(&f.registry, "bbb").await;
        f.provider.fail_namespace("t-aaa");

        let result = f.cache.resolve(&id).await;
        assert!(matches!(result, Err(TenantError::ConstructionFailure { .. })));
        assert!(f.cache.get(&id).is_none());
        assert!(f.cache.resolve(&other).await.is_ok());

        f.provider.heal("t-aaa");
        assert!(f.cache.resolve(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_rebuild_when_spent() {
        let f = fixture(RecyclePolicy::Rebuild { max: 1, jitter: 0 }).await;
        let id = add_site(&f.registry, "aaa").await;

        let old = f.cache.resolve(&id).await.unwrap();
        assert!(f.cache.supervisor().record_request(&old));

        let new = f.cache.resolve(&id).await.unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(f.cache.constructions(), 2);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(old.state(), InstanceState::Destroyed);
        assert_eq!(f.provider.open_handles("t-aaa"), 1);
    }

    #[tokio::test]
    async fn test_evict_releases_storage() {
        let f = fixture(RecyclePolicy::Disabled).await;
        let id = add_site(&f.registry, "aaa").await;
        let instance = f.cache.resolve(&id).await.unwrap();

        f.cache.evict(&id).await.unwrap();
        assert!(f.cache.get(&id).is_none());
        assert_eq!(instance.state(), InstanceState::Destroyed);
        assert_eq!(f.provider.open_handles("t-aaa"), 0);

        // evicting again is a no-op
        f.cache.evict(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_evict_all() {
        let f = fixture(RecyclePolicy::Disabled).await;
        for name in ["aaa", "bbb", "ccc"] {
            let id = add_site(&f.registry, name).await;
            f.cache.resolve(&id).await.unwrap();
        }
        assert_eq!(f.cache.len(), 3);

        f.cache.evict_all().await.unwrap();
        assert!(f.cache.is_empty());
        assert_eq!(f.provider.open_handles("t-bbb"), 0);
    }

    #[tokio::test]
    async fn test_all_over_budget() {
        let f = fixture(RecyclePolicy::Exit { max: 1, jitter: 0 }).await;
        assert!(!f.cache.all_over_budget());

        let id = add_site(&f.registry, "aaa").await;
        let instance = f.cache.resolve(&id).await.unwrap();
        assert!(!f.cache.all_over_budget());

        f.cache.supervisor().record_request(&instance);
        assert!(f.cache.all_over_budget());

        // exit policy keeps serving the spent instance
        let again = f.cache.resolve(&id).await.unwrap();
        assert!(Arc::ptr_eq(&instance, &again));
    }
}
