//! Process context
//!
//! [`Multisite`] owns every shared component of one multisite process and
//! is the [`RequestHandler`] the HTTP server dispatches to.

use crate::TenantError;
use crate::cache::TenantInstanceCache;
use crate::dashboard::Dashboard;
use crate::instance::{InstanceBuilder, InstanceState, TenantInstance};
use crate::recycling::{RecyclePolicy, RecyclingSupervisor};
use crate::registry::TenantRegistry;
use crate::resolver::{HostnameResolver, ResolvedTenant, TenantResolver};
use crate::site;
use crate::storage::{StorageProvider, provider_for_url};
use crate::store::PieceRegistryStore;
use async_trait::async_trait;
use multisite_config::MultisiteOptions;
use multisite_core::{ConnectionGuard, Error, HttpRequest, HttpResponse, RequestHandler};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// One multisite process
pub struct Multisite {
    options: MultisiteOptions,
    registry: Arc<TenantRegistry>,
    resolver: HostnameResolver,
    supervisor: Arc<RecyclingSupervisor>,
    cache: Arc<TenantInstanceCache>,
    dashboard: Dashboard,
}

impl Multisite {
    /// Build the dashboard first, then everything that depends on it.
    pub async fn bootstrap(
        options: MultisiteOptions,
        provider: Arc<dyn StorageProvider>,
    ) -> Result<Self, TenantError> {
        let builder = InstanceBuilder::new(provider, options.short_name_prefix.clone());
        let dashboard_instance = Arc::new(builder.build_dashboard().await?);

        let store = Arc::new(PieceRegistryStore::new(dashboard_instance.storage().clone()));
        let registry = Arc::new(TenantRegistry::new(store, &options));
        let resolver = HostnameResolver::new(registry.clone(), &options);
        let supervisor = Arc::new(RecyclingSupervisor::new(RecyclePolicy::from_options(&options)));
        let cache = Arc::new(TenantInstanceCache::new(
            registry.clone(),
            builder,
            supervisor.clone(),
            options.drain_timeout(),
        ));
        let dashboard = Dashboard::new(dashboard_instance, registry.clone(), cache.clone());

        info!(
            tier = %options.tier,
            dashboard = %options.dashboard_hostname,
            policy = ?supervisor.policy(),
            "multisite ready"
        );

        Ok(Self {
            options,
            registry,
            resolver,
            supervisor,
            cache,
            dashboard,
        })
    }

    /// Bootstrap with the provider named by `options.storage_url`
    pub async fn from_options(options: MultisiteOptions) -> Result<Self, TenantError> {
        let provider = provider_for_url(&options.storage_url)?;
        Self::bootstrap(options, provider).await
    }

    pub fn options(&self) -> &MultisiteOptions {
        &self.options
    }

    pub fn registry(&self) -> &Arc<TenantRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &HostnameResolver {
        &self.resolver
    }

    pub fn cache(&self) -> &Arc<TenantInstanceCache> {
        &self.cache
    }

    pub fn supervisor(&self) -> &Arc<RecyclingSupervisor> {
        &self.supervisor
    }

    pub fn dashboard(&self) -> &Dashboard {
        &self.dashboard
    }

    /// Flips to `true` when the exit policy wants the process restarted
    pub fn recycle_signal(&self) -> watch::Receiver<bool> {
        self.supervisor.subscribe()
    }

    /// Resolve the tenant's instance and admit one request on it.
    ///
    /// An instance can start draining between the two steps; that case is
    /// retried once against a fresh resolve.
    async fn admit(
        &self,
        tenant_id: &str,
    ) -> Result<(Arc<TenantInstance>, ConnectionGuard), TenantError> {
        let instance = self.cache.resolve(tenant_id).await?;
        match instance.begin_request() {
            Ok(guard) => Ok((instance, guard)),
            Err(TenantError::Draining(_)) => {
                let instance = self.cache.resolve(tenant_id).await?;
                let guard = instance.begin_request()?;
                Ok((instance, guard))
            }
            Err(e) => Err(e),
        }
    }

    async fn serve_site(
        &self,
        tenant_id: &str,
        request: &HttpRequest,
    ) -> Result<HttpResponse, Error> {
        let (instance, _guard) = self.admit(tenant_id).await?;

        if self.supervisor.record_request(&instance)
            && matches!(self.supervisor.policy(), RecyclePolicy::Exit { .. })
        {
            self.supervisor.check_exit(&self.cache.instances());
        }

        let response = site::handle(&instance, request).await;

        // force-destroyed under us: whatever we computed is not trustworthy
        if instance.state() == InstanceState::Destroyed {
            return Err(TenantError::DrainTimeout(instance.short_name().to_string()).into());
        }
        response
    }

    /// Evict every site instance, then release the dashboard.
    pub async fn destroy(&self) -> Result<(), TenantError> {
        info!(instances = self.cache.len(), "destroying multisite");
        let sites = self.cache.evict_all().await;
        let dashboard = self
            .dashboard
            .instance()
            .shutdown(self.options.drain_timeout())
            .await;
        sites.and(dashboard)
    }
}

#[async_trait]
impl RequestHandler for Multisite {
    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, Error> {
        match self.resolver.resolve(&request).await {
            Ok(ResolvedTenant::Dashboard) => self.dashboard.handle(&request).await,
            Ok(ResolvedTenant::Site(record)) => {
                debug!(tenant = %record.id, short_name = %record.short_name, path = %request.path, "site request");
                self.serve_site(&record.id, &request).await
            }
            Err(e) => {
                match &e {
                    TenantError::UnresolvedTenant(host) => debug!(%host, "no tenant for host"),
                    other => warn!(error = %other, "tenant resolution failed"),
                }
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorageProvider;
    use crate::tenant::CreateTenantRequest;

    fn options() -> MultisiteOptions {
        MultisiteOptions::default()
            .with_dashboard_hostname("dashboard.test")
            .with_short_name_prefix("test-multi-")
    }

    fn get(host: &str, path: &str) -> HttpRequest {
        HttpRequest::new("GET", path).with_header("Host", host)
    }

    #[tokio::test]
    async fn test_dispatch_by_host() {
        let multisite = Multisite::bootstrap(options(), Arc::new(InMemoryStorageProvider::new()))
            .await
            .unwrap();
        multisite
            .dashboard()
            .insert_site(CreateTenantRequest::new("Site A").with_short_name("aaa").with_hostname("site.test"))
            .await
            .unwrap();

        let dashboard = multisite.handle(get("dashboard.test", "/")).await.unwrap();
        let body: serde_json::Value = dashboard.json().unwrap();
        assert_eq!(body["csrfCookieName"], "test-multi-dashboard.csrf");

        let site = multisite.handle(get("site.test:3000", "/")).await.unwrap();
        let body: serde_json::Value = site.json().unwrap();
        assert_eq!(body["title"], "Site A");

        let missing = multisite.handle(get("nobody.test", "/")).await.unwrap_err();
        assert_eq!(missing.status_code(), 404);
        assert_eq!(missing.public_message(), "Not Found");
    }

    #[tokio::test]
    async fn test_from_options_rejects_unknown_storage() {
        let result = Multisite::from_options(options().with_storage_url("mongodb://localhost")).await;
        assert!(matches!(result, Err(TenantError::Storage(_))));
    }

    #[tokio::test]
    async fn test_destroy_releases_everything() {
        let provider = InMemoryStorageProvider::new();
        let multisite = Multisite::bootstrap(options(), Arc::new(provider.clone()))
            .await
            .unwrap();
        multisite
            .dashboard()
            .insert_site(CreateTenantRequest::new("Site A").with_short_name("aaa").with_hostname("site.test"))
            .await
            .unwrap();
        multisite.handle(get("site.test", "/")).await.unwrap();

        multisite.destroy().await.unwrap();
        assert_eq!(provider.open_handles("test-multi-aaa"), 0);
        assert_eq!(provider.open_handles("test-multi-dashboard"), 0);
    }
}
