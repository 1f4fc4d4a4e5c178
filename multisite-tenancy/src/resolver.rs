//! Hostname Resolution
//!
//! Maps the `Host` header of an inbound request to the tenant that serves
//! it. Matching is exact; there are no wildcards.

use crate::TenantError;
use crate::registry::TenantRegistry;
use crate::tenant::TenantRecord;
use async_trait::async_trait;
use multisite_config::MultisiteOptions;
use multisite_core::HttpRequest;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Where a request goes
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedTenant {
    Dashboard,
    Site(TenantRecord),
}

/// Strip a trailing `:port`, including the bracketed IPv6 form.
pub fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split_once(']').map(|(addr, _)| addr).unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        // a bare IPv6 address has more than one colon and no port
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

/// Trim, strip the port, lowercase and drop a trailing dot.
pub fn normalize_host(host: &str) -> String {
    strip_port(host.trim())
        .trim_end_matches('.')
        .to_lowercase()
}

/// Tenant resolver trait
#[async_trait]
pub trait TenantResolver: Send + Sync {
    async fn resolve(&self, request: &HttpRequest) -> Result<ResolvedTenant, TenantError>;
}

/// Resolves tenants by hostname within the configured tier
///
/// Order: dashboard hostname, administrative overrides, explicit routes,
/// then `{short_name}.{base_url_domain}`.
pub struct HostnameResolver {
    registry: Arc<TenantRegistry>,
    dashboard_hostname: String,
    base_url_domain: Option<String>,
    overrides: HashMap<String, String>,
}

impl HostnameResolver {
    pub fn new(registry: Arc<TenantRegistry>, options: &MultisiteOptions) -> Self {
        let overrides: HashMap<String, String> = options
            .hostname_overrides
            .get(&options.tier)
            .map(|table| {
                table
                    .iter()
                    .map(|(host, short_name)| (normalize_host(host), short_name.to_lowercase()))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            registry,
            dashboard_hostname: normalize_host(&options.dashboard_hostname),
            base_url_domain: options.base_url_domain().map(normalize_host),
            overrides,
        }
    }

    /// Single label in front of the base URL domain, if any
    fn derived_short_name<'a>(&self, host: &'a str) -> Option<&'a str> {
        let domain = self.base_url_domain.as_deref()?;
        let label = host.strip_suffix(domain)?.strip_suffix('.')?;
        (!label.is_empty() && !label.contains('.')).then_some(label)
    }

    pub async fn resolve_host(&self, host: &str) -> Result<ResolvedTenant, TenantError> {
        let host = normalize_host(host);
        if host.is_empty() {
            return Err(TenantError::UnresolvedTenant(host));
        }

        if host == self.dashboard_hostname {
            return Ok(ResolvedTenant::Dashboard);
        }

        if let Some(short_name) = self.overrides.get(&host) {
            debug!(%host, %short_name, "hostname override");
            return match self.registry.find_by_short_name(short_name).await? {
                Some(record) => Ok(ResolvedTenant::Site(record)),
                None => Err(TenantError::UnresolvedTenant(host)),
            };
        }

        if let Some(record) = self.registry.find_by_route(&host).await? {
            return Ok(ResolvedTenant::Site(record));
        }

        if let Some(short_name) = self.derived_short_name(&host)
            && let Some(record) = self.registry.find_by_short_name(short_name).await?
            && record.published
        {
            return Ok(ResolvedTenant::Site(record));
        }

        Err(TenantError::UnresolvedTenant(host))
    }
}

#[async_trait]
impl TenantResolver for HostnameResolver {
    async fn resolve(&self, request: &HttpRequest) -> Result<ResolvedTenant, TenantError> {
        let host = request
            .host()
            .ok_or_else(|| TenantError::UnresolvedTenant(String::new()))?;
        self.resolve_host(host).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryStorageProvider, StorageProvider};
    use crate::store::PieceRegistryStore;
    use crate::tenant::CreateTenantRequest;
    use multisite_config::Tier;

    async fn setup(options: MultisiteOptions) -> (Arc<TenantRegistry>, HostnameResolver) {
        let repo = InMemoryStorageProvider::new().open("dashboard").await.unwrap();
        let registry = Arc::new(TenantRegistry::new(
            Arc::new(PieceRegistryStore::new(repo)),
            &options,
        ));
        let resolver = HostnameResolver::new(registry.clone(), &options);
        (registry, resolver)
    }

    fn options() -> MultisiteOptions {
        MultisiteOptions::default().with_dashboard_hostname("dashboard.test")
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("site.test:3000"), "site.test");
        assert_eq!(strip_port("site.test"), "site.test");
        assert_eq!(strip_port("[::1]:3000"), "::1");
        assert_eq!(strip_port("::1"), "::1");
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host(" Site.Test.:3000 "), "site.test");
    }

    #[tokio::test]
    async fn test_dashboard_with_empty_registry() {
        let (_, resolver) = setup(options()).await;
        assert_eq!(
            resolver.resolve_host("dashboard.test:3000").await.unwrap(),
            ResolvedTenant::Dashboard
        );
    }

    #[tokio::test]
    async fn test_resolve_by_hostname() {
        let (registry, resolver) = setup(options()).await;
        let site = registry
            .insert(CreateTenantRequest::new("A").with_short_name("aaa").with_hostname("site.test"))
            .await
            .unwrap();

        assert_eq!(
            resolver.resolve_host("SITE.test:3000").await.unwrap(),
            ResolvedTenant::Site(site)
        );
    }

    #[tokio::test]
    async fn test_unknown_host() {
        let (_, resolver) = setup(options()).await;
        let err = resolver.resolve_host("nobody.test").await.unwrap_err();
        assert!(matches!(err, TenantError::UnresolvedTenant(_)));
        assert!(matches!(
            resolver.resolve_host("").await,
            Err(TenantError::UnresolvedTenant(_))
        ));
    }

    #[tokio::test]
    async fn test_tier_specific_base_url() {
        let provider = InMemoryStorageProvider::new();
        let registry_for = |tier: Tier| {
            let provider = provider.clone();
            async move {
                let repo = provider.open("dashboard").await.unwrap();
                Arc::new(TenantRegistry::new(
                    Arc::new(PieceRegistryStore::new(repo)),
                    &options().with_tier(tier),
                ))
            }
        };

        let dev_registry = registry_for(Tier::Dev).await;
        dev_registry
            .insert(
                CreateTenantRequest::new("A")
                    .with_short_name("aaa")
                    .with_dev_base_url("http://aaa.localhost:3000"),
            )
            .await
            .unwrap();

        let dev = HostnameResolver::new(dev_registry, &options());
        assert!(dev.resolve_host("aaa.localhost").await.is_ok());

        let prod_options = options().with_tier(Tier::Prod);
        let prod = HostnameResolver::new(registry_for(Tier::Prod).await, &prod_options);
        assert!(prod.resolve_host("aaa.localhost").await.is_err());
    }

    #[tokio::test]
    async fn test_derived_host_from_base_url_domain() {
        let (registry, resolver) =
            setup(options().with_base_url_domain(Tier::Dev, "site.test:3000")).await;
        let site = registry
            .insert(CreateTenantRequest::new("A").with_short_name("aaa"))
            .await
            .unwrap();

        assert_eq!(
            resolver.resolve_host("aaa.site.test:3000").await.unwrap(),
            ResolvedTenant::Site(site)
        );
        assert!(resolver.resolve_host("x.aaa.site.test").await.is_err());
    }

    #[tokio::test]
    async fn test_unpublished_hidden_but_override_applies() {
        let (registry, _) = setup(options()).await;
        registry
            .insert(
                CreateTenantRequest::new("Hidden")
                    .with_short_name("hidden")
                    .with_hostname("hidden.test")
                    .with_published(false),
            )
            .await
            .unwrap();

        let plain = HostnameResolver::new(registry.clone(), &options());
        assert!(plain.resolve_host("hidden.test").await.is_err());

        let with_override = HostnameResolver::new(
            registry,
            &options().with_hostname_override(Tier::Dev, "localhost", "hidden"),
        );
        let resolved = with_override.resolve_host("localhost:3000").await.unwrap();
        assert!(matches!(resolved, ResolvedTenant::Site(r) if r.short_name == "hidden"));
    }

    #[tokio::test]
    async fn test_override_to_missing_tenant() {
        let (registry, _) = setup(options()).await;
        let resolver = HostnameResolver::new(
            registry,
            &options().with_hostname_override(Tier::Dev, "localhost", "ghost"),
        );
        assert!(matches!(
            resolver.resolve_host("localhost").await,
            Err(TenantError::UnresolvedTenant(_))
        ));
    }

    #[tokio::test]
    async fn test_resolver_trait_reads_host_header() {
        let (_, resolver) = setup(options()).await;
        let request = HttpRequest::new("GET", "/").with_header("Host", "dashboard.test");
        assert_eq!(resolver.resolve(&request).await.unwrap(), ResolvedTenant::Dashboard);

        let no_host = HttpRequest::new("GET", "/");
        assert!(resolver.resolve(&no_host).await.is_err());
    }
}
