//! Dashboard tenant
//!
//! The privileged tenant that administers every other one. Its storage
//! namespace holds the registry, it is built first and it is never
//! budgeted or evicted. Every registry write goes through here so the
//! cached instance of a changed tenant can be evicted.

use crate::TenantError;
use crate::cache::TenantInstanceCache;
use crate::instance::TenantInstance;
use crate::registry::TenantRegistry;
use crate::resolver::normalize_host;
use crate::store::RegistryQuery;
use crate::tenant::{CreateTenantRequest, TenantRecord, UpdateTenantRequest, route_key};
use multisite_core::{Error, HttpRequest, HttpResponse};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

/// Dashboard tenant
pub struct Dashboard {
    instance: Arc<TenantInstance>,
    registry: Arc<TenantRegistry>,
    cache: Arc<TenantInstanceCache>,
}

impl Dashboard {
    pub fn new(
        instance: Arc<TenantInstance>,
        registry: Arc<TenantRegistry>,
        cache: Arc<TenantInstanceCache>,
    ) -> Self {
        Self {
            instance,
            registry,
            cache,
        }
    }

    pub fn instance(&self) -> &Arc<TenantInstance> {
        &self.instance
    }

    pub async fn insert_site(&self, request: CreateTenantRequest) -> Result<TenantRecord, TenantError> {
        self.registry.insert(request).await
    }

    /// Apply a partial update, evicting the stale instance.
    ///
    /// The record is saved even when the old instance has to be
    /// force-destroyed.
    pub async fn update_site(
        &self,
        id: &str,
        request: UpdateTenantRequest,
    ) -> Result<TenantRecord, TenantError> {
        let registry = &self.registry;
        self.cache
            .evict_with(id, || async move { registry.apply(id, request).await })
            .await
    }

    /// Evict the tenant's instance, then delete its record.
    pub async fn remove_site(&self, id: &str) -> Result<(), TenantError> {
        let registry = &self.registry;
        self.cache
            .evict_with(id, || async move { registry.remove(id).await })
            .await?;
        info!(tenant = %id, "site removed");
        Ok(())
    }

    /// List sites, optionally filtered by short name or hostname
    pub async fn find_sites(
        &self,
        short_name: Option<&str>,
        hostname: Option<&str>,
    ) -> Result<Vec<TenantRecord>, TenantError> {
        let mut query = RegistryQuery::new();
        if let Some(short_name) = short_name {
            query.short_name = Some(short_name.trim().to_lowercase());
        }
        if let Some(hostname) = hostname {
            query.route = Some(route_key(self.registry.tier(), &normalize_host(hostname)));
        }
        self.registry.find(&query).await
    }

    fn home(&self) -> Result<HttpResponse, Error> {
        HttpResponse::ok().with_json(&json!({
            "title": self.instance.title(),
            "csrfCookieName": self.instance.csrf_cookie_name(),
        }))
    }

    /// Serve one admin request
    pub async fn handle(&self, request: &HttpRequest) -> Result<HttpResponse, Error> {
        let segments = request.segments();
        match (request.method.as_str(), segments.as_slice()) {
            ("GET", []) => self.home(),
            ("GET", ["api", "sites"]) => {
                let sites = self
                    .find_sites(
                        request.query("short_name").map(String::as_str),
                        request.query("hostname").map(String::as_str),
                    )
                    .await?;
                let views: Vec<Value> = sites.iter().map(TenantRecord::public_view).collect();
                HttpResponse::ok().with_json(&views)
            }
            ("GET", ["api", "sites", id]) => {
                let site = self
                    .registry
                    .get(id)
                    .await?
                    .ok_or_else(|| TenantError::NotFound(id.to_string()))?;
                HttpResponse::ok().with_json(&site.public_view())
            }
            ("POST", ["api", "sites"]) => {
                let create: CreateTenantRequest = request.json()?;
                let site = self.insert_site(create).await?;
                HttpResponse::created().with_json(&site.public_view())
            }
            ("PUT", ["api", "sites", id]) => {
                let update: UpdateTenantRequest = request.json()?;
                let site = self.update_site(id, update).await?;
                HttpResponse::ok().with_json(&site.public_view())
            }
            ("DELETE", ["api", "sites", id]) => {
                self.remove_site(id).await?;
                Ok(HttpResponse::no_content())
            }
            (_, []) | (_, ["api", "sites"]) | (_, ["api", "sites", _]) => {
                Err(Error::MethodNotAllowed(request.method.clone()))
            }
            _ => Err(Error::NotFound("Not Found".to_string())),
        }
    }
}
