//! Tenant instances
//!
//! A [`TenantInstance`] is the live runtime context serving one tenant: its
//! storage handle, namespaces, request accounting and lifecycle state.
//! Instances are built by [`InstanceBuilder`] and owned by the
//! [`TenantInstanceCache`](crate::cache::TenantInstanceCache).

use crate::TenantError;
use crate::site;
use crate::storage::{ContentRepository, StorageProvider};
use crate::tenant::TenantRecord;
use multisite_core::{ConnectionGuard, ConnectionTracker};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Short name and namespace suffix of the dashboard tenant
pub const DASHBOARD_NAME: &str = "dashboard";

/// Lifecycle of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Constructing,
    Ready,
    Draining,
    Destroyed,
}

/// Live runtime context for one tenant
pub struct TenantInstance {
    tenant_id: String,
    short_name: String,
    title: String,
    storage_namespace: String,
    session_namespace: String,
    storage: Arc<dyn ContentRepository>,
    /// Record snapshot taken at construction; `None` for the dashboard
    site: Option<TenantRecord>,
    state: RwLock<InstanceState>,
    requests: AtomicU64,
    budget: Option<u64>,
    over_budget: AtomicBool,
    tracker: ConnectionTracker,
}

impl fmt::Debug for TenantInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantInstance")
            .field("tenant_id", &self.tenant_id)
            .field("short_name", &self.short_name)
            .field("storage_namespace", &self.storage_namespace)
            .field("state", &self.state())
            .field("requests", &self.request_count())
            .field("budget", &self.budget)
            .finish()
    }
}

impl TenantInstance {
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn storage_namespace(&self) -> &str {
        &self.storage_namespace
    }

    pub fn session_namespace(&self) -> &str {
        &self.session_namespace
    }

    pub fn csrf_cookie_name(&self) -> String {
        format!("{}.csrf", self.session_namespace)
    }

    pub fn storage(&self) -> &Arc<dyn ContentRepository> {
        &self.storage
    }

    pub fn site(&self) -> Option<&TenantRecord> {
        self.site.as_ref()
    }

    pub fn is_dashboard(&self) -> bool {
        self.site.is_none()
    }

    pub fn state(&self) -> InstanceState {
        *self.state.read()
    }

    fn set_state(&self, state: InstanceState) {
        *self.state.write() = state;
    }

    pub(crate) fn mark_ready(&self) {
        let mut state = self.state.write();
        if *state == InstanceState::Constructing {
            *state = InstanceState::Ready;
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == InstanceState::Ready
    }

    /// Admit one request. The guard keeps the instance from draining.
    pub fn begin_request(&self) -> Result<ConnectionGuard, TenantError> {
        if !self.is_ready() {
            return Err(TenantError::Draining(self.short_name.clone()));
        }
        self.tracker
            .increment()
            .ok_or_else(|| TenantError::Draining(self.short_name.clone()))
    }

    /// Requests in flight right now
    pub fn in_flight(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Requests admitted since construction
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Acquire)
    }

    pub fn budget(&self) -> Option<u64> {
        self.budget
    }

    /// Count one request. Returns true only for the request that reaches
    /// the budget.
    pub fn record_request(&self) -> bool {
        let count = self.requests.fetch_add(1, Ordering::AcqRel) + 1;
        match self.budget {
            Some(budget) if count >= budget => !self.over_budget.swap(true, Ordering::AcqRel),
            _ => false,
        }
    }

    pub fn is_over_budget(&self) -> bool {
        self.over_budget.load(Ordering::Acquire)
    }

    /// Drain in-flight requests, then release storage.
    ///
    /// Past `timeout` the instance is destroyed anyway and
    /// [`TenantError::DrainTimeout`] is returned.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), TenantError> {
        {
            let mut state = self.state.write();
            match *state {
                InstanceState::Destroyed | InstanceState::Draining => return Ok(()),
                _ => *state = InstanceState::Draining,
            }
        }
        self.tracker.stop_accepting();

        debug!(
            tenant = %self.tenant_id,
            short_name = %self.short_name,
            in_flight = self.in_flight(),
            "draining tenant instance"
        );
        let drained = self.tracker.drain(timeout).await;
        if !drained {
            warn!(
                tenant = %self.tenant_id,
                short_name = %self.short_name,
                in_flight = self.in_flight(),
                "drain timed out, destroying tenant instance"
            );
        }

        let closed = self.storage.close().await;
        self.set_state(InstanceState::Destroyed);
        info!(
            tenant = %self.tenant_id,
            short_name = %self.short_name,
            requests = self.request_count(),
            "tenant instance destroyed"
        );

        closed?;
        if drained {
            Ok(())
        } else {
            Err(TenantError::DrainTimeout(self.short_name.clone()))
        }
    }
}

/// Builds tenant instances from immutable inputs
///
/// Names are derived first; the storage open is the only side effect and
/// comes last, so a failure before it leaves nothing behind.
#[derive(Clone)]
pub struct InstanceBuilder {
    provider: Arc<dyn StorageProvider>,
    prefix: String,
}

impl InstanceBuilder {
    pub fn new(provider: Arc<dyn StorageProvider>, prefix: impl Into<String>) -> Self {
        Self {
            provider,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build a site instance in the `Constructing` state.
    pub async fn build_site(
        &self,
        record: &TenantRecord,
        budget: Option<u64>,
    ) -> Result<TenantInstance, TenantError> {
        let storage_namespace = record.storage_namespace(&self.prefix);
        let session_namespace = record.session_namespace(&self.prefix);
        let failure = |reason: String| TenantError::ConstructionFailure {
            tenant: record.short_name.clone(),
            reason,
        };

        let storage = self
            .provider
            .open(&storage_namespace)
            .await
            .map_err(|e| failure(e.to_string()))?;

        if let Err(e) = site::bootstrap(storage.as_ref(), record).await {
            let _ = storage.close().await;
            return Err(failure(e.to_string()));
        }

        debug!(tenant = %record.id, namespace = %storage_namespace, ?budget, "built tenant instance");

        Ok(TenantInstance {
            tenant_id: record.id.clone(),
            short_name: record.short_name.clone(),
            title: record.title.clone(),
            storage_namespace,
            session_namespace,
            storage,
            site: Some(record.clone()),
            state: RwLock::new(InstanceState::Constructing),
            requests: AtomicU64::new(0),
            budget,
            over_budget: AtomicBool::new(false),
            tracker: ConnectionTracker::new(),
        })
    }

    /// Build the dashboard instance, already `Ready` and never budgeted.
    pub async fn build_dashboard(&self) -> Result<TenantInstance, TenantError> {
        let namespace = format!("{}{}", self.prefix, DASHBOARD_NAME);
        let storage = self
            .provider
            .open(&namespace)
            .await
            .map_err(|e| TenantError::ConstructionFailure {
                tenant: DASHBOARD_NAME.to_string(),
                reason: e.to_string(),
            })?;

        Ok(TenantInstance {
            tenant_id: DASHBOARD_NAME.to_string(),
            short_name: DASHBOARD_NAME.to_string(),
            title: "Dashboard".to_string(),
            session_namespace: namespace.clone(),
            storage_namespace: namespace,
            storage,
            site: None,
            state: RwLock::new(InstanceState::Ready),
            requests: AtomicU64::new(0),
            budget: None,
            over_budget: AtomicBool::new(false),
            tracker: ConnectionTracker::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorageProvider;
    use crate::tenant::CreateTenantRequest;

    fn record() -> TenantRecord {
        CreateTenantRequest::new("Site A")
            .with_short_name("aaa")
            .into_record()
    }

    fn builder(provider: &InMemoryStorageProvider) -> InstanceBuilder {
        InstanceBuilder::new(Arc::new(provider.clone()), "test-multi-")
    }

    #[tokio::test]
    async fn test_namespaces() {
        let provider = InMemoryStorageProvider::new();
        let record = record();
        let instance = builder(&provider).build_site(&record, None).await.unwrap();

        assert_eq!(instance.storage_namespace(), "test-multi-aaa");
        assert_eq!(instance.session_namespace(), format!("test-multi-{}", record.id));
        assert_eq!(
            instance.csrf_cookie_name(),
            format!("test-multi-{}.csrf", record.id)
        );
        assert_eq!(instance.state(), InstanceState::Constructing);
        assert_eq!(provider.open_handles("test-multi-aaa"), 1);
    }

    #[tokio::test]
    async fn test_dashboard_namespaces() {
        let provider = InMemoryStorageProvider::new();
        let dashboard = builder(&provider).build_dashboard().await.unwrap();

        assert!(dashboard.is_dashboard());
        assert!(dashboard.is_ready());
        assert_eq!(dashboard.storage_namespace(), "test-multi-dashboard");
        assert_eq!(dashboard.csrf_cookie_name(), "test-multi-dashboard.csrf");
        assert_eq!(dashboard.budget(), None);
    }

    #[tokio::test]
    async fn test_construction_failure() {
        let provider = InMemoryStorageProvider::new();
        provider.fail_namespace("test-multi-aaa");

        let err = builder(&provider).build_site(&record(), None).await.unwrap_err();
        assert!(matches!(err, TenantError::ConstructionFailure { .. }));
        assert_eq!(provider.open_handles("test-multi-aaa"), 0);
    }

    #[tokio::test]
    async fn test_begin_request_requires_ready() {
        let provider = InMemoryStorageProvider::new();
        let instance = builder(&provider).build_site(&record(), None).await.unwrap();

        assert!(matches!(instance.begin_request(), Err(TenantError::Draining(_))));
        instance.mark_ready();
        let guard = instance.begin_request().unwrap();
        assert_eq!(instance.in_flight(), 1);
        drop(guard);
        assert_eq!(instance.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_budget_crossing_reported_once() {
        let provider = InMemoryStorageProvider::new();
        let instance = builder(&provider).build_site(&record(), Some(2)).await.unwrap();

        assert!(!instance.record_request());
        assert!(!instance.is_over_budget());
        assert!(instance.record_request());
        assert!(instance.is_over_budget());
        assert!(!instance.record_request());
        assert_eq!(instance.request_count(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_releases_storage() {
        let provider = InMemoryStorageProvider::new();
        let instance = builder(&provider).build_site(&record(), None).await.unwrap();
        instance.mark_ready();

        instance.shutdown(Duration::from_millis(100)).await.unwrap();
        assert_eq!(instance.state(), InstanceState::Destroyed);
        assert!(instance.storage().is_closed());
        assert_eq!(provider.open_handles("test-multi-aaa"), 0);
        assert!(instance.begin_request().is_err());

        // second shutdown is a no-op
        instance.shutdown(Duration::from_millis(100)).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_times_out_with_request_in_flight() {
        let provider = InMemoryStorageProvider::new();
        let instance = builder(&provider).build_site(&record(), None).await.unwrap();
        instance.mark_ready();
        let _guard = instance.begin_request().unwrap();

        let result = instance.shutdown(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(TenantError::DrainTimeout(_))));
        assert_eq!(instance.state(), InstanceState::Destroyed);
        assert!(instance.storage().is_closed());
    }
}
