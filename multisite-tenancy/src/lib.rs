//! Multisite tenancy
//!
//! Many logically isolated sites served by one process, routed purely by
//! the `Host` header.
//!
//! # Features
//!
//! - **Hostname Resolution** - dashboard host, per-tier overrides, explicit
//!   routes and `{short_name}.{domain}` hosts
//! - **Tenant Registry** - CRUD over tenant records with race-free short
//!   name and hostname uniqueness
//! - **Instance Cache** - one live instance per tenant, built lazily with
//!   single-flight construction
//! - **Recycling** - per-instance request budgets that rebuild the
//!   instance or ask the whole process to exit
//! - **Dashboard** - privileged tenant with a JSON admin API
//!
//! # Quick Start
//!
//! ## 1. Bootstrap
//!
//! ```rust,ignore
//! use multisite_tenancy::prelude::*;
//!
//! let options = MultisiteOptions::default().with_dashboard_hostname("dashboard.test");
//! let multisite = Arc::new(Multisite::from_options(options).await?);
//! ```
//!
//! ## 2. Register a site
//!
//! ```rust,ignore
//! let site = multisite
//!     .dashboard()
//!     .insert_site(CreateTenantRequest::new("Site A").with_short_name("aaa").with_hostname("site.test"))
//!     .await?;
//! ```
//!
//! ## 3. Serve
//!
//! ```rust,ignore
//! let server = Server::new(multisite.clone());
//! server.listen(3000, shutdown_signal()).await?;
//! multisite.destroy().await?;
//! ```

pub mod cache;
pub mod dashboard;
pub mod error;
pub mod instance;
pub mod locks;
pub mod multisite;
pub mod recycling;
pub mod registry;
pub mod resolver;
pub mod site;
pub mod storage;
pub mod store;
pub mod tenant;
pub mod uniqueness;

pub use cache::TenantInstanceCache;
pub use dashboard::Dashboard;
pub use error::TenantError;
pub use instance::{DASHBOARD_NAME, InstanceBuilder, InstanceState, TenantInstance};
pub use locks::{KeyedGuard, KeyedLocks};
pub use multisite::Multisite;
pub use recycling::{RecyclePolicy, RecyclingSupervisor};
pub use registry::{RESERVED_SHORT_NAME, TenantRegistry};
pub use resolver::{HostnameResolver, ResolvedTenant, TenantResolver, normalize_host, strip_port};
pub use storage::{
    ContentRepository, InMemoryContentRepository, InMemoryStorageProvider, PieceQuery,
    StorageProvider, provider_for_url,
};
pub use store::{PieceRegistryStore, RegistryQuery, RegistryStore};
pub use tenant::{CreateTenantRequest, TenantRecord, UpdateTenantRequest};
pub use uniqueness::UniquenessValidator;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::dashboard::Dashboard;
    pub use crate::error::TenantError;
    pub use crate::instance::{InstanceState, TenantInstance};
    pub use crate::multisite::Multisite;
    pub use crate::recycling::RecyclePolicy;
    pub use crate::registry::TenantRegistry;
    pub use crate::resolver::{HostnameResolver, ResolvedTenant, TenantResolver};
    pub use crate::storage::{ContentRepository, InMemoryStorageProvider, StorageProvider};
    pub use crate::tenant::{CreateTenantRequest, TenantRecord, UpdateTenantRequest};
    pub use multisite_config::{MultisiteOptions, Tier};
    pub use multisite_core::{RequestHandler, Server};
    pub use std::sync::Arc;
}
