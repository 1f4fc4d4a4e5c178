// Multisite - many hostname-routed sites in one process
//
// Re-exports the workspace crates under one name.

pub use multisite_core::*;

pub use multisite_config;
pub use multisite_core;
pub use multisite_tenancy;

pub use multisite_config::{ConfigService, MultisiteOptions, Tier};
pub use multisite_tenancy::{
    CreateTenantRequest, Multisite, TenantError, TenantRecord, UpdateTenantRequest,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use multisite_config::{ConfigService, FileFormat, MultisiteOptions, Tier};
    pub use multisite_core::logging::{LogConfig, LogFormat, LogLevel};
    pub use multisite_core::{HttpRequest, HttpResponse, RequestHandler, Server};
    pub use multisite_tenancy::prelude::*;
}
