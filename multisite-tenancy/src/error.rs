//! Tenant errors and their HTTP mapping.

/// Errors raised by tenant resolution, registry writes and instance lifecycle.
///
/// Both duplicate kinds display as the bare word `invalid` so callers cannot
/// tell which field collided; the offending value is kept for logs.
#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error("No tenant for host: {0}")]
    UnresolvedTenant(String),

    #[error("invalid")]
    DuplicateShortName(String),

    #[error("invalid")]
    DuplicateHostname(String),

    #[error("Invalid tenant: {0}")]
    Invalid(String),

    #[error("Tenant not found: {0}")]
    NotFound(String),

    #[error("Failed to construct tenant {tenant}: {reason}")]
    ConstructionFailure { tenant: String, reason: String },

    #[error("Tenant instance is draining: {0}")]
    Draining(String),

    #[error("Tenant instance did not drain in time: {0}")]
    DrainTimeout(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl TenantError {
    /// Whether a retry of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TenantError::ConstructionFailure { .. }
                | TenantError::Draining(_)
                | TenantError::DrainTimeout(_)
        )
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            TenantError::DuplicateShortName(_) | TenantError::DuplicateHostname(_)
        )
    }
}

impl From<TenantError> for multisite_core::Error {
    fn from(err: TenantError) -> Self {
        use multisite_core::Error;

        match err {
            TenantError::UnresolvedTenant(_) | TenantError::NotFound(_) => {
                Error::NotFound("Not Found".to_string())
            }
            TenantError::DuplicateShortName(_) | TenantError::DuplicateHostname(_) => {
                Error::BadRequest("invalid".to_string())
            }
            TenantError::Invalid(reason) => Error::BadRequest(reason),
            TenantError::ConstructionFailure { .. }
            | TenantError::Draining(_)
            | TenantError::DrainTimeout(_) => {
                Error::ServiceUnavailable("Service Unavailable".to_string())
            }
            TenantError::Storage(reason) => Error::Internal(reason),
        }
    }
}
