//! Request-count recycling
//!
//! Each site instance may be given a request budget. Once spent, the
//! instance is either rebuilt on the next resolve or, under the exit
//! policy, left in place until every resident instance is spent, at which
//! point the process is asked to exit and be restarted from outside.

use crate::instance::TenantInstance;
use multisite_config::MultisiteOptions;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// How spent instances are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecyclePolicy {
    Disabled,
    /// Retire and rebuild the spent instance
    Rebuild { max: u64, jitter: u64 },
    /// Exit the process once all resident instances are spent
    Exit { max: u64, jitter: u64 },
}

impl RecyclePolicy {
    pub fn from_options(options: &MultisiteOptions) -> Self {
        let Some(max) = options.max_requests_before_shutdown else {
            return RecyclePolicy::Disabled;
        };
        let jitter = options.additional_requests_before_shutdown.unwrap_or(0);
        if options.exit {
            RecyclePolicy::Exit { max, jitter }
        } else {
            RecyclePolicy::Rebuild { max, jitter }
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, RecyclePolicy::Disabled)
    }
}

/// Recycling supervisor
pub struct RecyclingSupervisor {
    policy: RecyclePolicy,
    exit_tx: watch::Sender<bool>,
}

impl RecyclingSupervisor {
    pub fn new(policy: RecyclePolicy) -> Self {
        let (exit_tx, _) = watch::channel(false);
        Self { policy, exit_tx }
    }

    pub fn policy(&self) -> RecyclePolicy {
        self.policy
    }

    /// `max + uniform(0..=jitter)`, or `None` when recycling is off
    pub fn budget_for_new_instance(&self) -> Option<u64> {
        match self.policy {
            RecyclePolicy::Disabled => None,
            RecyclePolicy::Rebuild { max, jitter } | RecyclePolicy::Exit { max, jitter } => {
                let extra = if jitter == 0 {
                    0
                } else {
                    rand::rng().random_range(0..=jitter)
                };
                Some(max.saturating_add(extra))
            }
        }
    }

    /// Count an admitted request against `instance`.
    ///
    /// Returns true for the request that spends the budget. That request
    /// still completes on `instance`.
    pub fn record_request(&self, instance: &TenantInstance) -> bool {
        let crossed = instance.record_request();
        if crossed {
            info!(
                tenant = %instance.tenant_id(),
                short_name = %instance.short_name(),
                requests = instance.request_count(),
                "tenant instance spent its request budget"
            );
        }
        crossed
    }

    /// Whether a cached instance must be replaced before serving
    pub fn should_rebuild(&self, instance: &TenantInstance) -> bool {
        matches!(self.policy, RecyclePolicy::Rebuild { .. }) && instance.is_over_budget()
    }

    /// Raise the exit signal if every resident site instance is spent.
    pub fn check_exit(&self, instances: &[Arc<TenantInstance>]) -> bool {
        if !matches!(self.policy, RecyclePolicy::Exit { .. }) || self.exit_requested() {
            return false;
        }
        let mut sites = instances.iter().filter(|instance| !instance.is_dashboard()).peekable();
        let spent = sites.peek().is_some() && sites.all(|instance| instance.is_over_budget());
        if spent {
            warn!(
                instances = instances.len(),
                "every tenant instance spent its budget, requesting process exit"
            );
            self.exit_tx.send_replace(true);
        }
        spent
    }

    /// Watch the exit signal
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.exit_tx.subscribe()
    }

    pub fn exit_requested(&self) -> bool {
        *self.exit_tx.borrow()
    }
}
