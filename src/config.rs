//! Ambient deployment configuration needed by any binary embedding this
//! crate. Deliberately small: the core is a library, not a service, so
//! there is no config-file parser here, just the knobs a caller sets in code.

use std::time::Duration;

use crate::model::TenantKey;

/// Deployment-wide defaults and resource knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Tenant used when the app/env selectors are absent or invalid
    /// (invalid/empty values fall back to defaults, never error).
    pub default_tenant: TenantKey,

    /// How long a transport MAY hold on to a tenant document read before
    /// re-fetching it from the store. Stale reads are acceptable: determinism
    /// depends only on definitions being the same across calls, not on being
    /// the newest. `None` disables caching.
    pub tenant_document_ttl: Option<Duration>,

    /// Whether a transport may keep a parsed-expression cache keyed by
    /// expression text, provided it is safe for concurrent read. This
    /// crate's evaluator itself is always stateless; this flag only
    /// documents the permission for a caller that wraps it.
    pub allow_expression_cache: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_tenant: TenantKey::default_tenant(),
            tenant_document_ttl: Some(Duration::from_secs(5)),
            allow_expression_cache: true,
        }
    }
}
