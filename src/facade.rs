//! The evaluation facade: the single entry point a transport layer calls,
//! `(flag, segments, input, now) -> Result`, plus the batch form over every
//! flag in a tenant. Thin glue over the store and the decision procedure.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::context::EvalContext;
use crate::decision::{decide, DecisionResult};
use crate::error::{EngineError, EngineResult};
use crate::expr::Now;
use crate::model::TenantKey;
use crate::store::TenantStore;

/// Glue code on top of the store and decision procedure. Holds no
/// evaluation-time state of its own; every call is a pure function of its
/// arguments plus whatever the store currently has on hand.
pub struct EvaluationFacade<S> {
    store: Arc<S>,
}

impl<S> EvaluationFacade<S>
where
    S: TenantStore,
{
    pub fn new(store: impl Into<Arc<S>>) -> Self {
        Self {
            store: store.into(),
        }
    }

    /// Resolves the bucketing identity: the context's `id` if present,
    /// otherwise the caller-supplied backup id. The core never invents an
    /// identity of its own.
    fn resolve_identity<'a>(ctx: &'a EvalContext, backup_identity: &'a str) -> &'a str {
        ctx.id.as_deref().unwrap_or(backup_identity)
    }

    /// Evaluates a single named flag against `ctx`. `NotFound` if the flag
    /// doesn't exist in the tenant's current document.
    pub fn evaluate_flag(
        &self,
        tenant: &TenantKey,
        flag_id: &str,
        ctx: &EvalContext,
        backup_identity: &str,
        now: Now,
    ) -> EngineResult<DecisionResult> {
        let doc = self.store.get_data(tenant);
        let flag = doc
            .flags
            .get(flag_id)
            .ok_or_else(|| EngineError::NotFound(flag_id.to_string()))?;
        let identity = Self::resolve_identity(ctx, backup_identity);
        Ok(decide(flag, &doc.segments, ctx, identity, now))
    }

    /// Evaluates every flag in the tenant's current document against `ctx`.
    /// Never fails: a tenant with no flags yields an empty map.
    pub fn evaluate_all(
        &self,
        tenant: &TenantKey,
        ctx: &EvalContext,
        backup_identity: &str,
        now: Now,
    ) -> BTreeMap<String, DecisionResult> {
        let doc = self.store.get_data(tenant);
        let identity = Self::resolve_identity(ctx, backup_identity);
        doc.flags
            .iter()
            .map(|(id, flag)| (id.clone(), decide(flag, &doc.segments, ctx, identity, now)))
            .collect()
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FlagDefinition, FlagType};
    use crate::store::InMemoryTenantStore;

    fn boolean_flag(id: &str, enabled: bool) -> FlagDefinition {
        FlagDefinition {
            id: id.into(),
            flag_type: FlagType::Boolean,
            enabled,
            rules: vec![],
            segments: Default::default(),
            rollout: 100,
            rollouts: vec![],
            payload: None,
            variations: vec![],
            label: None,
            description: None,
            is_trackable: false,
        }
    }

    #[test]
    fn evaluate_flag_not_found() {
        let facade = EvaluationFacade::new(Arc::new(InMemoryTenantStore::new()));
        let tenant = TenantKey::default_tenant();
        let ctx = EvalContext::with_id("u1");
        let err = facade
            .evaluate_flag(&tenant, "missing", &ctx, "backup", Now(0))
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn evaluate_flag_falls_back_to_backup_identity() {
        let store = Arc::new(InMemoryTenantStore::new());
        let tenant = TenantKey::default_tenant();
        store.put_flag(&tenant, boolean_flag("f", true)).unwrap();
        let facade = EvaluationFacade::new(store);

        let ctx = EvalContext::default();
        let result = facade
            .evaluate_flag(&tenant, "f", &ctx, "some-backup-id", Now(0))
            .unwrap();
        assert_eq!(
            result,
            DecisionResult::Boolean {
                result: true,
                is_eval: true
            }
        );
    }

    #[test]
    fn evaluate_all_covers_every_flag_in_the_tenant() {
        let store = Arc::new(InMemoryTenantStore::new());
        let tenant = TenantKey::default_tenant();
        store.put_flag(&tenant, boolean_flag("a", true)).unwrap();
        store.put_flag(&tenant, boolean_flag("b", false)).unwrap();
        let facade = EvaluationFacade::new(store);

        let ctx = EvalContext::with_id("u1");
        let results = facade.evaluate_all(&tenant, &ctx, "backup", Now(0));
        assert_eq!(results.len(), 2);
        assert!(results["a"].is_eval());
        assert!(!results["b"].is_eval());
    }
}
