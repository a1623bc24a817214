//! The per-tenant definition store.
//!
//! Each tenant document lives behind its own [`ArcSwap`]: a lock-free-read
//! pattern where reads never block a writer and vice versa. Mutators use
//! [`ArcSwap::rcu`] as the compare-and-swap primitive, so a write is a
//! read-modify-write retried automatically under contention rather than a
//! lock held across the whole mutation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use serde::{Deserialize, Deserializer};
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::model::{FlagDefinition, FlagValidationError, TenantDocument, TenantKey};

/// Deserializes a present, doubly-optional `payload` patch field: absent
/// stays `None` (leave untouched), present-with-`null` becomes
/// `Some(Some(Value::Null))` (clear to an explicit null), present-with-value
/// becomes `Some(Some(value))`. Mirrors
/// [`crate::model`]'s `deserialize_present_payload`, one level deeper:
/// `serde_json::Value`'s `Deserialize` impl never collapses `null` into a
/// missing value, so presence survives through both layers of `Option`.
fn deserialize_present_payload_patch<'de, D>(
    deserializer: D,
) -> Result<Option<Option<serde_json::Value>>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(|v| Some(Some(v)))
}

/// A partial update to an existing flag. Fields left `None` are unchanged.
/// Rejecting an all-`None` patch is a transport-level concern, not a store
/// invariant, so the store accepts (and no-ops) one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlagPatch {
    pub enabled: Option<bool>,
    pub rules: Option<Vec<String>>,
    pub segments: Option<std::collections::BTreeSet<String>>,
    pub rollout: Option<u8>,
    pub rollouts: Option<Vec<crate::model::RolloutStep>>,
    #[serde(default, deserialize_with = "deserialize_present_payload_patch")]
    pub payload: Option<Option<serde_json::Value>>,
    pub variations: Option<Vec<crate::model::Variation>>,
    pub label: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub is_trackable: Option<bool>,
}

impl FlagPatch {
    fn apply(self, mut flag: FlagDefinition) -> FlagDefinition {
        if let Some(v) = self.enabled {
            flag.enabled = v;
        }
        if let Some(v) = self.rules {
            flag.rules = v;
        }
        if let Some(v) = self.segments {
            flag.segments = v;
        }
        if let Some(v) = self.rollout {
            flag.rollout = v;
        }
        if let Some(v) = self.rollouts {
            flag.rollouts = v;
        }
        if let Some(v) = self.payload {
            flag.payload = v;
        }
        if let Some(v) = self.variations {
            flag.variations = v;
        }
        if let Some(v) = self.label {
            flag.label = v;
        }
        if let Some(v) = self.description {
            flag.description = v;
        }
        if let Some(v) = self.is_trackable {
            flag.is_trackable = v;
        }
        flag
    }
}

/// The definition-store surface a transport (or this crate's facade) calls.
/// Every mutator returns a value or an error; none ever panics across the
/// boundary.
pub trait TenantStore {
    fn get_data(&self, tenant: &TenantKey) -> TenantDocument;
    fn put_flag(&self, tenant: &TenantKey, flag: FlagDefinition) -> EngineResult<()>;
    fn update_flag(&self, tenant: &TenantKey, id: &str, patch: FlagPatch) -> EngineResult<()>;
    fn delete_flag(&self, tenant: &TenantKey, id: &str) -> EngineResult<()>;
    fn put_segment(&self, tenant: &TenantKey, id: &str, rule: String) -> EngineResult<()>;
    fn delete_segment(&self, tenant: &TenantKey, id: &str) -> EngineResult<()>;
    fn sync_env(
        &self,
        app: &str,
        source_env: &str,
        target_env: &str,
        overwrite: bool,
    ) -> EngineResult<()>;
    fn sync_flag(
        &self,
        flag_id: &str,
        app: &str,
        source_env: &str,
        target_env: &str,
        overwrite: bool,
    ) -> EngineResult<()>;
}

/// In-memory tenant store. One [`ArcSwap<TenantDocument>`] per tenant key; a
/// short-lived [`Mutex`] only guards the handle table (tenant creation),
/// never the document contents themselves.
#[derive(Default)]
pub struct InMemoryTenantStore {
    tenants: Mutex<HashMap<TenantKey, Arc<ArcSwap<TenantDocument>>>>,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, tenant: &TenantKey) -> Arc<ArcSwap<TenantDocument>> {
        let mut tenants = self.tenants.lock().unwrap_or_else(|e| e.into_inner());
        tenants
            .entry(tenant.clone())
            .or_insert_with(|| Arc::new(ArcSwap::from_pointee(TenantDocument::new())))
            .clone()
    }

    /// Applies `f` to the tenant's current document under CAS retry; `f`
    /// returning `Err` rejects the mutation without writing anything. `f`
    /// must be pure: `rcu` may invoke it more than once under contention.
    fn mutate<F>(&self, tenant: &TenantKey, f: F) -> EngineResult<()>
    where
        F: Fn(&TenantDocument) -> Result<TenantDocument, EngineError>,
    {
        let slot = self.slot(tenant);
        let mut outcome: Option<EngineResult<()>> = None;
        slot.rcu(|current| match f(current) {
            Ok(new_doc) => {
                outcome = Some(Ok(()));
                Arc::new(new_doc)
            }
            Err(err) => {
                outcome = Some(Err(err));
                Arc::clone(current)
            }
        });
        outcome.unwrap_or(Ok(()))
    }
}

/// Maps a schema/referential validation failure onto its engine-error kind:
/// a missing segment reference is `InvalidReference`, every other schema
/// failure is a plain `InvalidInput`.
fn validation_to_engine_error(err: FlagValidationError) -> EngineError {
    match err {
        FlagValidationError::MissingSegment(id) => EngineError::InvalidReference(id),
        FlagValidationError::Schema(msg) => EngineError::InvalidInput(msg),
    }
}

impl TenantStore for InMemoryTenantStore {
    fn get_data(&self, tenant: &TenantKey) -> TenantDocument {
        self.slot(tenant).load().as_ref().clone()
    }

    fn put_flag(&self, tenant: &TenantKey, flag: FlagDefinition) -> EngineResult<()> {
        let result = self.mutate(tenant, |doc| {
            flag.validate(&doc.segments)
                .map_err(validation_to_engine_error)?;
            let mut doc = doc.clone();
            doc.flags.insert(flag.id.clone(), flag.clone());
            Ok(doc)
        });
        if let Err(err) = &result {
            warn!(tenant = %tenant.storage_key(), flag_id = %flag.id, %err, "putFlag rejected");
        }
        result
    }

    fn update_flag(&self, tenant: &TenantKey, id: &str, patch: FlagPatch) -> EngineResult<()> {
        self.mutate(tenant, |doc| {
            let existing = doc
                .flags
                .get(id)
                .cloned()
                .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
            let updated = patch.clone().apply(existing);
            updated
                .validate(&doc.segments)
                .map_err(validation_to_engine_error)?;
            let mut doc = doc.clone();
            doc.flags.insert(id.to_string(), updated);
            Ok(doc)
        })
    }

    fn delete_flag(&self, tenant: &TenantKey, id: &str) -> EngineResult<()> {
        self.mutate(tenant, |doc| {
            if !doc.flags.contains_key(id) {
                return Err(EngineError::NotFound(id.to_string()));
            }
            let mut doc = doc.clone();
            doc.flags.remove(id);
            Ok(doc)
        })
    }

    fn put_segment(&self, tenant: &TenantKey, id: &str, rule: String) -> EngineResult<()> {
        // Segments stand alone: no referential checks on write.
        self.mutate(tenant, |doc| {
            let mut doc = doc.clone();
            doc.segments.insert(id.to_string(), rule.clone());
            Ok(doc)
        })
    }

    fn delete_segment(&self, tenant: &TenantKey, id: &str) -> EngineResult<()> {
        self.mutate(tenant, |doc| {
            if !doc.segments.contains_key(id) {
                return Err(EngineError::NotFound(id.to_string()));
            }
            let mut doc = doc.clone();
            doc.segments.remove(id);
            // Cascade: strip the deleted segment from every referencing
            // flag in the same transaction.
            for flag in doc.flags.values_mut() {
                flag.segments.remove(id);
            }
            Ok(doc)
        })
    }

    fn sync_env(
        &self,
        app: &str,
        source_env: &str,
        target_env: &str,
        overwrite: bool,
    ) -> EngineResult<()> {
        let source = TenantKey::new(app, source_env);
        let target = TenantKey::new(app, target_env);
        let source_doc = self.get_data(&source);

        self.mutate(&target, |current| {
            let mut merged = current.clone();
            for (id, segment) in &source_doc.segments {
                merged.segments.insert(id.clone(), segment.clone());
            }
            for (id, flag) in &source_doc.flags {
                let mut copied = flag.clone();
                if !overwrite {
                    copied.enabled = false;
                }
                merged.flags.insert(id.clone(), copied);
            }
            Ok(merged)
        })?;
        info!(app, source_env, target_env, overwrite, "synced environment");
        Ok(())
    }

    fn sync_flag(
        &self,
        flag_id: &str,
        app: &str,
        source_env: &str,
        target_env: &str,
        overwrite: bool,
    ) -> EngineResult<()> {
        let source = TenantKey::new(app, source_env);
        let target = TenantKey::new(app, target_env);
        let source_doc = self.get_data(&source);
        let flag = source_doc
            .flags
            .get(flag_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(flag_id.to_string()))?;

        self.mutate(&target, |current| {
            let mut merged = current.clone();
            // Only the segments this flag actually references are copied.
            for segment_id in &flag.segments {
                if let Some(rule) = source_doc.segments.get(segment_id) {
                    merged.segments.insert(segment_id.clone(), rule.clone());
                }
            }
            let mut copied = flag.clone();
            if !overwrite {
                copied.enabled = false;
            }
            merged.flags.insert(flag_id.to_string(), copied);
            Ok(merged)
        })?;
        info!(app, flag_id, source_env, target_env, overwrite, "synced flag");
        Ok(())
    }
}

/// Convenience for code paths that already hold a document and just need
/// its segment map (e.g. the facade before calling [`crate::decision::decide`]).
pub fn segments_of(doc: &TenantDocument) -> &BTreeMap<String, String> {
    &doc.segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FlagType;

    fn flag(id: &str) -> FlagDefinition {
        FlagDefinition {
            id: id.into(),
            flag_type: FlagType::Boolean,
            enabled: true,
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
    fn put_flag_rejects_missing_segment_reference() {
        let store = InMemoryTenantStore::new();
        let tenant = TenantKey::default_tenant();
        let mut f = flag("f");
        f.segments = ["ghost".to_string()].into_iter().collect();
        let err = store.put_flag(&tenant, f).unwrap_err();
        assert!(matches!(err, EngineError::InvalidReference(_)));
        assert!(store.get_data(&tenant).flags.is_empty(), "no partial write");
    }

    #[test]
    fn put_flag_rejects_schema_violation_as_invalid_input_not_invalid_reference() {
        let store = InMemoryTenantStore::new();
        let tenant = TenantKey::default_tenant();
        let mut f = flag("f");
        f.payload = Some(serde_json::json!("booleans can't carry this"));
        let err = store.put_flag(&tenant, f).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn update_flag_patch_sets_payload_to_explicit_null() {
        let store = InMemoryTenantStore::new();
        let tenant = TenantKey::default_tenant();
        let mut f = flag("f");
        f.flag_type = FlagType::Payload;
        f.payload = Some(serde_json::json!("not null yet"));
        store.put_flag(&tenant, f).unwrap();

        let patch: FlagPatch = serde_json::from_str(r#"{"payload":null}"#).unwrap();
        store.update_flag(&tenant, "f", patch).unwrap();

        let doc = store.get_data(&tenant);
        assert_eq!(doc.flags.get("f").unwrap().payload, Some(serde_json::Value::Null));
    }

    #[test]
    fn update_flag_patch_without_payload_key_leaves_payload_untouched() {
        let store = InMemoryTenantStore::new();
        let tenant = TenantKey::default_tenant();
        let mut f = flag("f");
        f.flag_type = FlagType::Payload;
        f.payload = Some(serde_json::json!("stays"));
        store.put_flag(&tenant, f).unwrap();

        let patch: FlagPatch = serde_json::from_str(r#"{"enabled":false}"#).unwrap();
        store.update_flag(&tenant, "f", patch).unwrap();

        let doc = store.get_data(&tenant);
        assert_eq!(
            doc.flags.get("f").unwrap().payload,
            Some(serde_json::json!("stays"))
        );
    }

    #[test]
    fn cascade_delete_strips_segment_from_flags() {
        let store = InMemoryTenantStore::new();
        let tenant = TenantKey::default_tenant();
        store.put_segment(&tenant, "a", "true".into()).unwrap();
        store.put_segment(&tenant, "b", "true".into()).unwrap();
        let mut f = flag("f");
        f.segments = ["a".to_string(), "b".to_string()].into_iter().collect();
        store.put_flag(&tenant, f).unwrap();

        store.delete_segment(&tenant, "a").unwrap();

        let doc = store.get_data(&tenant);
        assert!(!doc.segments.contains_key("a"));
        assert!(doc.segments.contains_key("b"));
        assert_eq!(
            doc.flags.get("f").unwrap().segments,
            ["b".to_string()].into_iter().collect()
        );
    }

    #[test]
    fn delete_segment_missing_is_not_found() {
        let store = InMemoryTenantStore::new();
        let tenant = TenantKey::default_tenant();
        assert!(matches!(
            store.delete_segment(&tenant, "nope"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn sync_flag_defaults_to_disabled_and_copies_only_referenced_segments() {
        let store = InMemoryTenantStore::new();
        let app = "myapp";
        let source = TenantKey::new(app, "production");
        store
            .put_segment(&source, "beta-users", "true".into())
            .unwrap();
        store
            .put_segment(&source, "unrelated", "true".into())
            .unwrap();
        let mut f = flag("feature-a");
        f.enabled = true;
        f.segments = ["beta-users".to_string()].into_iter().collect();
        store.put_flag(&source, f).unwrap();

        store
            .sync_flag("feature-a", app, "production", "staging", false)
            .unwrap();

        let target = TenantKey::new(app, "staging");
        let doc = store.get_data(&target);
        assert!(!doc.flags.get("feature-a").unwrap().enabled);
        assert!(doc.segments.contains_key("beta-users"));
        assert!(!doc.segments.contains_key("unrelated"));
    }

    #[test]
    fn sync_env_overwrite_preserves_enabled_and_merges_target_only_keys() {
        let store = InMemoryTenantStore::new();
        let app = "myapp";
        let source = TenantKey::new(app, "production");
        let target = TenantKey::new(app, "staging");

        let mut on = flag("on-flag");
        on.enabled = true;
        store.put_flag(&source, on).unwrap();

        let mut target_only = flag("target-only");
        target_only.enabled = true;
        store.put_flag(&target, target_only).unwrap();

        store.sync_env(app, "production", "staging", true).unwrap();

        let doc = store.get_data(&target);
        assert!(doc.flags.get("on-flag").unwrap().enabled);
        assert!(doc.flags.contains_key("target-only"), "merge, not replace");
    }

    #[test]
    fn sync_env_without_overwrite_forces_disabled() {
        let store = InMemoryTenantStore::new();
        let app = "myapp";
        let source = TenantKey::new(app, "production");
        let mut on = flag("on-flag");
        on.enabled = true;
        store.put_flag(&source, on).unwrap();

        store.sync_env(app, "production", "staging", false).unwrap();

        let target = TenantKey::new(app, "staging");
        let doc = store.get_data(&target);
        assert!(!doc.flags.get("on-flag").unwrap().enabled);
    }

    #[test]
    fn update_flag_missing_is_not_found() {
        let store = InMemoryTenantStore::new();
        let tenant = TenantKey::default_tenant();
        assert!(matches!(
            store.update_flag(&tenant, "nope", FlagPatch::default()),
            Err(EngineError::NotFound(_))
        ));
    }
}
