//! Tenant document data model: hand-written serde structs for the
//! self-contained document this crate's store owns.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// A tenant is identified by an `(app, env)` pair, both non-empty strings.
///
/// Defaults to `("default", "production")` when either header is absent or
/// invalid — that fallback is the transport's job; this type is just the key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TenantKey {
    pub app: String,
    pub env: String,
}

impl TenantKey {
    pub fn new(app: impl Into<String>, env: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            env: env.into(),
        }
    }

    pub fn default_tenant() -> Self {
        Self::new("default", "production")
    }

    /// Opaque, versioned persistence key, e.g. `v1:default:production`.
    pub fn storage_key(&self) -> String {
        format!("v1:{}:{}", self.app, self.env)
    }
}

impl Default for TenantKey {
    fn default() -> Self {
        Self::default_tenant()
    }
}

/// Discriminates the three flag shapes a [`FlagDefinition`] can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagType {
    Boolean,
    Payload,
    Variant,
}

/// A single variation of a `variant`-typed flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variation {
    pub id: String,
    /// Weight in `0..=100`. Weights are not required to sum to 100; see
    /// [`crate::hashing::choose_variant`] for the underflow contract.
    pub weight: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A scheduled, progressive-release clause.
///
/// At least one of `percentage` or `segment` must be present; both may be,
/// in which case both must pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutStep {
    /// ISO-8601 timestamp the step becomes eligible.
    pub start: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
}

fn default_rollout() -> u8 {
    100
}

fn is_hundred(v: &u8) -> bool {
    *v == 100
}

/// Deserializes a present `payload` field into `Some(value)`, including
/// `Some(Value::Null)` for a literal JSON `null`. Paired with `#[serde(default)]`
/// so an absent field still falls back to plain `None` — only a field that is
/// actually present gets routed through here, and `serde_json::Value`'s own
/// `Deserialize` impl (unlike `Option<Value>`'s) has no `null`-means-`None`
/// collapsing, so presence survives.
fn deserialize_present_payload<'de, D>(
    deserializer: D,
) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

/// A single flag definition, keyed by `id` within its tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub flag_type: FlagType,
    #[serde(default)]
    pub enabled: bool,
    /// AND-combined expression strings, evaluated in order.
    #[serde(default)]
    pub rules: Vec<String>,
    /// OR-combined segment ids; each must exist in the tenant's segment map.
    #[serde(default)]
    pub segments: BTreeSet<String>,
    /// Base rollout percentage, `0..=100`.
    #[serde(default = "default_rollout", skip_serializing_if = "is_hundred")]
    pub rollout: u8,
    #[serde(default)]
    pub rollouts: Vec<RolloutStep>,
    /// Required (and may be `null`) when `flag_type == Payload`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present_payload"
    )]
    pub payload: Option<serde_json::Value>,
    /// At least two entries required when `flag_type == Variant`.
    #[serde(default)]
    pub variations: Vec<Variation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "isTrackable")]
    pub is_trackable: bool,
}

/// Why a [`FlagDefinition`] failed validation. Kept distinct from
/// [`crate::error::EngineError`] so callers (the store) choose the right
/// engine-error kind: a missing segment reference is a referential failure,
/// everything else is a plain schema failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlagValidationError {
    /// A segment id in `flag.segments` has no matching entry in the tenant's
    /// segment map.
    #[error("referenced segment {0:?} does not exist")]
    MissingSegment(String),
    /// Any other shape violation (empty id, wrong fields for the flag type).
    #[error("{0}")]
    Schema(String),
}

impl FlagDefinition {
    /// Validates type/field invariants against a tenant's segment map.
    ///
    /// Segment-reference existence requires the caller to pass the tenant's
    /// segment map since it cannot be checked from the flag alone.
    pub fn validate(&self, segments: &BTreeMap<String, String>) -> Result<(), FlagValidationError> {
        if self.id.trim().is_empty() {
            return Err(FlagValidationError::Schema("flag id must not be empty".into()));
        }
        for segment_id in &self.segments {
            if !segments.contains_key(segment_id) {
                return Err(FlagValidationError::MissingSegment(segment_id.clone()));
            }
        }
        match self.flag_type {
            FlagType::Boolean => {
                if self.payload.is_some() {
                    return Err(FlagValidationError::Schema(
                        "boolean flags must not carry a payload".into(),
                    ));
                }
                if !self.variations.is_empty() {
                    return Err(FlagValidationError::Schema(
                        "boolean flags must not carry variations".into(),
                    ));
                }
            }
            FlagType::Payload => {
                if self.payload.is_none() {
                    return Err(FlagValidationError::Schema(
                        "payload flags require a payload field (null is accepted, absence is not)"
                            .into(),
                    ));
                }
            }
            FlagType::Variant => {
                if self.variations.len() < 2 {
                    return Err(FlagValidationError::Schema(
                        "variant flags require at least two variations".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// The document holding all flags and segments for one tenant.
///
/// Segments are reusable expression strings, flags are keyed by id. Segment
/// deletion cascades into every referencing flag's `segments` set within the
/// same store mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantDocument {
    #[serde(default)]
    pub flags: BTreeMap<String, FlagDefinition>,
    #[serde(default)]
    pub segments: BTreeMap<String, String>,
}

impl TenantDocument {
    pub fn new() -> Self {
        Self::default()
    }
}
