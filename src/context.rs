//! The evaluation input context: `{id, user, page, geo, request}`.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// `page.url` field of the evaluation input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub url: Option<String>,
}

/// Best-effort geo lookup the transport attaches; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Geo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, rename = "isEu", skip_serializing_if = "Option::is_none")]
    pub is_eu: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
}

/// Request-scoped data the transport attaches (never populated by the core).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub headers: std::collections::BTreeMap<String, String>,
}

/// The full evaluation input record passed into the decision procedure.
///
/// `id` is the bucketing identity. A request body with no `id` is expected
/// to have had the caller's "backup id" substituted by the transport before
/// reaching here — the core never invents one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalContext {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub user: Json,
    #[serde(default)]
    pub page: Page,
    #[serde(default)]
    pub geo: Geo,
    #[serde(default)]
    pub request: Request,
}

impl EvalContext {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user: Json) -> Self {
        self.user = user;
        self
    }

    /// Resolves a top-level record field by name for the expression
    /// evaluator's member-access grammar. Unknown root names resolve to
    /// `None`, not an error — the expression evaluator treats that as
    /// `Value::Null` per its total-over-well-typed-input contract.
    pub fn root_field(&self, name: &str) -> Option<Json> {
        match name {
            "id" => Some(self.id.clone().map(Json::String).unwrap_or(Json::Null)),
            "user" => Some(self.user.clone()),
            "page" => serde_json::to_value(&self.page).ok(),
            "geo" => serde_json::to_value(&self.geo).ok(),
            "request" => serde_json::to_value(&self.request).ok(),
            _ => None,
        }
    }
}
