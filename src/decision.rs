//! The flag decision procedure: combines enabled state, rules, segments,
//! rollout steps, and the base rollout percentage into a single typed, pure
//! `(flag, segments, context, identity, now) -> result` function. Has no
//! per-request state; the store's state machine (writes) is entirely separate.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::context::EvalContext;
use crate::expr::{eval_rule, Now};
use crate::hashing::{choose_variant, in_rollout};
use crate::model::{FlagDefinition, FlagType, RolloutStep};

/// The result of evaluating one flag, typed by the flag's kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DecisionResult {
    Boolean {
        result: bool,
        #[serde(rename = "isEval")]
        is_eval: bool,
    },
    Payload {
        result: Option<Json>,
        #[serde(rename = "isEval")]
        is_eval: bool,
    },
    Variant {
        result: Option<Json>,
        #[serde(rename = "isEval")]
        is_eval: bool,
    },
}

impl DecisionResult {
    pub fn is_eval(&self) -> bool {
        match self {
            DecisionResult::Boolean { is_eval, .. }
            | DecisionResult::Payload { is_eval, .. }
            | DecisionResult::Variant { is_eval, .. } => *is_eval,
        }
    }
}

/// Produces the negative-branch shape for a flag type, used whenever the
/// flag does not fire.
fn default_result(flag: &FlagDefinition) -> DecisionResult {
    match flag.flag_type {
        FlagType::Boolean => DecisionResult::Boolean {
            result: false,
            is_eval: false,
        },
        FlagType::Payload => DecisionResult::Payload {
            result: None,
            is_eval: false,
        },
        FlagType::Variant => {
            let result = flag.variations.first().map(|v| {
                v.payload
                    .clone()
                    .unwrap_or_else(|| Json::String(v.id.clone()))
            });
            DecisionResult::Variant {
                result,
                is_eval: false,
            }
        }
    }
}

fn fired_result(flag: &FlagDefinition, identity: &str) -> DecisionResult {
    match flag.flag_type {
        FlagType::Boolean => DecisionResult::Boolean {
            result: true,
            is_eval: true,
        },
        FlagType::Payload => DecisionResult::Payload {
            result: Some(flag.payload.clone().unwrap_or(Json::Null)),
            is_eval: true,
        },
        FlagType::Variant => match choose_variant(identity, &flag.id, &flag.variations) {
            Some(idx) => {
                let variation = &flag.variations[idx];
                let result = Some(
                    variation
                        .payload
                        .clone()
                        .unwrap_or_else(|| Json::String(variation.id.clone())),
                );
                DecisionResult::Variant {
                    result,
                    is_eval: true,
                }
            }
            // Weight underflow: the caller falls back to the default
            // variation rather than getting invented coverage.
            None => default_result(flag),
        },
    }
}

/// Evaluates every rule in `flag.rules`; all must be truthy (AND-combined).
/// A parse or runtime failure counts as `false` and is logged, never
/// propagated.
fn rules_pass(flag: &FlagDefinition, ctx: &EvalContext, now: Now) -> bool {
    for rule in &flag.rules {
        match eval_rule(rule, ctx, now) {
            Ok(true) => continue,
            Ok(false) => return false,
            Err(err) => {
                warn!(flag_id = %flag.id, rule, error = %err, "rule evaluation failed, treating as false");
                return false;
            }
        }
    }
    true
}

/// Standalone segment OR check, only consulted when `flag.rollouts` is
/// empty. A missing segment id or a parse failure in its expression simply
/// doesn't count toward the OR.
fn any_segment_matches(
    segment_ids: impl Iterator<Item = String>,
    segments: &BTreeMap<String, String>,
    ctx: &EvalContext,
    now: Now,
) -> bool {
    for segment_id in segment_ids {
        let Some(expr) = segments.get(&segment_id) else {
            debug!(%segment_id, "referenced segment missing from tenant, skipping");
            continue;
        };
        match eval_rule(expr, ctx, now) {
            Ok(true) => return true,
            Ok(false) => continue,
            Err(err) => {
                warn!(%segment_id, error = %err, "segment expression failed, treating as false");
                continue;
            }
        }
    }
    false
}

/// A single rollout step passes iff its start time has arrived and, when
/// present, its segment and/or percentage clauses also pass. A step with
/// neither clause is invalid and fails.
fn step_passes(
    step: &RolloutStep,
    flag_id: &str,
    segments: &BTreeMap<String, String>,
    ctx: &EvalContext,
    identity: &str,
    now: Now,
) -> bool {
    let Ok(start) = chrono::DateTime::parse_from_rfc3339(&step.start) else {
        warn!(start = %step.start, "rollout step start failed to parse, step fails");
        return false;
    };
    if now.0 < start.timestamp_millis() {
        return false;
    }
    if step.percentage.is_none() && step.segment.is_none() {
        return false;
    }
    if let Some(segment_id) = &step.segment {
        let matched = any_segment_matches(std::iter::once(segment_id.clone()), segments, ctx, now);
        if !matched {
            return false;
        }
    }
    if let Some(pct) = step.percentage {
        if !in_rollout(identity, flag_id, u32::from(pct)) {
            return false;
        }
    }
    true
}

/// Walks `flag.rollouts` in order; the first passing step fires, later
/// steps are never consulted.
fn eval_steps(
    flag: &FlagDefinition,
    segments: &BTreeMap<String, String>,
    ctx: &EvalContext,
    identity: &str,
    now: Now,
) -> bool {
    flag.rollouts
        .iter()
        .any(|step| step_passes(step, &flag.id, segments, ctx, identity, now))
}

/// The fire procedure: `(flag, segments, context, identity, now) -> result`.
///
/// `identity` must already be the resolved bucketing identity — the core
/// never synthesizes one; a transport falling back to a "backup id" does
/// that before calling `decide`.
pub fn decide(
    flag: &FlagDefinition,
    segments: &BTreeMap<String, String>,
    ctx: &EvalContext,
    identity: &str,
    now: Now,
) -> DecisionResult {
    if !flag.enabled {
        return default_result(flag);
    }

    if !rules_pass(flag, ctx, now) {
        return default_result(flag);
    }

    if flag.rollouts.is_empty() && !flag.segments.is_empty() {
        let matched = any_segment_matches(flag.segments.iter().cloned(), segments, ctx, now);
        if !matched {
            return default_result(flag);
        }
    }

    let selected = if !flag.rollouts.is_empty() {
        eval_steps(flag, segments, ctx, identity, now)
    } else {
        in_rollout(identity, &flag.id, u32::from(flag.rollout))
    };

    if !selected {
        return default_result(flag);
    }

    fired_result(flag, identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Variation};
    use serde_json::json;

    fn boolean_flag(id: &str) -> FlagDefinition {
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
    fn disabled_flag_always_defaults() {
        let mut flag = boolean_flag("f");
        flag.enabled = false;
        let ctx = EvalContext::with_id("u1");
        let result = decide(&flag, &Default::default(), &ctx, "u1", Now(0));
        assert_eq!(
            result,
            DecisionResult::Boolean {
                result: false,
                is_eval: false
            }
        );
    }

    #[test]
    fn rule_and_combination() {
        let mut flag = boolean_flag("premium-feature");
        flag.rules = vec!["user.subscription == 'premium'".into()];
        let segments = Default::default();

        let ctx = EvalContext::with_id("u").with_user(json!({"subscription": "premium"}));
        assert_eq!(
            decide(&flag, &segments, &ctx, "u", Now(0)),
            DecisionResult::Boolean {
                result: true,
                is_eval: true
            }
        );

        let ctx = EvalContext::with_id("u").with_user(json!({"subscription": "free"}));
        assert_eq!(
            decide(&flag, &segments, &ctx, "u", Now(0)),
            DecisionResult::Boolean {
                result: false,
                is_eval: false
            }
        );
    }

    #[test]
    fn segment_or_only_without_rollouts() {
        let mut flag = boolean_flag("f");
        flag.segments = ["premiumUsers".to_string(), "betaUsers".to_string()]
            .into_iter()
            .collect();
        let mut segments = BTreeMap::new();
        segments.insert("premiumUsers".to_string(), "user.premium == true".to_string());
        segments.insert("betaUsers".to_string(), "user.beta == true".to_string());

        let ctx = EvalContext::with_id("u").with_user(json!({"premium": false, "beta": true}));
        assert!(decide(&flag, &segments, &ctx, "u", Now(0)).is_eval());

        let ctx = EvalContext::with_id("u").with_user(json!({"premium": false, "beta": false}));
        assert!(!decide(&flag, &segments, &ctx, "u", Now(0)).is_eval());
    }

    #[test]
    fn rollouts_subsume_standalone_segment_check() {
        // When rollouts is non-empty the base rollout and the standalone
        // segment OR are both bypassed; only the rollout-step walk governs.
        let mut flag = boolean_flag("f");
        flag.rollout = 0;
        flag.segments = ["neverChecked".to_string()].into_iter().collect();
        flag.rollouts = vec![RolloutStep {
            start: "2020-01-01T00:00:00Z".into(),
            percentage: Some(100),
            segment: None,
        }];
        let mut segments = BTreeMap::new();
        segments.insert("neverChecked".to_string(), "false".to_string());

        let ctx = EvalContext::with_id("u");
        assert!(decide(&flag, &segments, &ctx, "u", Now(1_700_000_000_000)).is_eval());
    }

    #[test]
    fn variant_weight_underflow_falls_back_to_default() {
        let mut flag = boolean_flag("variant-flag");
        flag.flag_type = FlagType::Variant;
        flag.variations = vec![Variation {
            id: "only".into(),
            weight: 1,
            payload: None,
            label: None,
        }];

        // With only 1% of weight covered, some identity in a small sample
        // must fall off the end and land on the default (is_eval: false).
        let ctx = EvalContext::with_id("u");
        let saw_underflow = (0..200).any(|i| {
            let identity = format!("user-{i}");
            matches!(
                decide(&flag, &Default::default(), &ctx, &identity, Now(0)),
                DecisionResult::Variant { is_eval: false, .. }
            )
        });
        assert!(saw_underflow);
    }
}
