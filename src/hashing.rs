//! Deterministic hash and bucket functions.
//!
//! FNV-1a 32-bit over `identity:flagKey`, mapped into `1..=100` via
//! `(hash mod 100) + 1`. Do not "improve" the distribution — existing
//! users already occupy the buckets this produces.

use crate::model::Variation;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// FNV-1a 32-bit hash over raw bytes.
pub fn fnv1a32(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Deterministic bucket in `1..=100` for an `(identity, flag key)` pair.
///
/// The composite key couples identity to the flag so the same user does not
/// land in the same bucket across different flags.
pub fn bucket(identity: &str, flag_key: &str) -> u32 {
    let mut composite = String::with_capacity(identity.len() + flag_key.len() + 1);
    composite.push_str(identity);
    composite.push(':');
    composite.push_str(flag_key);
    (fnv1a32(composite.as_bytes()) % 100) + 1
}

/// Whether `identity` falls within `pct` percent of the rollout for `flag_key`.
///
/// `pct == 100` admits everyone without hashing; `pct == 0` admits no one.
pub fn in_rollout(identity: &str, flag_key: &str, pct: u32) -> bool {
    if pct >= 100 {
        return true;
    }
    if pct == 0 {
        return false;
    }
    bucket(identity, flag_key) <= pct
}

/// Walks `variations` in declared order, accumulating weight, and returns the
/// index of the first variation whose cumulative weight is `>= bucket`.
///
/// Returns `None` when the bucket exceeds the total accumulated weight
/// (weights summing to less than 100) — callers fall back to the default
/// variation in that case; this function never invents coverage for the
/// remainder.
pub fn choose_variant(identity: &str, flag_key: &str, variations: &[Variation]) -> Option<usize> {
    let b = bucket(identity, flag_key);
    let mut cumulative: u32 = 0;
    for (idx, variation) in variations.iter().enumerate() {
        cumulative += u32::from(variation.weight);
        if cumulative >= b {
            return Some(idx);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a32_pinned_value() {
        assert_eq!(fnv1a32(b"user-123:test-flag"), 3_459_576_216);
    }

    #[test]
    fn bucket_pinned_values() {
        assert_eq!(bucket("user-123", "new-dashboard"), 95);
        assert_eq!(bucket("user-456", "new-dashboard"), 34);
    }

    #[test]
    fn bucket_is_deterministic() {
        assert_eq!(bucket("a", "b"), bucket("a", "b"));
    }

    #[test]
    fn bucket_range() {
        for i in 0..2000 {
            let id = format!("user-{i}");
            let b = bucket(&id, "some-flag");
            assert!((1..=100).contains(&b));
        }
    }

    #[test]
    fn identity_isolation_across_flags() {
        // Swapping the flag key must not preserve the bucket in general.
        let mut differs = false;
        for i in 0..50 {
            let id = format!("user-{i}");
            if bucket(&id, "flag-a") != bucket(&id, "flag-b") {
                differs = true;
                break;
            }
        }
        assert!(differs, "bucket should depend on the flag key too");
    }

    #[test]
    fn in_rollout_boundaries() {
        assert!(!in_rollout("anyone", "flag", 0));
        assert!(in_rollout("anyone", "flag", 100));
        // Pinned: bucket("user-456", "new-dashboard") == 34 <= 50 -> fires.
        assert!(in_rollout("user-456", "new-dashboard", 50));
        // bucket("user-123", "new-dashboard") == 95 > 50 -> does not fire.
        assert!(!in_rollout("user-123", "new-dashboard", 50));
    }

    #[test]
    fn choose_variant_weight_underflow_returns_none() {
        let variations = vec![
            Variation {
                id: "a".into(),
                weight: 1,
                payload: None,
                label: None,
            },
        ];
        // With only 1% of weight covered, almost every identity falls off the end.
        let mut saw_none = false;
        for i in 0..500 {
            let id = format!("user-{i}");
            if choose_variant(&id, "flag", &variations).is_none() {
                saw_none = true;
                break;
            }
        }
        assert!(saw_none);
    }

    #[test]
    fn choose_variant_stability_under_later_reweighing() {
        // Result for a chosen variation is stable as long as cumulative
        // weight up to it is unchanged, even if later variations' weights change.
        let identity = "user-1";
        let flag_key = "flag";
        let b = bucket(identity, flag_key);

        let variations_a = vec![
            Variation { id: "first".into(), weight: b as u8, payload: None, label: None },
            Variation { id: "second".into(), weight: 10, payload: None, label: None },
        ];
        let variations_b = vec![
            Variation { id: "first".into(), weight: b as u8, payload: None, label: None },
            Variation { id: "second".into(), weight: 50, payload: None, label: None },
        ];

        assert_eq!(
            choose_variant(identity, flag_key, &variations_a),
            choose_variant(identity, flag_key, &variations_b)
        );
    }
}
