// src/core/group.rs

//! Group payload normalization and `group_hash` computation (§3 invariant
//! 5, §4.7, §8 round-trip law 4).

use sha2::{Digest, Sha256};

use crate::core::errors::IngestError;
use crate::core::protocol::{GroupPayload, MetaValue};

/// A normalized group: lower-cased-sortable metadata, ready for hashing.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NormalizedGroup {
    pub name: String,
    pub metadata: Vec<(String, MetaValue)>,
}

/// Normalizes a group payload: metadata keys and values pass through
/// unchanged; sorting for hashing happens in `compute_group_hash` so that
/// the *stored* metadata preserves insertion-adjacent order for display
/// while the *hash* is order-independent.
pub fn normalize(payload: &GroupPayload) -> NormalizedGroup {
    NormalizedGroup {
        name: payload.name.clone(),
        metadata: payload.metadata.clone(),
    }
}

/// Computes the deterministic group hash: SHA-256 over the canonical JSON
/// form of `{name, metadata: [[key, value], ...]}` with metadata pairs
/// sorted by `(key.to_lowercase(), value)`, truncated to the first 16 hex
/// characters (§3).
pub fn compute_group_hash(group: &NormalizedGroup) -> String {
    let mut pairs: Vec<(String, String)> = group
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.value.clone()))
        .collect();
    pairs.sort_by(|a, b| (a.0.to_lowercase(), &a.1).cmp(&(b.0.to_lowercase(), &b.1)));

    // Canonical, compact JSON: matches `json.dumps(..., separators=(",", ":"))`.
    let mut canonical = String::from("{\"name\":");
    canonical.push_str(&serde_json::to_string(&group.name).unwrap_or_default());
    canonical.push_str(",\"metadata\":[");
    for (i, (k, v)) in pairs.iter().enumerate() {
        if i > 0 {
            canonical.push(',');
        }
        canonical.push('[');
        canonical.push_str(&serde_json::to_string(&k.to_lowercase()).unwrap_or_default());
        canonical.push(',');
        canonical.push_str(&serde_json::to_string(v).unwrap_or_default());
        canonical.push(']');
    }
    canonical.push_str("]}");

    let digest = Sha256::digest(canonical.as_bytes());
    let hex = hex::encode(digest);
    hex[..16].to_string()
}

/// Validates a `group_hash` as accepted by the query surface's filters
/// (§6, "Identifiers"): 6-64 lowercase hex characters.
pub fn validate_group_hash(value: &str) -> Result<(), IngestError> {
    let ok = (6..=64).contains(&value.len())
        && value.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
    if ok {
        Ok(())
    } else {
        Err(IngestError::GroupHashInvalid(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(name: &str, pairs: &[(&str, &str)]) -> GroupPayload {
        GroupPayload {
            name: name.to_string(),
            metadata: pairs
                .iter()
                .map(|(k, v)| {
                    (
                        k.to_string(),
                        MetaValue {
                            value: v.to_string(),
                            url: None,
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn equal_payloads_hash_equal_regardless_of_key_case_and_order() {
        let a = payload("Suite A", &[("Board", "rev2"), ("site", "lab1")]);
        let b = payload("Suite A", &[("site", "lab1"), ("board", "rev2")]);
        assert_eq!(
            compute_group_hash(&normalize(&a)),
            compute_group_hash(&normalize(&b))
        );
    }

    #[test]
    fn hash_is_16_lowercase_hex_chars() {
        let g = normalize(&payload("x", &[]));
        let hash = compute_group_hash(&g);
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_name_changes_hash() {
        let a = normalize(&payload("a", &[]));
        let b = normalize(&payload("b", &[]));
        assert_ne!(compute_group_hash(&a), compute_group_hash(&b));
    }

    proptest::proptest! {
        /// §8 round-trip law 4: the hash depends only on the name and on
        /// the metadata pairs' (case-insensitive key, value) content, not
        /// on key case or insertion order.
        #[test]
        fn hash_is_invariant_under_key_case_and_permutation(
            name in "[a-zA-Z0-9 ]{1,12}",
            pairs in proptest::collection::vec(("[a-zA-Z]{1,8}", "[a-zA-Z0-9]{0,8}"), 0..6),
        ) {
            let original = payload(&name, &pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect::<Vec<_>>());

            let mut shuffled: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            shuffled.reverse();
            let recased: Vec<(String, &str)> = shuffled
                .iter()
                .map(|(k, v)| (flip_case(k), *v))
                .collect();
            let varied = payload(&name, &recased.iter().map(|(k, v)| (k.as_str(), *v)).collect::<Vec<_>>());

            proptest::prop_assert_eq!(
                compute_group_hash(&normalize(&original)),
                compute_group_hash(&normalize(&varied))
            );
        }
    }

    fn flip_case(s: &str) -> String {
        s.chars()
            .map(|c| if c.is_ascii_uppercase() { c.to_ascii_lowercase() } else { c.to_ascii_uppercase() })
            .collect()
    }
}
