//! Canonical serialization of an action label map into one tag value.

use std::collections::HashMap;

/// Serialize a label map as `[k1=v1,k2=v2]` with keys sorted
/// lexicographically. Identical label maps always produce identical strings,
/// so the result is usable as a dimensional tag value.
pub fn to_key(labels: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = labels.keys().collect();
    keys.sort();
    let joined = keys
        .iter()
        .map(|k| format!("{}={}", k, labels[*k]))
        .collect::<Vec<_>>()
        .join(",");
    format!("[{}]", joined)
}
