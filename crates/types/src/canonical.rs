use serde_json::{Map, Value};

/// The opaque body payload carried by every item. Keys are sorted on
/// construction (via [`Map`]'s use as a [`BTreeMap`]-backed structure here),
/// which is half of determinism; [`canonical_bytes`] does the rest by
/// recursively sorting nested objects too, since `serde_json::Map` preserves
/// insertion order by default and callers may have built a body from an
/// unsorted source (a wire message, a hook's output).
///
/// [`BTreeMap`]: std::collections::BTreeMap
pub type Body = Map<String, Value>;

/// Recursively sorts object keys so that two semantically identical bodies
/// serialize to the same bytes regardless of construction order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = std::collections::BTreeMap::new();
            for (k, v) in map {
                let _ = sorted.insert(k.clone(), canonicalize(v));
            }
            let mut out = Map::new();
            for (k, v) in sorted {
                let _ = out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Produces the deterministic byte representation of a body used as input
/// to [`crate::version::derive_version`].
///
/// `serde_json`'s number formatting (via the `ryu`/integer paths it uses
/// internally) is platform-independent, so once keys are sorted the
/// resulting bytes are stable across processes and architectures.
#[must_use]
pub fn canonical_bytes(body: &Body) -> Vec<u8> {
    let canonical = canonicalize(&Value::Object(body.clone()));
    // `to_vec` on a `Value` never fails: every variant we construct here is
    // representable.
    serde_json::to_vec(&canonical).unwrap_or_default()
}
