//! Cache keys and canonical JSON.
//!
//! A cache key is the triple `(name, version, params)` where `params` is the
//! canonical encoding of an operation's input. Canonical encoding sorts object
//! keys recursively, so two structurally-equal values encode to the same
//! string no matter how their maps were built.

use std::fmt;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::CodecError;

/// Identity of one memoized result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    /// Operation name. Renaming an operation forks its cache namespace.
    pub name: String,
    /// Operation version. Bumping it orphans every earlier entry.
    pub version: i64,
    /// Canonical params.
    pub params: String,
}

impl CacheKey {
    pub fn new(name: impl Into<String>, version: i64, params: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version,
            params: params.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}:{}", self.name, self.version, self.params)
    }
}

/// Render a JSON value with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, child)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(child, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, child) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(child, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Serialize any serde value to its canonical string.
///
/// `what` names the payload ("params" or "result") in error messages.
pub fn to_canonical<T: Serialize + ?Sized>(
    value: &T,
    what: &'static str,
) -> Result<String, CodecError> {
    let json = serde_json::to_value(value).map_err(|e| CodecError::Serialize {
        what,
        reason: e.to_string(),
    })?;
    Ok(canonical_json(&json))
}

/// Parse a canonical (or any JSON) string back into a value.
pub fn from_canonical<T: DeserializeOwned>(
    encoded: &str,
    what: &'static str,
) -> Result<T, CodecError> {
    serde_json::from_str(encoded).map_err(|e| CodecError::Deserialize {
        what,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::collections::{BTreeMap, HashMap};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Page {
        url: String,
        depth: u32,
        tags: Vec<String>,
    }

    #[test]
    fn test_canonical_sorts_nested_keys() {
        let value = json!({"b": {"z": 1, "a": [ {"y": 2, "x": 1} ]}, "a": null});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":null,"b":{"a":[{"x":1,"y":2}],"z":1}}"#
        );
    }

    #[test]
    fn test_canonical_scalars() {
        assert_eq!(to_canonical(&3, "params").unwrap(), "3");
        assert_eq!(to_canonical("a\"b", "params").unwrap(), r#""a\"b""#);
        assert_eq!(to_canonical(&1.5f64, "params").unwrap(), "1.5");
    }

    #[test]
    fn test_struct_field_order_does_not_matter() {
        let page = Page {
            url: "https://example.com".to_string(),
            depth: 2,
            tags: vec!["b".to_string(), "a".to_string()],
        };
        let encoded = to_canonical(&page, "params").unwrap();
        assert_eq!(
            encoded,
            r#"{"depth":2,"tags":["b","a"],"url":"https://example.com"}"#
        );
        let decoded: Page = from_canonical(&encoded, "params").unwrap();
        assert_eq!(decoded, page);
    }

    #[test]
    fn test_from_canonical_reports_payload_kind() {
        let err = from_canonical::<Page>("{not json", "result").unwrap_err();
        assert!(matches!(err, CodecError::Deserialize { what: "result", .. }));
    }

    #[test]
    fn test_cache_key_display() {
        let key = CacheKey::new("double", 1, r#"{"x":1}"#);
        assert_eq!(key.to_string(), r#"double@v1:{"x":1}"#);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Insertion order of a map never leaks into its canonical form.
        #[test]
        fn prop_map_insertion_order_is_irrelevant(
            entries in prop::collection::vec(("[a-z]{1,6}", any::<i64>()), 0..12),
        ) {
            let forward: HashMap<String, i64> = entries.into_iter().collect();
            let sorted: BTreeMap<String, i64> = forward.clone().into_iter().collect();
            let reversed: HashMap<String, i64> = sorted
                .iter()
                .rev()
                .map(|(k, v)| (k.clone(), *v))
                .collect();

            let a = to_canonical(&forward, "params").unwrap();
            let b = to_canonical(&reversed, "params").unwrap();
            let c = to_canonical(&sorted, "params").unwrap();
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(&a, &c);
        }

        /// Canonical output is valid JSON denoting the same value.
        #[test]
        fn prop_canonical_parses_back(
            entries in prop::collection::btree_map("[a-z]{1,4}", any::<i32>(), 0..8),
            list in prop::collection::vec(any::<bool>(), 0..5),
        ) {
            let value = json!({"m": entries, "l": list});
            let encoded = canonical_json(&value);
            let parsed: Value = serde_json::from_str(&encoded).unwrap();
            prop_assert_eq!(parsed, value);
        }
    }
}
