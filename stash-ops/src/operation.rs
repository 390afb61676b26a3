//! The memoizable unit of work.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use stash_core::{from_canonical, to_canonical, CodecError, ExecutionError};

/// A named, versioned, memoizable computation.
///
/// Implementations declare identity (`name`, `version`), the computation
/// itself (`execute`), and optionally how params and results are encoded.
/// The `(name, version, serialized params)` triple is the cache key.
///
/// # Implementation Requirements
///
/// - `name()` must be stable across runs; changing it silently starts a new
///   cache namespace
/// - `version()` is the only invalidation mechanism: bump it and every
///   earlier entry stops matching
/// - `execute()` may be called more than once for the same logical params
///   (across processes, or after a failed bulk call) and must tolerate it
/// - The default encoders are canonical JSON, so params built with
///   different map insertion orders share a key
///
/// # Example
///
/// ```ignore
/// struct Double;
///
/// #[async_trait]
/// impl Operation for Double {
///     type Params = i64;
///     type Output = i64;
///
///     fn name(&self) -> &str { "double" }
///     fn version(&self) -> i64 { 1 }
///
///     async fn execute(&self, x: &i64) -> Result<i64, ExecutionError> {
///         Ok(x * 2)
///     }
/// }
/// ```
///
/// # Failure Isolation
///
/// Bulk calls are fail-fast: one `execute` error aborts the whole call.
/// An operation that wants per-item isolation can catch its own errors and
/// make them part of the output, e.g. `type Output = Result<Page, String>`,
/// in which case failures are memoized like any other result.
#[async_trait]
pub trait Operation: Send + Sync + 'static {
    type Params: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Stable identifier, part of the cache key.
    fn name(&self) -> &str;

    fn version(&self) -> i64 {
        0
    }

    /// Width of the governor used by bulk calls.
    fn max_concurrency(&self) -> usize {
        1
    }

    /// The actual work.
    async fn execute(&self, params: &Self::Params) -> Result<Self::Output, ExecutionError>;

    fn serialize_params(&self, params: &Self::Params) -> Result<String, CodecError> {
        to_canonical(params, "params")
    }

    fn deserialize_params(&self, encoded: &str) -> Result<Self::Params, CodecError> {
        from_canonical(encoded, "params")
    }

    fn serialize_result(&self, result: &Self::Output) -> Result<String, CodecError> {
        to_canonical(result, "result")
    }

    fn deserialize_result(&self, encoded: &str) -> Result<Self::Output, CodecError> {
        from_canonical(encoded, "result")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Response {
        status: u16,
        body: String,
        headers: BTreeMap<String, String>,
        redirects: Vec<Response>,
    }

    struct Fetch;

    #[async_trait]
    impl Operation for Fetch {
        type Params = String;
        type Output = Response;

        fn name(&self) -> &str {
            "fetch"
        }

        async fn execute(&self, url: &String) -> Result<Response, ExecutionError> {
            Ok(Response {
                status: 200,
                body: url.clone(),
                headers: BTreeMap::new(),
                redirects: vec![],
            })
        }
    }

    /// Stores params as plain text instead of JSON.
    struct Plain;

    #[async_trait]
    impl Operation for Plain {
        type Params = String;
        type Output = String;

        fn name(&self) -> &str {
            "plain"
        }

        fn version(&self) -> i64 {
            3
        }

        fn max_concurrency(&self) -> usize {
            8
        }

        async fn execute(&self, params: &String) -> Result<String, ExecutionError> {
            Ok(params.to_uppercase())
        }

        fn serialize_params(&self, params: &String) -> Result<String, CodecError> {
            Ok(params.clone())
        }

        fn deserialize_params(&self, encoded: &str) -> Result<String, CodecError> {
            Ok(encoded.to_string())
        }
    }

    #[test]
    fn test_defaults() {
        assert_eq!(Fetch.version(), 0);
        assert_eq!(Fetch.max_concurrency(), 1);
        assert_eq!(Plain.version(), 3);
        assert_eq!(Plain.max_concurrency(), 8);
    }

    #[test]
    fn test_custom_param_encoding() {
        assert_eq!(Plain.serialize_params(&"a b".to_string()).unwrap(), "a b");
        assert_eq!(Fetch.serialize_params(&"a b".to_string()).unwrap(), "\"a b\"");
    }

    #[test]
    fn test_default_params_roundtrip() {
        let url = "https://example.com/?q=\"quoted\"".to_string();
        let encoded = Fetch.serialize_params(&url).unwrap();
        assert_eq!(Fetch.deserialize_params(&encoded).unwrap(), url);
        assert_eq!(Plain.deserialize_params("a b").unwrap(), "a b");

        let err = Fetch.deserialize_params("not json").unwrap_err();
        assert!(matches!(err, CodecError::Deserialize { what: "params", .. }));
    }

    #[test]
    fn test_corrupt_result_is_an_error() {
        let err = Fetch.deserialize_result("{\"status\":").unwrap_err();
        assert!(matches!(err, CodecError::Deserialize { what: "result", .. }));
    }

    fn response_strategy() -> impl Strategy<Value = Response> {
        let leaf = (
            100u16..600,
            ".{0,40}",
            prop::collection::btree_map("[a-z-]{1,12}", "[ -~]{0,20}", 0..4),
        )
            .prop_map(|(status, body, headers)| Response {
                status,
                body,
                headers,
                redirects: vec![],
            });
        leaf.prop_recursive(2, 8, 3, |inner| {
            (inner.clone(), prop::collection::vec(inner, 0..3)).prop_map(
                |(mut response, redirects)| {
                    response.redirects = redirects;
                    response
                },
            )
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_string_results_roundtrip(value in ".{0,64}") {
            let encoded = Plain.serialize_result(&value).unwrap();
            prop_assert_eq!(Plain.deserialize_result(&encoded).unwrap(), value);
        }

        #[test]
        fn prop_nested_results_roundtrip(response in response_strategy()) {
            let encoded = Fetch.serialize_result(&response).unwrap();
            prop_assert_eq!(Fetch.deserialize_result(&encoded).unwrap(), response);
        }

        #[test]
        fn prop_numeric_results_roundtrip(n in any::<i64>(), k in any::<i32>()) {
            let ints = to_canonical(&n, "result").unwrap();
            prop_assert_eq!(from_canonical::<i64>(&ints, "result").unwrap(), n);
            let f = f64::from(k) * 0.5;
            let floats = to_canonical(&f, "result").unwrap();
            prop_assert_eq!(from_canonical::<f64>(&floats, "result").unwrap(), f);
        }
    }
}
