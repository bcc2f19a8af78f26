//! Key Codec
//!
//! Turns request descriptors into [`ResourceKey`]s. A bare string is used
//! verbatim; anything else is serialized to canonical JSON, where object
//! members are ordered by name at every nesting level. Two descriptors that
//! differ only in parameter insertion order therefore produce the same key.
//!
//! Text keys and JSON keys never compare equal, even when their text
//! matches: the string `"7"` and the number `7` name different resources.
//!
//! ```
//! use std::collections::HashMap;
//!
//! use arlm_core::key::{KeyCodec, RequestDescriptor};
//!
//! let a = RequestDescriptor::get("/users").param("page", 2).param("sort", "name");
//! let b = RequestDescriptor::get("/users").param("sort", "name").param("page", 2);
//! assert_eq!(KeyCodec::normalize(&a).unwrap(), KeyCodec::normalize(&b).unwrap());
//!
//! let mut query = HashMap::new();
//! query.insert("id", 7);
//! assert_eq!(KeyCodec::normalize(&query).unwrap().as_str(), r#"{"id":7}"#);
//! assert_eq!(KeyCodec::normalize("user:1").unwrap().as_str(), "user:1");
//! assert_ne!(KeyCodec::normalize("7").unwrap(), KeyCodec::normalize(&7).unwrap());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::{ResourceError, ResourceResult};

/// Normalized, cheaply clonable cache key
///
/// Equality covers both the text and whether it came from a bare string or
/// from a structured descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    text: Arc<str>,
    kind: KeyKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum KeyKind {
    Text,
    Json,
}

impl ResourceKey {
    /// The key text: the string itself, or the canonical JSON of a
    /// structured descriptor
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Whether the key was built from a non-string descriptor
    pub fn is_structured(&self) -> bool {
        self.kind == KeyKind::Json
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// A key serializes as the descriptor it came from, so it normalizes back to
// itself.
impl Serialize for ResourceKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.kind {
            KeyKind::Text => serializer.serialize_str(&self.text),
            KeyKind::Json => serde_json::from_str::<Value>(&self.text)
                .map_err(<S::Error as serde::ser::Error>::custom)?
                .serialize(serializer),
        }
    }
}

/// Descriptor -> key normalization
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyCodec;

impl KeyCodec {
    /// Normalize any serializable descriptor into a key
    ///
    /// # Errors
    ///
    /// [`ResourceError::InvalidKey`] when the descriptor cannot be
    /// serialized (non-string map keys, a refusing `Serialize` impl) or is
    /// empty (`null`, `""`).
    pub fn normalize<D>(descriptor: &D) -> ResourceResult<ResourceKey>
    where
        D: Serialize + ?Sized,
    {
        let value = serde_json::to_value(descriptor)
            .map_err(|e| ResourceError::invalid_key(e.to_string()))?;

        let (text, kind) = match value {
            Value::Null => return Err(ResourceError::invalid_key("descriptor is null")),
            Value::String(s) if s.is_empty() => {
                return Err(ResourceError::invalid_key("descriptor is an empty string"))
            }
            Value::String(s) => (s, KeyKind::Text),
            // serde_json::Map keeps members sorted, so this is canonical
            other => (other.to_string(), KeyKind::Json),
        };

        Ok(ResourceKey { text: Arc::from(text), kind })
    }
}

/// URL plus parameters, the usual shape of a fetch descriptor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestDescriptor {
    pub method: String,
    pub url: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
}

impl RequestDescriptor {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self { method: method.into().to_uppercase(), url: url.into(), params: BTreeMap::new() }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    /// Add or replace a parameter
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn key(&self) -> ResourceResult<ResourceKey> {
        KeyCodec::normalize(self)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    #[test]
    fn test_string_descriptor_is_verbatim() {
        let key = KeyCodec::normalize("user:1").expect("valid key");
        assert_eq!(key.as_str(), "user:1");
        assert_eq!(key.to_string(), "user:1");
    }

    #[test]
    fn test_key_normalizes_to_itself() {
        let key = KeyCodec::normalize(&json!({"b": 1, "a": [1, 2]})).expect("valid key");
        let again = KeyCodec::normalize(&key).expect("key re-normalizes");
        assert_eq!(key, again);
        assert!(again.is_structured());

        let text = KeyCodec::normalize("user:1").expect("valid key");
        assert_eq!(KeyCodec::normalize(&text).expect("key re-normalizes"), text);
    }

    /// Validates that a string whose text equals another descriptor's JSON
    /// still names a different resource.
    #[test]
    fn test_strings_never_collide_with_structured_keys() {
        let text = KeyCodec::normalize("7").expect("valid key");
        let number = KeyCodec::normalize(&7u32).expect("valid key");
        assert_eq!(text.as_str(), number.as_str());
        assert_ne!(text, number);
        assert!(!text.is_structured());
        assert!(number.is_structured());

        let json_text = KeyCodec::normalize(r#"{"id":7}"#).expect("valid key");
        let map = KeyCodec::normalize(&json!({"id": 7})).expect("valid key");
        assert_ne!(json_text, map);
    }

    /// Validates that nested objects are ordered regardless of insertion
    /// order.
    #[test]
    fn test_nested_members_are_sorted() {
        let mut first = HashMap::new();
        first.insert("z", json!({"y": 1, "x": 2}));
        first.insert("a", json!(null));

        let key = KeyCodec::normalize(&first).expect("valid key");
        assert_eq!(key.as_str(), r#"{"a":null,"z":{"x":2,"y":1}}"#);
    }

    #[test]
    fn test_descriptor_param_order_is_irrelevant() {
        let a = RequestDescriptor::get("/search").param("q", "rust").param("limit", 10);
        let b = RequestDescriptor::new("get", "/search").param("limit", 10).param("q", "rust");

        let post = RequestDescriptor::post("/search").param("q", "rust").param("limit", 10);
        assert_eq!(a.key().expect("key a"), b.key().expect("key b"));
        assert_ne!(a.key().expect("key a"), post.key().expect("key post"));
    }

    #[test]
    fn test_empty_descriptors_are_rejected() {
        assert!(matches!(KeyCodec::normalize(""), Err(ResourceError::InvalidKey { .. })));
        assert!(matches!(KeyCodec::normalize(&()), Err(ResourceError::InvalidKey { .. })));
        assert!(matches!(
            KeyCodec::normalize(&Option::<u32>::None),
            Err(ResourceError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_non_string_map_keys_are_rejected() {
        let mut map = HashMap::new();
        map.insert((1, 2), "pair");
        let err = KeyCodec::normalize(&map).expect_err("tuple keys cannot be serialized");
        assert!(matches!(err, ResourceError::InvalidKey { .. }));
    }

    struct Opaque;

    impl Serialize for Opaque {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("opaque handle"))
        }
    }

    #[test]
    fn test_refusing_serializer_is_rejected() {
        let err = KeyCodec::normalize(&Opaque).expect_err("opaque descriptor");
        assert!(err.to_string().contains("opaque handle"));
    }
}
