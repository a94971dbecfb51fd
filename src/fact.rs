//! Facts: identity-bearing units of data asserted into a session.
//!
//! A [`Fact`] pairs an immutable [`FactId`] and [`FactType`] with a set of
//! attributes. Attributes are replaced wholesale on update, never patched in
//! place, so the network can always compare an old and a new version of the
//! same fact.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::num::NonZeroU64;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Stable identity of a fact across updates.
///
/// Uses `NonZeroU64` so that `Option<FactId>` is the same size as `FactId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FactId(NonZeroU64);

impl FactId {
    /// Create a `FactId` from a raw `u64`.
    ///
    /// Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(FactId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for FactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fact:{}", self.0)
    }
}

/// Runtime type tag of a fact. Alpha nodes dispatch on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactType(String);

impl FactType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FactType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl std::fmt::Display for FactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An attribute value. Also used as the key type for join indexes and groups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

// Floats compare by bit pattern so values can key hash maps.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

/// Attribute map of a fact, ordered by name for stable display.
pub type Attributes = BTreeMap<String, Value>;

/// An identity-addressed value of some runtime type.
///
/// Cloning is cheap: attributes are shared behind an `Arc` and replaced as a
/// whole by [`Fact::with`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: FactId,
    #[serde(rename = "type")]
    pub fact_type: FactType,
    #[serde(default)]
    attributes: Arc<Attributes>,
}

impl Fact {
    pub fn new(id: FactId, fact_type: impl Into<FactType>) -> Self {
        Self {
            id,
            fact_type: fact_type.into(),
            attributes: Arc::new(Attributes::new()),
        }
    }

    /// Return a copy of this fact with one attribute set.
    ///
    /// Identity and type are preserved; the attribute map is copied, so the
    /// original stays untouched. This is how callers prepare an update.
    pub fn with(&self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut attributes = (*self.attributes).clone();
        attributes.insert(name.into(), value.into());
        Self {
            id: self.id,
            fact_type: self.fact_type.clone(),
            attributes: Arc::new(attributes),
        }
    }

    /// Read an attribute, `Value::Null` when absent.
    pub fn get(&self, name: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.attributes.get(name).unwrap_or(&NULL)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

impl From<FactType> for String {
    fn from(t: FactType) -> Self {
        t.0
    }
}

impl From<String> for FactType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn id(raw: u64) -> FactId {
        FactId::new(raw).unwrap()
    }

    #[test]
    fn fact_id_rejects_zero() {
        assert!(FactId::new(0).is_none());
        assert_eq!(FactId::new(7).unwrap().get(), 7);
        assert_eq!(std::mem::size_of::<Option<FactId>>(), 8);
    }

    #[test]
    fn with_preserves_identity_and_original() {
        let original = Fact::new(id(1), "Order").with("status", "open");
        let changed = original.with("status", "closed");

        assert_eq!(changed.id, original.id);
        assert_eq!(changed.fact_type, original.fact_type);
        assert_eq!(original.get("status"), &Value::from("open"));
        assert_eq!(changed.get("status"), &Value::from("closed"));
        assert!(changed.get("missing").is_null());
    }

    #[test]
    fn values_hash_consistently() {
        let mut set = HashSet::new();
        set.insert(Value::from("a"));
        set.insert(Value::Float(1.5));
        set.insert(Value::Int(1));

        assert!(set.contains(&Value::from("a")));
        assert!(set.contains(&Value::Float(1.5)));
        assert!(!set.contains(&Value::Float(1.0)));
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn fact_json_shape() {
        let json = r#"{"id": 3, "type": "FactType1", "attributes": {"TestProperty": "Valid Value 1", "n": 4}}"#;
        let fact: Fact = serde_json::from_str(json).unwrap();
        assert_eq!(fact.id, id(3));
        assert_eq!(fact.fact_type.as_str(), "FactType1");
        assert_eq!(fact.get("TestProperty").as_str(), Some("Valid Value 1"));
        assert_eq!(fact.get("n").as_int(), Some(4));
    }
}
