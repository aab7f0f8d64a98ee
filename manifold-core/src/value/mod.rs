//! Value Model
//!
//! State cells hold arbitrary nested data. Rather than inspecting runtime
//! type tags on every comparison, data is classified once, when it enters
//! the system, into the closed [`Value`] enumeration.
//!
//! # Ownership
//!
//! Values are owned trees. Composite nodes never alias one another, so a
//! value cannot contain itself and the recursive equality predicate always
//! terminates. The only shared handles are [`Function`] and [`Pending`],
//! which are compared by identity and never descended into.
//!
//! # Conversions
//!
//! Most fixtures are built with `serde_json::json!` and converted with
//! `Value::from`. Going the other way, [`Value::to_json`] produces a JSON
//! snapshot (opaque handles become `null`).

mod equality;
mod path;

pub use equality::is_equal;
pub use path::{resolve, unchanged_at, KeyPath, PathSegment, Slot};

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};

/// A dynamically typed value stored in a state cell.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// Absence of a value. Computed cells hold this until their first run.
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// A point in time as milliseconds since the Unix epoch.
    Date(i64),
    /// A binary buffer, compared byte for byte.
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    /// Insertion-ordered map with primitive keys.
    Map(IndexMap<MapKey, Value>),
    /// Insertion-ordered set deduplicated by deep equality.
    Set(ValueSet),
    /// Plain record with string keys, in insertion order.
    Object(IndexMap<String, Value>),
    /// Opaque callable, equal only to itself.
    Function(Function),
    /// Unresolved asynchronous result, equal only to itself.
    Pending(Pending),
}

impl Value {
    /// Build an object from key/value pairs.
    pub fn object<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build an array from items.
    pub fn array<V, I>(items: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Value::Array(items.into_iter().map(Into::into).collect())
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "a boolean",
            Value::Number(_) => "a number",
            Value::String(_) => "a string",
            Value::Date(_) => "a date",
            Value::Bytes(_) => "a byte buffer",
            Value::Array(_) => "an array",
            Value::Map(_) => "a map",
            Value::Set(_) => "a set",
            Value::Object(_) => "an object",
            Value::Function(_) => "a function",
            Value::Pending(_) => "a pending value",
        }
    }

    /// Composite values are compared structurally and diffed key by key
    /// when replaced. Everything else is compared by identity or primitive
    /// equality.
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            Value::Date(_)
                | Value::Bytes(_)
                | Value::Array(_)
                | Value::Map(_)
                | Value::Set(_)
                | Value::Object(_)
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The number as an integer, if it has no fractional part.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Element count for containers, strings and buffers.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::String(s) => Some(s.chars().count()),
            Value::Bytes(b) => Some(b.len()),
            Value::Array(items) => Some(items.len()),
            Value::Map(entries) => Some(entries.len()),
            Value::Set(set) => Some(set.len()),
            Value::Object(fields) => Some(fields.len()),
            _ => None,
        }
    }

    /// Child addressed by a single path segment.
    pub fn child(&self, segment: &PathSegment) -> Option<&Value> {
        match (self, segment) {
            (Value::Object(fields), PathSegment::Key(key)) => fields.get(key.as_str()),
            (Value::Array(items), PathSegment::Index(index)) => items.get(*index),
            (Value::Map(entries), PathSegment::Entry(key)) => entries.get(key),
            _ => None,
        }
    }

    /// Mutable child addressed by a single path segment.
    pub fn child_mut(&mut self, segment: &PathSegment) -> Option<&mut Value> {
        match (self, segment) {
            (Value::Object(fields), PathSegment::Key(key)) => fields.get_mut(key.as_str()),
            (Value::Array(items), PathSegment::Index(index)) => items.get_mut(*index),
            (Value::Map(entries), PathSegment::Entry(key)) => entries.get_mut(key),
            _ => None,
        }
    }

    /// Convert to a JSON snapshot.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Value::Null | Value::Function(_) | Value::Pending(_) => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) if is_integral(*n) => Json::from(*n as i64),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::Date(millis) => Json::from(*millis),
            Value::Bytes(bytes) => Json::Array(bytes.iter().map(|b| Json::from(*b)).collect()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Set(set) => Json::Array(set.iter().map(Value::to_json).collect()),
            Value::Map(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
            Value::Object(fields) => Json::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

/// Finite, whole and within `i64` range. `-0.0` stays a float so its sign
/// survives the snapshot.
fn is_integral(n: f64) -> bool {
    n.fract() == 0.0
        && n >= i64::MIN as f64
        && n < i64::MAX as f64
        && !(n == 0.0 && n.is_sign_negative())
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        is_equal(self, other)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Json::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

macro_rules! impl_from_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(n: $ty) -> Self {
                    Value::Number(n as f64)
                }
            }
        )*
    };
}

impl_from_number!(i32, i64, u32, u64, usize, f32, f64);

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::array(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<ValueSet> for Value {
    fn from(set: ValueSet) -> Self {
        Value::Set(set)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

impl From<Pending> for Value {
    fn from(p: Pending) -> Self {
        Value::Pending(p)
    }
}

// ----------------------------------------------------------------------------
// Map keys
// ----------------------------------------------------------------------------

/// Key of a [`Value::Map`].
///
/// Keys are primitives compared the way a JavaScript `Map` compares them:
/// `-0` and `0` are the same key, and `NaN` is equal to itself.
#[derive(Clone, Debug)]
pub enum MapKey {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl MapKey {
    fn number_bits(n: f64) -> u64 {
        if n == 0.0 {
            0.0f64.to_bits()
        } else if n.is_nan() {
            f64::NAN.to_bits()
        } else {
            n.to_bits()
        }
    }
}

impl PartialEq for MapKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MapKey::Null, MapKey::Null) => true,
            (MapKey::Bool(a), MapKey::Bool(b)) => a == b,
            (MapKey::Number(a), MapKey::Number(b)) => {
                Self::number_bits(*a) == Self::number_bits(*b)
            }
            (MapKey::String(a), MapKey::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for MapKey {}

impl Hash for MapKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            MapKey::Null => {}
            MapKey::Bool(b) => b.hash(state),
            MapKey::Number(n) => Self::number_bits(*n).hash(state),
            MapKey::String(s) => s.hash(state),
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Null => f.write_str("null"),
            MapKey::Bool(b) => write!(f, "{b}"),
            MapKey::Number(n) => write!(f, "{n}"),
            MapKey::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MapKey {
    fn from(s: &str) -> Self {
        MapKey::String(s.to_owned())
    }
}

impl From<String> for MapKey {
    fn from(s: String) -> Self {
        MapKey::String(s)
    }
}

impl From<bool> for MapKey {
    fn from(b: bool) -> Self {
        MapKey::Bool(b)
    }
}

impl From<f64> for MapKey {
    fn from(n: f64) -> Self {
        MapKey::Number(n)
    }
}

impl From<i64> for MapKey {
    fn from(n: i64) -> Self {
        MapKey::Number(n as f64)
    }
}

impl From<i32> for MapKey {
    fn from(n: i32) -> Self {
        MapKey::Number(n as f64)
    }
}

impl From<MapKey> for Value {
    fn from(key: MapKey) -> Self {
        match key {
            MapKey::Null => Value::Null,
            MapKey::Bool(b) => Value::Bool(b),
            MapKey::Number(n) => Value::Number(n),
            MapKey::String(s) => Value::String(s),
        }
    }
}

// ----------------------------------------------------------------------------
// Sets
// ----------------------------------------------------------------------------

/// Insertion-ordered collection of distinct values.
#[derive(Clone, Debug, Default)]
pub struct ValueSet(Vec<Value>);

impl ValueSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert `value` unless a deep-equal value is already present.
    /// Returns whether the set changed.
    pub fn insert(&mut self, value: Value) -> bool {
        if self.contains(&value) {
            return false;
        }
        self.0.push(value);
        true
    }

    /// Remove the element deep-equal to `value`, if any.
    pub fn remove(&mut self, value: &Value) -> bool {
        match self.0.iter().position(|v| is_equal(v, value)) {
            Some(index) => {
                self.0.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.0.iter().any(|v| is_equal(v, value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }
}

impl<V: Into<Value>> FromIterator<V> for ValueSet {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        let mut set = ValueSet::new();
        for value in iter {
            set.insert(value.into());
        }
        set
    }
}

// ----------------------------------------------------------------------------
// Opaque handles
// ----------------------------------------------------------------------------

/// A callable stored inside state. Equal only to clones of itself.
#[derive(Clone)]
pub struct Function(Rc<dyn Fn(&[Value]) -> Value>);

impl Function {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + 'static,
    {
        Self(Rc::new(f))
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.0)(args)
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({:p})", Rc::as_ptr(&self.0))
    }
}

/// A slot for an asynchronous result that has not arrived yet.
///
/// Pending values are stored and returned as-is: the engine never looks
/// inside them, and a pending value is equal only to clones of itself.
#[derive(Clone, Default)]
pub struct Pending(Rc<RefCell<Option<Value>>>);

impl Pending {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill the slot. Resolving does not notify any effect; store the
    /// result in a state cell for that.
    pub fn resolve(&self, value: Value) {
        *self.0.borrow_mut() = Some(value);
    }

    pub fn is_resolved(&self) -> bool {
        self.0.borrow().is_some()
    }

    /// The resolved value, if any.
    pub fn result(&self) -> Option<Value> {
        self.0.borrow().clone()
    }

    pub fn ptr_eq(&self, other: &Pending) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_round_trip_preserves_shape() {
        let json = json!({ "user": { "name": "Alice", "tags": ["a", "b"] }, "n": 3 });
        let value = Value::from(json.clone());
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn whole_numbers_serialize_as_integers() {
        assert_eq!(Value::from(3).to_json(), json!(3));
        assert_eq!(serde_json::to_string(&Value::from(3)).unwrap(), "3");
        assert_eq!(Value::from(-7.0).to_json(), json!(-7));
        assert_eq!(Value::from(2.5).to_json(), json!(2.5));
        assert_eq!(Value::Number(f64::NAN).to_json(), json!(null));
        assert_eq!(Value::Number(f64::INFINITY).to_json(), json!(null));
        assert_eq!(Value::from(json!({ "n": 3 })).to_json(), json!({ "n": 3 }));
    }

    #[test]
    fn map_keys_use_same_value_zero() {
        let mut map = IndexMap::new();
        map.insert(MapKey::Number(0.0), Value::from(1));
        assert!(map.contains_key(&MapKey::Number(-0.0)));

        map.insert(MapKey::Number(f64::NAN), Value::from(2));
        assert_eq!(map.get(&MapKey::Number(f64::NAN)), Some(&Value::from(2)));
    }

    #[test]
    fn set_deduplicates_structurally() {
        let mut set = ValueSet::new();
        assert!(set.insert(Value::from(json!({ "a": 1 }))));
        assert!(!set.insert(Value::from(json!({ "a": 1 }))));
        assert!(set.insert(Value::from(json!({ "a": 2 }))));
        assert_eq!(set.len(), 2);

        assert!(set.remove(&Value::from(json!({ "a": 1 }))));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn len_counts_chars_and_entries() {
        assert_eq!(Value::from("héllo").len(), Some(5));
        assert_eq!(Value::from(json!([1, 2, 3])).len(), Some(3));
        assert_eq!(Value::from(json!({ "a": 1 })).len(), Some(1));
        assert_eq!(Value::from(7).len(), None);
    }

    #[test]
    fn opaque_values_serialize_as_null() {
        let value = Value::object([("cb", Value::from(Function::new(|_| Value::Null)))]);
        assert_eq!(serde_json::to_string(&value).unwrap(), r#"{"cb":null}"#);
    }

    #[test]
    fn pending_resolves_in_place() {
        let pending = Pending::new();
        let stored = Value::from(pending.clone());
        assert!(!pending.is_resolved());

        pending.resolve(Value::from(42));
        match stored {
            Value::Pending(p) => assert_eq!(p.result(), Some(Value::from(42))),
            other => panic!("expected pending, got {other:?}"),
        }
    }
}
