//! Structural Equality
//!
//! Every state-cell write is gated by [`is_equal`]: a write whose new value
//! is deep-equal to the old one is dropped before it can invalidate
//! anything. The predicate is on the hot path, so it compares lengths and
//! sizes before recursing and never allocates.
//!
//! # Rules
//!
//! - Numbers compare by value, so `NaN` is never equal to itself.
//! - Different variants are unequal.
//! - Arrays: same length, pairwise equal elements.
//! - Dates: same instant. Buffers: same bytes.
//! - Maps: same size, every key of `a` maps to an equal value in `b`.
//! - Sets: same size, every element of `a` has an equal element in `b`.
//! - Objects: same key set, equal values per key (key order is ignored).
//! - Functions and pending values: identity only.
//!
//! Values are owned trees (see the [module docs](super)), so recursion is
//! bounded by the depth of the inputs and no visited-set is needed.

use super::Value;

/// Deep structural equality between two values.
pub fn is_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Date(x), Value::Date(y)) => x == y,
        (Value::Bytes(x), Value::Bytes(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| is_equal(l, r))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| is_equal(v, w)))
        }
        (Value::Set(x), Value::Set(y)) => {
            x.len() == y.len() && x.iter().all(|v| y.iter().any(|w| is_equal(v, w)))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| is_equal(v, w)))
        }
        (Value::Function(x), Value::Function(y)) => x.ptr_eq(y),
        (Value::Pending(x), Value::Pending(y)) => x.ptr_eq(y),
        _ => false,
    }
}
