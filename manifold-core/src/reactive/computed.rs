//! Computed Cell Implementation
//!
//! A computed cell is a state cell whose value is derived by a function. It
//! is a thin composition of the two other primitives: a [`State`] to hold
//! the derived value and one internal effect that re-derives and writes it.
//!
//! # How Computed Cells Work
//!
//! 1. On construction the internal effect runs once, so the value is settled
//!    before the constructor returns.
//!
//! 2. The effect reads whatever the derivation reads, so it is invalidated
//!    whenever an upstream cell changes. Chains of computed cells compose the
//!    same way.
//!
//! 3. A re-derived value is written only if it differs from the stored one,
//!    and the write itself is equality-gated again. A computed cell that
//!    settles on an unchanged result triggers nothing downstream.
//!
//! Unlike lazily evaluated memos, derivation is eager: it happens as part of
//! the flush that invalidated it, not on the next read.

use std::rc::Rc;

use tracing::{debug, trace};

use super::effect::EffectInner;
use super::runtime::Runtime;
use super::state::{State, Writer};
use crate::graph::EffectId;
use crate::value::{is_equal, KeyPath, Value};

impl Runtime {
    /// Create an anonymous computed cell.
    ///
    /// # Example
    ///
    /// ```rust
    /// use manifold_core::reactive::Runtime;
    ///
    /// let rt = Runtime::new();
    /// let base = rt.state(5);
    ///
    /// let b = base.clone();
    /// let doubled = rt.computed(move || b.get().as_f64().unwrap_or(0.0) * 2.0);
    /// assert_eq!(doubled.get().as_i64(), Some(10));
    ///
    /// base.set(10).unwrap();
    /// assert_eq!(doubled.get().as_i64(), Some(20));
    /// ```
    pub fn computed<F, V>(&self, derive: F) -> State
    where
        F: FnMut() -> V + 'static,
        V: Into<Value>,
    {
        self.derive(None, derive)
    }

    /// Create a named computed cell and register it.
    pub fn computed_named<F, V>(&self, name: impl Into<String>, derive: F) -> State
    where
        F: FnMut() -> V + 'static,
        V: Into<Value>,
    {
        self.derive(Some(name.into()), derive)
    }

    fn derive<F, V>(&self, name: Option<String>, mut derive: F) -> State
    where
        F: FnMut() -> V + 'static,
        V: Into<Value>,
    {
        let runtime = self.inner();
        let cell = State::new_in(runtime, Value::Null, name);
        let id = EffectId::new();
        cell.set_derivation(id);

        // The effect must not keep its own cell alive.
        let weak = cell.downgrade();
        let effect = Rc::new(EffectInner::with_id(id, move || {
            let Some(cell) = weak.upgrade().map(State::from_inner) else {
                return;
            };

            let next = derive().into();
            if cell.peek(|current| is_equal(current, &next)) {
                trace!(cell = %cell.name(), "derived value unchanged");
                return;
            }
            if let Err(err) = cell.write_as(Writer::Derivation, &KeyPath::root(), next) {
                debug!(cell = %cell.name(), error = %err, "derived write failed");
            }
        }));

        runtime.insert_effect(effect.clone());
        debug!(cell = %cell.name(), effect = %id, "computed state created");
        runtime.run_immediate(&effect);
        cell
    }
}

/// Create an anonymous computed cell in the thread's default runtime.
pub fn computed<F, V>(derive: F) -> State
where
    F: FnMut() -> V + 'static,
    V: Into<Value>,
{
    Runtime::current().computed(derive)
}

/// Create a named computed cell in the thread's default runtime.
pub fn computed_named<F, V>(name: impl Into<String>, derive: F) -> State
where
    F: FnMut() -> V + 'static,
    V: Into<Value>,
{
    Runtime::current().computed_named(name, derive)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
