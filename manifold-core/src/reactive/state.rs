//! State Cell Implementation
//!
//! A state cell is the observable value holder. It owns a [`Value`] tree and
//! a [`DependencyTable`] recording which effects read which paths of it.
//!
//! # How State Cells Work
//!
//! 1. Reads go through [`State::value`] (navigation, see [`Tracked`]) or
//!    [`State::get`] (snapshot). Inside a running effect each read records a
//!    tracking key; outside any effect a read is pure.
//!
//! 2. A write first compares old and new with deep equality. An equal write
//!    is a no-op: nothing is stored and nothing is triggered.
//!
//! 3. Otherwise the value is stored, the dependency table is asked which
//!    effects the write invalidates, and those are handed to the runtime,
//!    which queues and flushes them.
//!
//! # Computed Cells
//!
//! A computed cell is a state cell with a derivation effect attached. Its
//! value can only be written by that effect; what happens to other writes is
//! decided by [`ComputedWritePolicy`](crate::config::ComputedWritePolicy).
//! Dropping the last handle to a computed cell disposes its derivation.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use super::effect::{Disposer, EffectInner};
use super::runtime::{Runtime, RuntimeInner};
use super::tracked::Tracked;
use crate::config::ComputedWritePolicy;
use crate::error::{Error, Result};
use crate::graph::{CellId, DependencyTable, EffectId, KeyScope, TrackingKey};
use crate::value::{is_equal, resolve, KeyPath, PathSegment, Slot, Value};

/// Handle to a state cell. Cloning yields another handle to the same cell.
///
/// # Example
///
/// ```rust
/// use manifold_core::reactive::Runtime;
/// use serde_json::json;
///
/// let rt = Runtime::new();
/// let store = rt.state(json!({ "user": { "name": "Alice", "age": 25 } }));
///
/// let name = store.value().at("user").at("name");
/// assert_eq!(name.get().as_str(), Some("Alice"));
///
/// store.value().at("user").set("name", "Bob").unwrap();
/// assert_eq!(name.get().as_str(), Some("Bob"));
/// ```
#[derive(Clone)]
pub struct State {
    pub(crate) inner: Rc<CellInner>,
}

pub(crate) struct CellInner {
    id: CellId,
    name: String,
    value: RefCell<Value>,
    deps: RefCell<DependencyTable>,
    /// Internal effect of a computed cell.
    derivation: Cell<Option<EffectId>>,
    runtime: Weak<RuntimeInner>,
}

impl Drop for CellInner {
    fn drop(&mut self) {
        if let (Some(effect), Some(runtime)) = (self.derivation.get(), self.runtime.upgrade()) {
            runtime.dispose_effect(effect);
        }
    }
}

/// Who is writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Writer {
    Caller,
    Derivation,
}

/// How the shallow subscribers of the written path are selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    Assign,
    /// An array method rewrote the array at the written path. Effects whose
    /// last read inside it still resolves the same are not re-run through it.
    ArrayMethod,
}

impl State {
    pub(crate) fn new_in(runtime: &Rc<RuntimeInner>, value: Value, name: Option<String>) -> Self {
        let named = name.is_some();
        let name = name.unwrap_or_else(|| runtime.generate_name());
        let state = Self {
            inner: Rc::new(CellInner {
                id: CellId::new(),
                name,
                value: RefCell::new(value),
                deps: RefCell::new(DependencyTable::new()),
                derivation: Cell::new(None),
                runtime: Rc::downgrade(runtime),
            }),
        };
        if named {
            runtime.register_name(state.name(), state.clone());
        }
        trace!(cell = %state.inner.id, name = %state.inner.name, "state created");
        state
    }

    pub(crate) fn downgrade(&self) -> Weak<CellInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Rc<CellInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn set_derivation(&self, effect: EffectId) {
        self.inner.derivation.set(Some(effect));
    }

    pub fn id(&self) -> CellId {
        self.inner.id
    }

    /// The registry name, explicit or generated (`state-<n>`).
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_computed(&self) -> bool {
        self.inner.derivation.get().is_some()
    }

    /// The runtime this cell belongs to, if it is still alive.
    pub fn runtime(&self) -> Option<Runtime> {
        self.inner.runtime.upgrade().map(Runtime::from_inner)
    }

    /// Tracked view of the root. Tracks the root key only; nested reads
    /// through the view track their own paths.
    pub fn value(&self) -> Tracked {
        let root = KeyPath::root();
        self.track(&root, KeyScope::Shallow);
        Tracked::new(self.clone(), root)
    }

    /// Snapshot of the whole value. Any later change anywhere in the cell
    /// invalidates the reader.
    pub fn get(&self) -> Value {
        self.track(&KeyPath::root(), KeyScope::Deep);
        self.get_untracked()
    }

    /// Snapshot of the whole value without tracking.
    pub fn get_untracked(&self) -> Value {
        self.inner.value.borrow().clone()
    }

    /// Replace the whole value. Returns whether anything changed.
    pub fn set(&self, value: impl Into<Value>) -> Result<bool> {
        self.write_as(Writer::Caller, &KeyPath::root(), value.into())
    }

    /// Replace the value with `f(current)`. The read is not tracked. `f`
    /// sees a snapshot, so it may read or write the cell itself.
    pub fn update<V, F>(&self, f: F) -> Result<bool>
    where
        V: Into<Value>,
        F: FnOnce(&Value) -> V,
    {
        let current = self.get_untracked();
        let next = f(&current).into();
        self.set(next)
    }

    /// Register an effect in this cell's runtime.
    pub fn effect<F>(&self, body: F) -> Disposer
    where
        F: FnMut() + 'static,
    {
        match self.runtime() {
            Some(runtime) => runtime.effect(body),
            None => {
                let effect = Rc::new(EffectInner::new(body));
                effect.stop();
                Disposer::new(effect, Weak::new())
            }
        }
    }

    /// Number of distinct effects subscribed to any key of this cell.
    pub fn subscriber_count(&self) -> usize {
        self.inner.deps.borrow().subscriber_count()
    }

    /// Number of distinct keys of this cell with at least one subscriber.
    pub fn key_count(&self) -> usize {
        self.inner.deps.borrow().key_count()
    }

    /// Whether two handles refer to the same cell.
    pub fn ptr_eq(&self, other: &State) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------------

    /// Subscribe the tracking effect, if any, to `path`.
    pub(crate) fn track(&self, path: &KeyPath, scope: KeyScope) {
        let Some(runtime) = self.inner.runtime.upgrade() else {
            return;
        };
        let key = TrackingKey::new(self.inner.id, path.clone(), scope);
        let Some(effect) = runtime.record_read(&key) else {
            return;
        };

        let effect_id = effect.id();
        let added = self
            .inner
            .deps
            .borrow_mut()
            .subscribe(key.path.clone(), scope, effect_id);
        if !added {
            return;
        }

        trace!(%key, effect = %effect_id, "track");
        let cell = self.downgrade();
        effect.add_cleanup(Box::new(move || {
            if let Some(cell) = cell.upgrade() {
                cell.deps
                    .borrow_mut()
                    .unsubscribe(&key.path, key.scope, effect_id);
            }
        }));
    }

    /// Run `f` on the current value without tracking.
    pub(crate) fn peek<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Whether `writer` may write. `Ok(false)` means the write is ignored.
    fn writable(&self, writer: Writer) -> Result<bool> {
        if writer == Writer::Derivation || !self.is_computed() {
            return Ok(true);
        }
        let policy = self
            .inner
            .runtime
            .upgrade()
            .map(|runtime| runtime.config().computed_writes)
            .unwrap_or_default();
        match policy {
            ComputedWritePolicy::Ignore => {
                debug!(name = %self.inner.name, "ignoring write to computed state");
                Ok(false)
            }
            ComputedWritePolicy::Reject => Err(Error::ComputedWrite {
                name: self.inner.name.clone(),
            }),
        }
    }

    /// Store `value` at `path` and trigger what it invalidates.
    ///
    /// Intermediate segments must exist. The last segment may name a new
    /// object field or map entry, or the index one past the end of an array.
    pub(crate) fn write_as(&self, writer: Writer, path: &KeyPath, value: Value) -> Result<bool> {
        if !self.writable(writer)? {
            return Ok(false);
        }

        let (old, resized) = {
            let mut root = self.inner.value.borrow_mut();
            match path.split_last() {
                None if is_equal(&root, &value) => return Ok(false),
                None => (mem::replace(&mut *root, value), false),
                Some((last, parents)) => {
                    let parent = node_mut(&mut root, parents)?;
                    match assign(parent, parents, last, value)? {
                        Some(replaced) => replaced,
                        None => return Ok(false),
                    }
                }
            }
        };

        self.invalidate(path, &old, resized, Origin::Assign);
        Ok(true)
    }

    /// Delete the child at `path`. Returns the removed value.
    pub(crate) fn remove_at(&self, path: &KeyPath) -> Result<Option<Value>> {
        if !self.writable(Writer::Caller)? {
            return Ok(None);
        }
        let Some((last, parents)) = path.split_last() else {
            return Err(Error::TypeMismatch {
                expected: "a child path",
                found: "the root",
            });
        };

        let removed = {
            let mut root = self.inner.value.borrow_mut();
            let parent = node_mut(&mut root, parents)?;
            match (parent, last) {
                (Value::Object(fields), PathSegment::Key(key)) => fields.shift_remove(key.as_str()),
                (Value::Map(entries), PathSegment::Entry(key)) => entries.shift_remove(key),
                (Value::Array(_), PathSegment::Index(_)) => {
                    return Err(Error::TypeMismatch {
                        expected: "a field or map entry",
                        found: "an array index (use splice)",
                    })
                }
                (node, segment) => return Err(mismatch(node, parents, segment)),
            }
        };

        if let Some(old) = &removed {
            self.invalidate(path, old, true, Origin::Assign);
        }
        Ok(removed)
    }

    /// Apply an in-place container operation to the node at `path`.
    ///
    /// The node is snapshotted first; if the operation leaves it deep-equal
    /// to the snapshot nothing is triggered. Array operations select shallow
    /// subscribers with [`Origin::ArrayMethod`].
    ///
    /// `op` runs while the cell is mutably borrowed, so it must not read the
    /// cell itself. Returns `None` when the write is ignored because the cell
    /// is computed.
    pub(crate) fn mutate<R, F>(&self, path: &KeyPath, op: F) -> Result<Option<R>>
    where
        F: FnOnce(&mut Value) -> Result<R>,
    {
        if !self.writable(Writer::Caller)? {
            return Ok(None);
        }

        let (result, old, origin) = {
            let mut root = self.inner.value.borrow_mut();
            let node = node_mut(&mut root, path)?;
            let old = node.clone();
            let result = op(node)?;
            if is_equal(&old, node) {
                return Ok(Some(result));
            }
            let origin = match (&old, &*node) {
                (Value::Array(_), Value::Array(_)) => Origin::ArrayMethod,
                _ => Origin::Assign,
            };
            (result, old, origin)
        };

        self.invalidate(path, &old, false, origin);
        Ok(Some(result))
    }

    /// Queue every effect invalidated by a write at `at` that replaced `old`.
    fn invalidate(&self, at: &KeyPath, old: &Value, resized: bool, origin: Origin) {
        let Some(runtime) = self.inner.runtime.upgrade() else {
            return;
        };

        let null = Value::Null;
        let invalidated = {
            let root = self.inner.value.borrow();
            let new = match resolve(&root, at) {
                Some(Slot::Value(node)) => node,
                _ => &null,
            };
            let deps = self.inner.deps.borrow();
            let array = TrackingKey::new(self.inner.id, at.clone(), KeyScope::Shallow);

            let mut hit = deps.invalidated(at, old, new, |effect| match origin {
                Origin::Assign => true,
                Origin::ArrayMethod => !runtime.last_read_unchanged(effect, &array, old, new),
            });
            if resized {
                if let Some(parent) = at.parent() {
                    hit.extend(deps.subscribers(&parent.child(PathSegment::Length), KeyScope::Shallow));
                }
            }
            hit
        };

        trace!(
            cell = %self.inner.name,
            path = %at,
            effects = invalidated.len(),
            "trigger"
        );
        runtime.notify(invalidated);
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("State");
        s.field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("computed", &self.is_computed());
        match self.inner.value.try_borrow() {
            Ok(value) => s.field("value", &*value),
            Err(_) => s.field("value", &"<borrowed>"),
        };
        s.finish()
    }
}

/// Walk to the node at `segments`, failing on the first missing step.
fn node_mut<'a>(root: &'a mut Value, segments: &[PathSegment]) -> Result<&'a mut Value> {
    let mut node = root;
    for (depth, segment) in segments.iter().enumerate() {
        node = node.child_mut(segment).ok_or_else(|| Error::MissingPath {
            path: segments[..=depth].iter().cloned().collect(),
        })?;
    }
    Ok(node)
}

/// Write one child. Returns the replaced value and whether the parent gained
/// a child, or `None` for an equal write.
fn assign(
    parent: &mut Value,
    parent_path: &[PathSegment],
    segment: &PathSegment,
    value: Value,
) -> Result<Option<(Value, bool)>> {
    match (parent, segment) {
        (Value::Object(fields), PathSegment::Key(key)) => Ok(match fields.get_mut(key.as_str()) {
            Some(slot) => replace_slot(slot, value),
            None => {
                fields.insert(key.clone(), value);
                Some((Value::Null, true))
            }
        }),
        (Value::Map(entries), PathSegment::Entry(key)) => Ok(match entries.get_mut(key) {
            Some(slot) => replace_slot(slot, value),
            None => {
                entries.insert(key.clone(), value);
                Some((Value::Null, true))
            }
        }),
        (Value::Array(items), PathSegment::Index(index)) => {
            let (index, len) = (*index, items.len());
            if index < len {
                Ok(replace_slot(&mut items[index], value))
            } else if index == len {
                items.push(value);
                Ok(Some((Value::Null, true)))
            } else {
                Err(Error::IndexOutOfBounds { index, len })
            }
        }
        (node, segment) => Err(mismatch(node, parent_path, segment)),
    }
}

fn replace_slot(slot: &mut Value, value: Value) -> Option<(Value, bool)> {
    if is_equal(slot, &value) {
        None
    } else {
        Some((mem::replace(slot, value), false))
    }
}

/// Error for a segment that does not address `node`.
fn mismatch(node: &Value, path: &[PathSegment], segment: &PathSegment) -> Error {
    let expected = match node {
        Value::Object(_) => "a field name",
        Value::Array(_) => "an index",
        Value::Map(_) => "a map key",
        _ => {
            return Error::NotContainer {
                path: path.iter().cloned().collect(),
                kind: node.kind(),
            }
        }
    };
    let found = match segment {
        PathSegment::Key(_) => "a field name",
        PathSegment::Index(_) => "an index",
        PathSegment::Entry(_) => "a map key",
        PathSegment::Length => "length",
    };
    Error::TypeMismatch { expected, found }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
