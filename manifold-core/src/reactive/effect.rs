//! Effect Implementation
//!
//! An Effect is a side-effecting computation that re-runs whenever the state
//! it read changes.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its body immediately to establish its
//!    initial dependencies.
//!
//! 2. Every read inside the body subscribes the effect to a tracking key and
//!    registers a cleanup callback that removes the subscription.
//!
//! 3. Before each re-run, all cleanups from the previous run are invoked, so
//!    dependencies are rebuilt from scratch and may differ run to run.
//!
//! 4. Stopping an effect marks it inactive and invokes its cleanups. A stopped
//!    effect ignores every later invalidation.
//!
//! # Lifecycle
//!
//! constructed -> running (repeatable) -> stopped (terminal)
//!
//! # Ownership
//!
//! The runtime owns its effects. The [`Disposer`] returned to the caller is a
//! handle for stopping and observing the effect; dropping it leaves the
//! effect running, matching the fire-and-forget way effects are registered
//! by the templating layer.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use super::runtime::RuntimeInner;
use crate::graph::EffectId;

type Body = Box<dyn FnMut()>;
type Cleanup = Box<dyn FnOnce()>;

/// Internal state of one effect.
pub(crate) struct EffectInner {
    id: EffectId,

    /// The effect body.
    body: RefCell<Body>,

    /// Cleared by `stop`; never set again.
    active: Cell<bool>,

    /// Set while the body executes.
    running: Cell<bool>,

    /// One per subscription acquired in the last run, plus user cleanups.
    cleanups: RefCell<Vec<Cleanup>>,

    /// Number of completed or attempted executions of the body.
    run_count: Cell<usize>,
}

impl EffectInner {
    pub fn new<F>(body: F) -> Self
    where
        F: FnMut() + 'static,
    {
        Self::with_id(EffectId::new(), body)
    }

    /// Create an effect with a preallocated id, for bodies that need to know
    /// their own id.
    pub fn with_id<F>(id: EffectId, body: F) -> Self
    where
        F: FnMut() + 'static,
    {
        Self {
            id,
            body: RefCell::new(Box::new(body)),
            active: Cell::new(true),
            running: Cell::new(false),
            cleanups: RefCell::new(Vec::new()),
            run_count: Cell::new(0),
        }
    }

    pub fn id(&self) -> EffectId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    pub fn run_count(&self) -> usize {
        self.run_count.get()
    }

    pub fn cleanup_count(&self) -> usize {
        self.cleanups.borrow().len()
    }

    /// Append a cleanup, invoked on the next run or on stop.
    pub fn add_cleanup(&self, cleanup: Cleanup) {
        self.cleanups.borrow_mut().push(cleanup);
    }

    /// Invoke and clear all cleanups. Cleanups may register new ones; those
    /// are kept for the next round.
    pub fn run_cleanups(&self) {
        let cleanups = std::mem::take(&mut *self.cleanups.borrow_mut());
        for cleanup in cleanups {
            cleanup();
        }
    }

    /// Execute the body. The caller is responsible for the context frame.
    pub fn invoke(&self) {
        let Ok(mut body) = self.body.try_borrow_mut() else {
            trace!(effect = %self.id, "effect body already borrowed, skipping");
            return;
        };
        let _running = RunningFlag::set(&self.running);
        self.run_count.set(self.run_count.get() + 1);
        (*body)();
    }

    /// Deactivate and drop all subscriptions. Idempotent.
    pub fn stop(&self) {
        self.active.set(false);
        self.run_cleanups();
    }
}

impl fmt::Debug for EffectInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .field("running", &self.is_running())
            .field("run_count", &self.run_count())
            .field("subscriptions", &self.cleanup_count())
            .finish()
    }
}

/// Clears the running flag when dropped, including on unwind.
struct RunningFlag<'a>(&'a Cell<bool>);

impl<'a> RunningFlag<'a> {
    fn set(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

// ----------------------------------------------------------------------------
// Disposer
// ----------------------------------------------------------------------------

/// Handle returned when an effect is registered.
///
/// # Example
///
/// ```rust
/// use manifold_core::reactive::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.state(0);
///
/// let c = count.clone();
/// let effect = rt.effect(move || {
///     let _ = c.get();
/// });
/// assert_eq!(effect.run_count(), 1);
///
/// count.set(1).unwrap();
/// assert_eq!(effect.run_count(), 2);
///
/// effect.dispose();
/// count.set(2).unwrap();
/// assert_eq!(effect.run_count(), 2);
/// ```
#[derive(Clone)]
pub struct Disposer {
    effect: Rc<EffectInner>,
    runtime: Weak<RuntimeInner>,
}

impl Disposer {
    pub(crate) fn new(effect: Rc<EffectInner>, runtime: Weak<RuntimeInner>) -> Self {
        Self { effect, runtime }
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> EffectId {
        self.effect.id()
    }

    /// Stop the effect. Safe to call any number of times.
    pub fn dispose(&self) {
        match self.runtime.upgrade() {
            Some(runtime) => runtime.dispose_effect(self.effect.id()),
            None => self.effect.stop(),
        }
    }

    /// Whether the effect is still subscribed to invalidations.
    pub fn is_active(&self) -> bool {
        self.effect.is_active()
    }

    /// Number of times the effect body has run.
    pub fn run_count(&self) -> usize {
        self.effect.run_count()
    }

    /// Number of live subscriptions and user cleanups.
    pub fn dependency_count(&self) -> usize {
        self.effect.cleanup_count()
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.effect, f)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
