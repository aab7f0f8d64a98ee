//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects state cells and
//! effects. It owns the execution context, the scheduler, the effects and the
//! registry of named cells.
//!
//! # How It Works
//!
//! 1. When an effect runs, the runtime pushes it onto the call stack and
//!    marks it as the tracking effect.
//!
//! 2. When a cell is read, the runtime subscribes the tracking effect to the
//!    key that was read and hands the effect a cleanup for it.
//!
//! 3. When a cell is written, the cell computes the set of invalidated
//!    effects and the runtime:
//!    a. Adds the active ones to the pending set
//!    b. Starts a flush unless one is running or a batch holds the queue
//!    c. Runs pending effects pass by pass until the set drains or the pass
//!       cap is hit
//!
//! # Safety Valves
//!
//! Three guards keep propagation finite. An effect already on the call stack
//! is never re-entered. The call stack is capped at `max_effect_depth`. A
//! flush makes at most `max_flush_passes` passes. Work dropped by either cap
//! is logged at `warn` level and reported to the overflow hook.
//!
//! # Threading
//!
//! A runtime is single-threaded (`!Send`). Each thread gets its own default
//! runtime through [`Runtime::current`]; independent runtimes can be created
//! with [`Runtime::new`] and never see each other's cells or effects.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;
use tracing::{debug, trace, warn};

use super::context::{ExecutionContext, RunFrame, UntrackedScope};
use super::effect::{Disposer, EffectInner};
use super::state::State;
use crate::config::RuntimeConfig;
use crate::graph::{EffectId, Pass, Scheduler, TrackingKey};
use crate::value::{unchanged_at, Value};

/// A safety cap was hit and work was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Overflow {
    /// A flush reached `max_flush_passes`; `dropped` effects were still
    /// pending and will not run for this burst.
    FlushPasses { dropped: usize },
    /// An effect could not run because the call stack was already
    /// `max_effect_depth` deep.
    EffectDepth { effect: EffectId },
}

type OverflowHook = Rc<dyn Fn(&Overflow)>;

/// Shared state behind a [`Runtime`] handle.
pub(crate) struct RuntimeInner {
    config: RuntimeConfig,
    context: RefCell<ExecutionContext>,
    scheduler: RefCell<Scheduler>,
    effects: RefCell<HashMap<EffectId, Rc<EffectInner>>>,
    registry: RefCell<HashMap<String, State>>,
    overflow_hook: RefCell<Option<OverflowHook>>,
    next_name: Cell<u64>,
}

impl RuntimeInner {
    fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            context: RefCell::new(ExecutionContext::default()),
            scheduler: RefCell::new(Scheduler::new()),
            effects: RefCell::new(HashMap::new()),
            registry: RefCell::new(HashMap::new()),
            overflow_hook: RefCell::new(None),
            next_name: Cell::new(0),
        }
    }

    pub(crate) fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub(crate) fn generate_name(&self) -> String {
        let n = self.next_name.get();
        self.next_name.set(n + 1);
        format!("state-{n}")
    }

    pub(crate) fn register_name(&self, name: &str, state: State) {
        let previous = self.registry.borrow_mut().insert(name.to_owned(), state);
        if previous.is_some() {
            debug!(name, "state name re-registered, previous cell replaced");
        }
    }

    fn effect(&self, id: EffectId) -> Option<Rc<EffectInner>> {
        self.effects.borrow().get(&id).cloned()
    }

    pub(crate) fn insert_effect(&self, effect: Rc<EffectInner>) {
        self.effects.borrow_mut().insert(effect.id(), effect);
    }

    /// The effect reads should be attributed to right now, if it is live.
    fn tracking_effect(&self) -> Option<Rc<EffectInner>> {
        let id = self.context.borrow().tracking()?;
        self.effect(id).filter(|effect| effect.is_active())
    }

    /// Record that the tracking effect read `key`.
    ///
    /// Returns the effect when a new subscription must be stored by the
    /// caller, which owns the table for `key.cell`.
    pub(crate) fn record_read(&self, key: &TrackingKey) -> Option<Rc<EffectInner>> {
        let effect = self.tracking_effect()?;
        self.context.borrow_mut().record_read(effect.id(), key.clone());
        Some(effect)
    }

    /// Whether the last read of `effect` sits strictly inside the container
    /// at `key` and resolves the same in `old` and `new`.
    pub(crate) fn last_read_unchanged(
        &self,
        effect: EffectId,
        key: &TrackingKey,
        old: &Value,
        new: &Value,
    ) -> bool {
        self.context
            .borrow()
            .last_read(effect)
            .and_then(|last| last.below(key.cell, &key.path))
            .is_some_and(|rest| unchanged_at(old, new, rest))
    }

    /// Queue invalidated effects and flush.
    pub(crate) fn notify(&self, invalidated: IndexSet<EffectId>) {
        if invalidated.is_empty() {
            return;
        }
        {
            let effects = self.effects.borrow();
            let mut scheduler = self.scheduler.borrow_mut();
            for id in invalidated {
                if effects.get(&id).is_some_and(|effect| effect.is_active()) {
                    scheduler.schedule(id);
                }
            }
        }
        self.flush();
    }

    /// Drain the pending set. No-op while flushing or held.
    pub(crate) fn flush(&self) {
        if !self.scheduler.borrow_mut().begin_flush() {
            return;
        }
        let _flushing = FlushGuard(&self.scheduler);

        loop {
            let pass = self
                .scheduler
                .borrow_mut()
                .next_pass(self.config.max_flush_passes);

            match pass {
                Pass::Run(batch) => {
                    debug!(
                        pass = self.scheduler.borrow().passes(),
                        effects = batch.len(),
                        "flush pass"
                    );
                    for id in batch {
                        if let Some(effect) = self.effect(id) {
                            if effect.is_active() {
                                self.run_immediate(&effect);
                            }
                        }
                    }
                }
                Pass::Idle => break,
                Pass::Exhausted(dropped) => {
                    warn!(
                        passes = self.scheduler.borrow().passes(),
                        dropped = dropped.len(),
                        max_passes = self.config.max_flush_passes,
                        "flush pass cap reached, dropping pending effects"
                    );
                    self.report(Overflow::FlushPasses {
                        dropped: dropped.len(),
                    });
                    break;
                }
            }
        }
    }

    /// Run an effect, deferring to the pending set when a flush is in
    /// progress and the effect is not the one executing.
    pub(crate) fn run_effect(&self, effect: &Rc<EffectInner>) {
        if !effect.is_active() {
            return;
        }
        let defer = self.scheduler.borrow().is_flushing()
            && self.context.borrow().current() != Some(effect.id());
        if defer {
            self.scheduler.borrow_mut().schedule(effect.id());
            return;
        }
        self.run_immediate(effect);
    }

    /// Run an effect now, unless it is stopped, already executing, or the
    /// call stack is at its depth cap. Skipped runs are not errors.
    pub(crate) fn run_immediate(&self, effect: &Rc<EffectInner>) {
        if !effect.is_active() || effect.is_running() {
            return;
        }
        {
            let ctx = self.context.borrow();
            if ctx.on_stack(effect.id()) {
                trace!(effect = %effect.id(), "effect already on the call stack, skipping");
                return;
            }
            if ctx.depth() >= self.config.max_effect_depth {
                drop(ctx);
                warn!(
                    effect = %effect.id(),
                    max_depth = self.config.max_effect_depth,
                    "effect depth cap reached, dropping run"
                );
                self.report(Overflow::EffectDepth {
                    effect: effect.id(),
                });
                return;
            }
        }

        effect.run_cleanups();
        let _frame = RunFrame::enter(&self.context, effect.id());
        effect.invoke();
    }

    /// Stop an effect and forget it. Idempotent.
    pub(crate) fn dispose_effect(&self, id: EffectId) {
        let removed = match self.effects.try_borrow_mut() {
            Ok(mut effects) => effects.remove(&id),
            Err(_) => self.effect(id),
        };
        if let Some(effect) = removed {
            effect.stop();
        }
        if let Ok(mut scheduler) = self.scheduler.try_borrow_mut() {
            scheduler.unschedule(id);
        }
        if let Ok(mut ctx) = self.context.try_borrow_mut() {
            ctx.forget(id);
        }
    }

    fn report(&self, overflow: Overflow) {
        let hook = self.overflow_hook.borrow().clone();
        if let Some(hook) = hook {
            hook(&overflow);
        }
    }
}

/// Ends the flush when dropped, including on unwind.
struct FlushGuard<'a>(&'a RefCell<Scheduler>);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.borrow_mut().end_flush();
    }
}

/// Releases a batch hold when dropped and flushes after the outermost one.
struct HoldGuard<'a>(&'a RuntimeInner);

impl Drop for HoldGuard<'_> {
    fn drop(&mut self) {
        let released = self.0.scheduler.borrow_mut().release();
        if released && !std::thread::panicking() {
            self.0.flush();
        }
    }
}

// ----------------------------------------------------------------------------
// Public handle
// ----------------------------------------------------------------------------

/// Handle to one reactive universe.
///
/// Cloning is cheap and yields a handle to the same runtime.
///
/// # Example
///
/// ```rust
/// use manifold_core::reactive::Runtime;
/// use std::{cell::RefCell, rc::Rc};
///
/// let rt = Runtime::new();
/// let count = rt.state(0);
/// let log = Rc::new(RefCell::new(Vec::new()));
///
/// let (c, l) = (count.clone(), log.clone());
/// rt.effect(move || l.borrow_mut().push(c.get()));
///
/// count.set(1).unwrap();
/// count.set(2).unwrap();
/// count.set(2).unwrap(); // equal, suppressed
///
/// let seen: Vec<i64> = log.borrow().iter().filter_map(|v| v.as_i64()).collect();
/// assert_eq!(seen, vec![0, 1, 2]);
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

thread_local! {
    static DEFAULT_RUNTIME: Runtime = Runtime::new();
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with the given configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Rc::new(RuntimeInner::new(config)),
        }
    }

    /// The default runtime of the calling thread.
    pub fn current() -> Self {
        DEFAULT_RUNTIME.with(Runtime::clone)
    }

    pub(crate) fn from_inner(inner: Rc<RuntimeInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Rc<RuntimeInner> {
        &self.inner
    }

    pub fn config(&self) -> &RuntimeConfig {
        self.inner.config()
    }

    /// Create an anonymous state cell.
    pub fn state(&self, value: impl Into<Value>) -> State {
        State::new_in(&self.inner, value.into(), None)
    }

    /// Create a named state cell and register it. A later cell with the same
    /// name replaces this one in the registry.
    pub fn state_named(&self, name: impl Into<String>, value: impl Into<Value>) -> State {
        State::new_in(&self.inner, value.into(), Some(name.into()))
    }

    /// Look up a named cell.
    pub fn lookup(&self, name: &str) -> Option<State> {
        self.inner.registry.borrow().get(name).cloned()
    }

    /// Register an effect and run it.
    pub fn effect<F>(&self, body: F) -> Disposer
    where
        F: FnMut() + 'static,
    {
        let effect = Rc::new(EffectInner::new(body));
        self.inner.insert_effect(effect.clone());
        debug!(effect = %effect.id(), "effect registered");
        self.inner.run_effect(&effect);
        Disposer::new(effect, Rc::downgrade(&self.inner))
    }

    /// Run `f` with flushing held. Invalidations from writes inside `f` are
    /// coalesced and flushed once, when the outermost batch returns.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.scheduler.borrow_mut().hold();
        let _hold = HoldGuard(&self.inner);
        f()
    }

    /// Run `f` without attributing its reads to the running effect.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _scope = UntrackedScope::enter(&self.inner.context);
        f()
    }

    /// Register a cleanup on the effect that is currently executing.
    /// Returns false, dropping `cleanup`, when no effect is executing.
    pub fn on_cleanup(&self, cleanup: impl FnOnce() + 'static) -> bool {
        let current = self.inner.context.borrow().current();
        match current.and_then(|id| self.inner.effect(id)) {
            Some(effect) => {
                effect.add_cleanup(Box::new(cleanup));
                true
            }
            None => false,
        }
    }

    /// Flush pending effects now.
    pub fn flush(&self) {
        self.inner.flush();
    }

    /// Whether reads are currently being tracked.
    pub fn is_tracking(&self) -> bool {
        self.inner.context.borrow().tracking().is_some()
    }

    pub fn is_flushing(&self) -> bool {
        self.inner.scheduler.borrow().is_flushing()
    }

    /// Number of effects waiting to run.
    pub fn pending_count(&self) -> usize {
        self.inner.scheduler.borrow().pending_count()
    }

    /// Number of live (not disposed) effects, including computed cells'
    /// internal effects.
    pub fn effect_count(&self) -> usize {
        self.inner.effects.borrow().len()
    }

    /// Install a callback invoked whenever a safety cap drops work.
    pub fn set_overflow_hook(&self, hook: impl Fn(&Overflow) + 'static) {
        *self.inner.overflow_hook.borrow_mut() = Some(Rc::new(hook));
    }

    pub fn clear_overflow_hook(&self) {
        self.inner.overflow_hook.borrow_mut().take();
    }

    /// Whether two handles refer to the same runtime.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("effects", &self.effect_count())
            .field("pending", &self.pending_count())
            .field("flushing", &self.is_flushing())
            .field("named_states", &self.inner.registry.borrow().len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Default-runtime shorthands
// ----------------------------------------------------------------------------

/// Create an anonymous cell in the thread's default runtime.
pub fn state(value: impl Into<Value>) -> State {
    Runtime::current().state(value)
}

/// Create a named cell in the thread's default runtime.
pub fn state_named(name: impl Into<String>, value: impl Into<Value>) -> State {
    Runtime::current().state_named(name, value)
}

/// Register an effect in the thread's default runtime.
pub fn effect<F>(body: F) -> Disposer
where
    F: FnMut() + 'static,
{
    Runtime::current().effect(body)
}

/// Look up a named cell in the thread's default runtime.
pub fn lookup(name: &str) -> Option<State> {
    Runtime::current().lookup(name)
}

/// Batch writes in the thread's default runtime.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    Runtime::current().batch(f)
}

/// Run `f` without tracking, in the thread's default runtime.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    Runtime::current().untracked(f)
}

/// Register a cleanup on the running effect of the thread's default runtime.
pub fn on_cleanup(cleanup: impl FnOnce() + 'static) -> bool {
    Runtime::current().on_cleanup(cleanup)
}
