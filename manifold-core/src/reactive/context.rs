//! Execution Context
//!
//! The execution context records which effect is currently running. This is
//! what makes tracking ambient: a read deep inside an effect body finds the
//! effect to subscribe without anything being threaded through the call.
//!
//! # Implementation
//!
//! Each runtime owns one context. Running an effect pushes it onto the call
//! stack and makes it the tracking effect; the [`RunFrame`] guard pops it
//! again when dropped, so the context stays balanced even if the body
//! panics. [`UntrackedScope`] clears the tracking effect without touching
//! the stack, which keeps re-entrancy detection intact inside `untracked`.
//!
//! The tracking marker is only meaningful while the body runs
//! synchronously. Work an effect defers to a future or a callback runs
//! after the frame is gone and is not tracked.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::graph::{EffectId, TrackingKey};

/// Call stack and tracking state for one runtime.
#[derive(Debug, Default)]
pub(crate) struct ExecutionContext {
    /// Effects currently executing, innermost last.
    stack: Vec<EffectId>,
    /// Effect that reads are attributed to, if any.
    tracking: Option<EffectId>,
    /// Most recent key each effect tracked during its current or last run.
    last_read: HashMap<EffectId, TrackingKey>,
}

impl ExecutionContext {
    pub fn tracking(&self) -> Option<EffectId> {
        self.tracking
    }

    /// The innermost executing effect.
    pub fn current(&self) -> Option<EffectId> {
        self.stack.last().copied()
    }

    pub fn on_stack(&self, effect: EffectId) -> bool {
        self.stack.contains(&effect)
    }

    /// Number of effects currently executing.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn record_read(&mut self, effect: EffectId, key: TrackingKey) {
        self.last_read.insert(effect, key);
    }

    pub fn last_read(&self, effect: EffectId) -> Option<&TrackingKey> {
        self.last_read.get(&effect)
    }

    pub fn forget(&mut self, effect: EffectId) {
        self.last_read.remove(&effect);
    }
}

/// Guard for one effect execution. Pops the frame when dropped.
pub(crate) struct RunFrame<'a> {
    context: &'a RefCell<ExecutionContext>,
    effect: EffectId,
    previous: Option<EffectId>,
}

impl<'a> RunFrame<'a> {
    pub fn enter(context: &'a RefCell<ExecutionContext>, effect: EffectId) -> Self {
        let mut ctx = context.borrow_mut();
        ctx.stack.push(effect);
        ctx.last_read.remove(&effect);
        let previous = ctx.tracking.replace(effect);
        drop(ctx);

        Self {
            context,
            effect,
            previous,
        }
    }
}

impl Drop for RunFrame<'_> {
    fn drop(&mut self) {
        let mut ctx = self.context.borrow_mut();
        let popped = ctx.stack.pop();
        debug_assert_eq!(
            popped,
            Some(self.effect),
            "execution context mismatch: expected {:?}, got {:?}",
            self.effect,
            popped
        );
        ctx.tracking = self.previous;
    }
}

/// Guard that suspends tracking until dropped.
pub(crate) struct UntrackedScope<'a> {
    context: &'a RefCell<ExecutionContext>,
    previous: Option<EffectId>,
}

impl<'a> UntrackedScope<'a> {
    pub fn enter(context: &'a RefCell<ExecutionContext>) -> Self {
        let previous = context.borrow_mut().tracking.take();
        Self { context, previous }
    }
}

impl Drop for UntrackedScope<'_> {
    fn drop(&mut self) {
        self.context.borrow_mut().tracking = self.previous;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{CellId, KeyScope};
    use crate::value::KeyPath;

    #[test]
    fn frame_tracks_effect() {
        let context = RefCell::new(ExecutionContext::default());
        let id = EffectId::new();

        assert!(context.borrow().tracking().is_none());
        {
            let _frame = RunFrame::enter(&context, id);
            assert_eq!(context.borrow().tracking(), Some(id));
            assert!(context.borrow().on_stack(id));
            assert_eq!(context.borrow().depth(), 1);
        }
        assert!(context.borrow().tracking().is_none());
        assert_eq!(context.borrow().depth(), 0);
    }

    #[test]
    fn nested_frames() {
        let context = RefCell::new(ExecutionContext::default());
        let outer = EffectId::new();
        let inner = EffectId::new();

        {
            let _outer = RunFrame::enter(&context, outer);
            {
                let _inner = RunFrame::enter(&context, inner);
                assert_eq!(context.borrow().current(), Some(inner));
                assert!(context.borrow().on_stack(outer));
            }
            // After the inner frame drops, the outer effect is current again
            assert_eq!(context.borrow().tracking(), Some(outer));
        }
        assert!(context.borrow().current().is_none());
    }

    #[test]
    fn untracked_scope_keeps_stack() {
        let context = RefCell::new(ExecutionContext::default());
        let id = EffectId::new();
        let _frame = RunFrame::enter(&context, id);

        {
            let _scope = UntrackedScope::enter(&context);
            assert!(context.borrow().tracking().is_none());
            assert_eq!(context.borrow().current(), Some(id));
        }
        assert_eq!(context.borrow().tracking(), Some(id));
    }

    #[test]
    fn frame_unwinds_on_panic() {
        let context = RefCell::new(ExecutionContext::default());
        let id = EffectId::new();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _frame = RunFrame::enter(&context, id);
            panic!("effect body failed");
        }));
        assert!(result.is_err());
        assert_eq!(context.borrow().depth(), 0);
        assert!(context.borrow().tracking().is_none());
    }

    #[test]
    fn entering_a_frame_resets_last_read() {
        let context = RefCell::new(ExecutionContext::default());
        let id = EffectId::new();
        let key = TrackingKey::new(CellId::new(), KeyPath::root(), KeyScope::Shallow);

        context.borrow_mut().record_read(id, key.clone());
        assert_eq!(context.borrow().last_read(id), Some(&key));

        let _frame = RunFrame::enter(&context, id);
        assert!(context.borrow().last_read(id).is_none());
    }
}
