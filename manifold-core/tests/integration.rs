//! Integration Tests for the Reactive Engine
//!
//! These tests verify that state cells, computed cells, and effects work
//! together correctly through the public API.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use manifold_core::reactive::{Overflow, Runtime};
use manifold_core::value::Function;
use manifold_core::{ComputedWritePolicy, Error, RuntimeConfig, Value};
use serde_json::json;

/// Shared run counter for effect bodies.
fn counter() -> (Rc<Cell<usize>>, Rc<Cell<usize>>) {
    let count = Rc::new(Cell::new(0));
    (count.clone(), count)
}

fn bump(count: &Cell<usize>) {
    count.set(count.get() + 1);
}

/// Test the basic log scenario: the third, equal write is suppressed.
#[test]
fn effect_logs_each_distinct_value() {
    let rt = Runtime::new();
    let s = rt.state(0);
    let log = Rc::new(RefCell::new(Vec::new()));

    let (cell, sink) = (s.clone(), log.clone());
    rt.effect(move || sink.borrow_mut().push(cell.get()));

    s.set(1).unwrap();
    s.set(2).unwrap();
    s.set(2).unwrap();

    assert_eq!(
        *log.borrow(),
        vec![Value::from(0), Value::from(1), Value::from(2)]
    );
}

/// Test that a nested property write re-runs only the effect that read it.
#[test]
fn nested_write_reruns_only_its_reader() {
    let rt = Runtime::new();
    let store = rt.state(json!({ "user": { "name": "Alice", "age": 25 } }));
    let (a_runs, a_count) = counter();
    let (b_runs, b_count) = counter();

    let s = store.clone();
    rt.effect(move || {
        s.value().at("user").at("name").get();
        bump(&a_count);
    });
    let s = store.clone();
    rt.effect(move || {
        s.value().at("user").at("age").get();
        bump(&b_count);
    });

    store.value().at("user").set("name", "Bob").unwrap();

    assert_eq!(a_runs.get(), 2, "A re-runs once");
    assert_eq!(b_runs.get(), 1, "B does not re-run");
    assert_eq!(
        store.get_untracked(),
        Value::from(json!({ "user": { "name": "Bob", "age": 25 } }))
    );
}

/// Test that a computed cell has its value before anything is written.
#[test]
fn computed_is_settled_immediately() {
    let rt = Runtime::new();
    let base = rt.state(5);
    let b = base.clone();
    let doubled = rt.computed(move || b.get().as_f64().unwrap_or(0.0) * 2.0);

    assert_eq!(doubled.get(), Value::from(10));
}

/// Test that a deep-equal replacement triggers nothing.
#[test]
fn deep_equal_write_is_a_no_op() {
    let rt = Runtime::new();
    let cell = rt.state(json!({ "items": [1, 2, { "tags": ["x"] }], "on": true }));
    let (runs, count) = counter();

    let c = cell.clone();
    rt.effect(move || {
        c.get();
        bump(&count);
    });

    let changed = cell
        .set(json!({ "items": [1, 2, { "tags": ["x"] }], "on": true }))
        .unwrap();
    assert!(!changed);
    assert_eq!(runs.get(), 1);
}

/// Test that sibling properties are independent invalidation units.
#[test]
fn sibling_properties_are_isolated() {
    let rt = Runtime::new();
    let cell = rt.state(json!({ "a": 1, "b": 2 }));
    let (a_runs, a_count) = counter();
    let (b_runs, b_count) = counter();

    let c = cell.clone();
    rt.effect(move || {
        c.value().at("a").get();
        bump(&a_count);
    });
    let c = cell.clone();
    rt.effect(move || {
        c.value().at("b").get();
        bump(&b_count);
    });

    cell.value().set("a", 10).unwrap();
    assert_eq!((a_runs.get(), b_runs.get()), (2, 1));

    cell.value().set("b", 20).unwrap();
    assert_eq!((a_runs.get(), b_runs.get()), (2, 2));
}

/// Test that batched writes re-run a reader once, with the final values.
#[test]
fn batched_writes_run_once() {
    let rt = Runtime::new();
    let first = rt.state("Ada");
    let last = rt.state("Byron");
    let seen = Rc::new(RefCell::new(Vec::new()));

    let (f, l, sink) = (first.clone(), last.clone(), seen.clone());
    rt.effect(move || {
        let name = format!(
            "{} {}",
            f.get().as_str().unwrap_or_default(),
            l.get().as_str().unwrap_or_default()
        );
        sink.borrow_mut().push(name);
    });

    rt.batch(|| {
        first.set("Augusta").unwrap();
        last.set("King").unwrap();
        last.set("Lovelace").unwrap();
    });

    assert_eq!(*seen.borrow(), vec!["Ada Byron", "Augusta Lovelace"]);
}

/// Test that writes made by an effect during a flush are coalesced into the
/// next pass.
#[test]
fn writes_inside_a_flush_coalesce() {
    let rt = Runtime::new();
    let trigger = rt.state(0);
    let x = rt.state(0);
    let y = rt.state(0);
    let (sum_runs, sum_count) = counter();

    let (t, xw, yw) = (trigger.clone(), x.clone(), y.clone());
    rt.effect(move || {
        let n = t.get().as_i64().unwrap_or(0);
        xw.set(n).unwrap();
        yw.set(n * 2).unwrap();
    });
    let (xr, yr) = (x.clone(), y.clone());
    rt.effect(move || {
        xr.get();
        yr.get();
        bump(&sum_count);
    });
    assert_eq!(sum_runs.get(), 1);

    trigger.set(1).unwrap();
    assert_eq!(sum_runs.get(), 2);
    assert_eq!(y.get_untracked(), Value::from(2));
}

/// Test that effects run in the order they were first invalidated.
#[test]
fn effects_run_in_enqueue_order() {
    let rt = Runtime::new();
    let cell = rt.state(0);
    let order = Rc::new(RefCell::new(Vec::new()));

    for label in ["first", "second", "third"] {
        let (c, sink) = (cell.clone(), order.clone());
        rt.effect(move || {
            c.get();
            sink.borrow_mut().push(label);
        });
    }
    order.borrow_mut().clear();

    cell.set(1).unwrap();
    assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
}

/// Test computed propagation: one recomputation and one downstream run per
/// distinct result.
#[test]
fn computed_propagates_distinct_results() {
    let rt = Runtime::new();
    let base = rt.state(1);
    let (derived, derive_count) = counter();
    let (downstream, downstream_count) = counter();

    let b = base.clone();
    let doubled = rt.computed(move || {
        bump(&derive_count);
        b.get().as_f64().unwrap_or(0.0) * 2.0
    });
    let d = doubled.clone();
    rt.effect(move || {
        d.get();
        bump(&downstream_count);
    });

    base.set(5).unwrap();
    base.set(10).unwrap();

    assert_eq!(derived.get(), 3);
    assert_eq!(downstream.get(), 3);
    assert_eq!(doubled.get_untracked(), Value::from(20));
}

/// Test that a disposer can be called twice and leaves no subscriptions.
#[test]
fn dispose_is_idempotent() {
    let rt = Runtime::new();
    let cell = rt.state(json!({ "a": { "b": 1 } }));
    let (runs, count) = counter();

    let c = cell.clone();
    let effect = rt.effect(move || {
        c.value().at("a").at("b").get();
        bump(&count);
    });
    assert!(cell.subscriber_count() > 0);

    effect.dispose();
    effect.dispose();

    assert!(!effect.is_active());
    assert_eq!(cell.subscriber_count(), 0);
    assert_eq!(cell.key_count(), 0);

    cell.value().at("a").set("b", 2).unwrap();
    assert_eq!(runs.get(), 1);
}

/// Test that an effect writing the cell it reads terminates and reports the
/// dropped work.
#[test]
fn self_triggering_effect_terminates() {
    let rt = Runtime::new();
    let overflows = Rc::new(RefCell::new(Vec::new()));
    let sink = overflows.clone();
    rt.set_overflow_hook(move |overflow| sink.borrow_mut().push(overflow.clone()));

    let cell = rt.state(0);
    let c = cell.clone();
    let effect = rt.effect(move || {
        let n = c.get().as_i64().unwrap_or(0);
        c.set(n + 1).unwrap();
    });

    cell.set(100).unwrap();

    let passes = rt.config().max_flush_passes;
    assert_eq!(effect.run_count(), 1 + passes);
    assert_eq!(cell.get_untracked(), Value::from(100 + passes as i64));
    assert_eq!(*overflows.borrow(), vec![Overflow::FlushPasses { dropped: 1 }]);
    assert!(!rt.is_flushing());
    assert_eq!(rt.pending_count(), 0);
}

/// Test that nesting beyond the depth ceiling is dropped and reported.
#[test]
fn depth_cap_drops_nested_runs() {
    let rt = Runtime::with_config(RuntimeConfig::default().with_max_effect_depth(2));
    let overflows = Rc::new(RefCell::new(Vec::new()));
    let sink = overflows.clone();
    rt.set_overflow_hook(move |overflow| sink.borrow_mut().push(overflow.clone()));

    let (innermost, count) = counter();
    let (outer_rt, middle_rt) = (rt.clone(), rt.clone());
    rt.effect(move || {
        let inner_rt = middle_rt.clone();
        let count = count.clone();
        outer_rt.effect(move || {
            let count = count.clone();
            inner_rt.effect(move || bump(&count));
        });
    });

    assert_eq!(innermost.get(), 0);
    assert!(matches!(
        overflows.borrow().as_slice(),
        [Overflow::EffectDepth { .. }]
    ));
}

/// Test that dependencies are rebuilt on every run.
#[test]
fn dependencies_follow_branches() {
    let rt = Runtime::new();
    let show_details = rt.state(false);
    let summary = rt.state("short");
    let details = rt.state("long");
    let (runs, count) = counter();

    let (flag, s, d) = (show_details.clone(), summary.clone(), details.clone());
    rt.effect(move || {
        if flag.get().as_bool() == Some(true) {
            d.get();
        } else {
            s.get();
        }
        bump(&count);
    });

    details.set("longer").unwrap();
    assert_eq!(runs.get(), 1, "details not read yet");

    show_details.set(true).unwrap();
    assert_eq!(runs.get(), 2);

    summary.set("shorter").unwrap();
    assert_eq!(runs.get(), 2, "summary no longer read");
    assert_eq!(summary.subscriber_count(), 0);
}

/// Test that appending to a list re-runs length readers but not readers of
/// existing rows.
#[test]
fn list_append_is_granular() {
    let rt = Runtime::new();
    let todos = rt.state(json!([
        { "title": "write", "done": false },
        { "title": "test", "done": false },
    ]));
    let (row_runs, row_count) = counter();
    let (len_runs, len_count) = counter();

    let t = todos.clone();
    rt.effect(move || {
        t.value().at(0usize).at("title").get();
        bump(&row_count);
    });
    let t = todos.clone();
    rt.effect(move || {
        t.value().len();
        bump(&len_count);
    });

    todos
        .value()
        .push(json!({ "title": "ship", "done": false }))
        .unwrap();
    assert_eq!(row_runs.get(), 1);
    assert_eq!(len_runs.get(), 2);

    todos.value().at(1usize).set("done", true).unwrap();
    assert_eq!((row_runs.get(), len_runs.get()), (1, 2));
}

/// Test that sorting in place re-runs only readers of moved elements.
#[test]
fn sort_leaves_length_and_unmoved_readers_alone() {
    let rt = Runtime::new();
    let board = rt.state(json!({ "scores": [1, 3, 2] }));
    let (len_runs, len_count) = counter();
    let (head_runs, head_count) = counter();
    let (middle_runs, middle_count) = counter();

    let b = board.clone();
    rt.effect(move || {
        b.value().at("scores").len();
        bump(&len_count);
    });
    let b = board.clone();
    rt.effect(move || {
        b.value().at("scores").at(0usize).get();
        bump(&head_count);
    });
    let b = board.clone();
    rt.effect(move || {
        b.value().at("scores").at(1usize).get();
        bump(&middle_count);
    });

    board.value().at("scores").sort().unwrap();
    assert_eq!(board.get_untracked(), Value::from(json!({ "scores": [1, 2, 3] })));
    assert_eq!(len_runs.get(), 1);
    assert_eq!(head_runs.get(), 1);
    assert_eq!(middle_runs.get(), 2);
}

/// Test that a callable kept in state is re-read when swapped.
#[test]
fn stored_functions_are_called_through_state() {
    let rt = Runtime::new();
    let double = Function::new(|args| Value::from(args[0].as_f64().unwrap_or(0.0) * 2.0));
    let handlers = rt.state(Value::object([("format", Value::from(double))]));
    let out = Rc::new(RefCell::new(Value::Null));

    let (h, sink) = (handlers.clone(), out.clone());
    rt.effect(move || {
        if let Value::Function(format) = h.value().at("format").get() {
            *sink.borrow_mut() = format.call(&[Value::from(21)]);
        }
    });
    assert_eq!(*out.borrow(), Value::from(42));

    let negate = Function::new(|args| Value::from(-args[0].as_f64().unwrap_or(0.0)));
    handlers.value().set("format", negate).unwrap();
    assert_eq!(*out.borrow(), Value::from(-21));
}

/// Test the registry: explicit names are looked up, later ones win.
#[test]
fn named_states_are_registered() {
    let rt = Runtime::new();
    let first = rt.state_named("theme", "light");
    assert!(rt.lookup("theme").is_some_and(|found| found.ptr_eq(&first)));

    let second = rt.state_named("theme", "dark");
    let found = rt.lookup("theme").unwrap();
    assert!(found.ptr_eq(&second));
    assert_eq!(found.get(), Value::from("dark"));
    assert!(rt.lookup("missing").is_none());

    // separate runtimes have separate registries
    assert!(Runtime::new().lookup("theme").is_none());
}

/// Test the default-runtime shorthands.
#[test]
fn free_functions_use_the_thread_runtime() {
    let count = manifold_core::state_named("free-count", 1);
    let (runs, runs_clone) = counter();

    let c = count.clone();
    let effect = manifold_core::effect(move || {
        c.get();
        bump(&runs_clone);
    });

    manifold_core::batch(|| {
        count.set(2).unwrap();
        count.set(3).unwrap();
    });
    assert_eq!(runs.get(), 2);

    let found = manifold_core::lookup("free-count").unwrap();
    assert!(found.ptr_eq(&count));
    assert_eq!(manifold_core::untracked(|| found.get()), Value::from(3));

    let c = count.clone();
    let tripled = manifold_core::computed(move || c.get().as_f64().unwrap_or(0.0) * 3.0);
    assert_eq!(tripled.get_untracked(), Value::from(9));
    effect.dispose();
}

/// Test that computed writes are rejected when configured.
#[test]
fn computed_writes_can_be_rejected() {
    let config = RuntimeConfig::from_json(r#"{ "computed_writes": "reject" }"#).unwrap();
    assert_eq!(config.computed_writes, ComputedWritePolicy::Reject);
    let rt = Runtime::with_config(config);

    let total = rt.computed_named("total", || 42);
    let err = total.set(0).unwrap_err();
    assert!(matches!(err, Error::ComputedWrite { ref name } if name == "total"));
    assert_eq!(err.to_string(), "cannot write to computed state `total`");

    let err = total.value().push(1).unwrap_err();
    assert!(matches!(err, Error::ComputedWrite { .. }));
    assert_eq!(total.get_untracked(), Value::from(42));
}

/// Test that a panicking effect leaves the runtime usable.
#[test]
fn panicking_effect_does_not_wedge_the_runtime() {
    let rt = Runtime::new();
    let cell = rt.state(0);
    let (runs, count) = counter();

    let c = cell.clone();
    rt.effect(move || {
        bump(&count);
        if c.get() == Value::from(13) {
            panic!("unlucky");
        }
    });

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        cell.set(13).unwrap();
    }));
    assert!(result.is_err());
    assert!(!rt.is_flushing());
    assert!(!rt.is_tracking());

    cell.set(14).unwrap();
    assert_eq!(runs.get(), 3);
}

/// Test that effects created through a cell handle belong to its runtime.
#[test]
fn state_effect_shorthand() {
    let rt = Runtime::new();
    let cell = rt.state(1);
    let (runs, count) = counter();

    let c = cell.clone();
    let effect = cell.effect(move || {
        c.get();
        bump(&count);
    });
    cell.set(2).unwrap();

    assert_eq!(runs.get(), 2);
    assert_eq!(effect.run_count(), 2);
    assert_eq!(rt.effect_count(), 1);
}

// ----------------------------------------------------------------------------
// Asynchronous continuations
// ----------------------------------------------------------------------------

type Deferred = Rc<RefCell<Vec<Pin<Box<dyn Future<Output = ()>>>>>>;

/// Test that writes separated by an await flush independently.
#[tokio::test]
async fn writes_after_await_start_a_new_flush() {
    let rt = Runtime::new();
    let cell = rt.state(0);
    let (runs, count) = counter();

    let c = cell.clone();
    rt.effect(move || {
        c.get();
        bump(&count);
    });

    cell.set(1).unwrap();
    tokio::task::yield_now().await;
    cell.set(2).unwrap();
    assert_eq!(runs.get(), 3);

    rt.batch(|| {
        cell.set(3).unwrap();
        cell.set(4).unwrap();
    });
    tokio::task::yield_now().await;
    assert_eq!(runs.get(), 4);
}

/// Test that reads performed after a suspension point are not tracked.
#[tokio::test]
async fn reads_after_await_are_untracked() {
    let rt = Runtime::new();
    let before = rt.state("sync");
    let after = rt.state("async");
    let deferred: Deferred = Rc::new(RefCell::new(Vec::new()));
    let (runs, count) = counter();

    let (b, a, queue) = (before.clone(), after.clone(), deferred.clone());
    rt.effect(move || {
        b.get();
        bump(&count);
        let a = a.clone();
        queue.borrow_mut().push(Box::pin(async move {
            tokio::task::yield_now().await;
            a.get();
        }));
    });

    let pending: Vec<_> = deferred.borrow_mut().drain(..).collect();
    for task in pending {
        task.await;
    }
    assert_eq!(after.subscriber_count(), 0);

    after.set("changed").unwrap();
    assert_eq!(runs.get(), 1);

    before.set("changed").unwrap();
    assert_eq!(runs.get(), 2);
}
