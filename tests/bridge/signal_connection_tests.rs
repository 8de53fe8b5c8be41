use std::{cell::Cell, rc::Rc};

use gcbridge::{
    bridge::{InvokeError, JsClosure, ObjectWrapper},
    runtime::{context::Context, leak_detector, value::Value},
};

#[path = "../common/mod.rs"]
mod common;

use common::{counting_function, init_logging};

#[test]
fn wrapper_traces_signal_callables_across_collections() {
    init_logging();
    let context = Context::new();
    let wrapper = ObjectWrapper::new(&context);
    let _root = context.add_root(wrapper.handle().unwrap());

    let hits = Rc::new(Cell::new(0));
    let f = counting_function(&context, &hits);
    wrapper.connect("activate", f).unwrap();

    for _ in 0..3 {
        context.gc();
        assert!(context.is_live(f.handle()));
        wrapper.emit("activate", &[]);
    }
    assert_eq!(hits.get(), 3);
}

#[test]
fn collecting_wrapper_invalidates_every_signal_closure() {
    init_logging();
    let context = Context::new();
    let wrapper = ObjectWrapper::new(&context);

    let hits = Rc::new(Cell::new(0));
    let a = counting_function(&context, &hits);
    let b = counting_function(&context, &hits);
    let id_a = wrapper.connect("activate", a).unwrap();
    let id_b = wrapper.connect("notify", b).unwrap();

    let closure_a = wrapper.emitter().closure(id_a).unwrap();
    let closure_b = wrapper.emitter().closure(id_b).unwrap();

    let before = leak_detector::snapshot();
    context.gc();
    let after = leak_detector::snapshot();

    assert!(wrapper.is_finalized());
    assert_eq!(after.closures_invalidated - before.closures_invalidated, 2);
    assert!(closure_a.is_invalid() && closure_b.is_invalid());
    assert!(!wrapper.emitter().handler_is_connected(id_a));
    assert!(!wrapper.emitter().handler_is_connected(id_b));
    assert_eq!(closure_a.ref_count(), 1);

    assert_eq!(
        closure_a.data().invoke(&Value::Undefined, &[]),
        Err(InvokeError::Invalidated)
    );
    assert_eq!(hits.get(), 0);

    drop(closure_a);
    drop(closure_b);
    assert_eq!(
        leak_detector::snapshot().closures_finalized - before.closures_finalized,
        2
    );
}

#[test]
fn disconnect_during_incremental_mark_pins_callable_for_the_cycle() {
    init_logging();
    let context = Context::new();
    let wrapper = ObjectWrapper::new(&context);
    let _root = context.add_root(wrapper.handle().unwrap());

    let hits = Rc::new(Cell::new(0));
    let f = counting_function(&context, &hits);
    let id = wrapper.connect("activate", f).unwrap();

    // The wrapper is grey but not yet scanned: nothing has marked `f`.
    context.start_incremental_gc();
    let pins_before = context.stats().total_pins;
    assert!(wrapper.disconnect(id));
    assert_eq!(context.stats().total_pins, pins_before + 1);

    while !context.gc_slice() {}
    context.finish_gc();
    assert!(context.is_live(f.handle()));

    // Unreachable now; the next full cycle reclaims it.
    context.gc();
    assert!(!context.is_live(f.handle()));
}

#[test]
fn explicit_invalidate_of_managed_closure_pins_before_clearing() {
    let context = Context::new();
    let hits = Rc::new(Cell::new(0));
    let f = counting_function(&context, &hits);
    let closure = JsClosure::create(&context, f, "managed", false);

    context.start_incremental_gc();
    closure.invalidate();
    assert!(!closure.data().is_valid());
    assert!(closure.data().context().is_none());
    context.finish_gc();
    assert!(context.is_live(f.handle()));

    context.gc();
    assert!(!context.is_live(f.handle()));
}

#[test]
fn emit_skips_handlers_invalidated_mid_emission() {
    let context = Context::new();
    let wrapper = ObjectWrapper::new(&context);
    let _root = context.add_root(wrapper.handle().unwrap());

    let hits = Rc::new(Cell::new(0));
    let victim = counting_function(&context, &hits);

    let target = Rc::new(Cell::new(None));
    let slot = target.clone();
    let wrapper_weak = Rc::downgrade(&wrapper);
    let killer = context.new_function("killer", vec![], move |_, _, _| {
        if let (Some(id), Some(wrapper)) = (slot.take(), wrapper_weak.upgrade()) {
            wrapper.disconnect(id);
        }
        Ok(Value::Undefined)
    });

    wrapper.connect("activate", killer).unwrap();
    let victim_id = wrapper.connect("activate", victim).unwrap();
    target.set(Some(victim_id));

    wrapper.emit("activate", &[]);
    assert_eq!(hits.get(), 0);
    assert_eq!(wrapper.closure_count(), 1);
    assert_eq!(wrapper.find_handler("activate", victim), None);
}

#[test]
fn destroying_context_invalidates_signal_closures_via_teardown() {
    let context = Context::new();
    let wrapper = ObjectWrapper::new(&context);
    let _root = context.add_root(wrapper.handle().unwrap());

    let hits = Rc::new(Cell::new(0));
    let id = wrapper
        .connect("activate", counting_function(&context, &hits))
        .unwrap();
    let closure = wrapper.emitter().closure(id).unwrap();

    context.destroy();
    assert!(wrapper.is_finalized());
    assert!(closure.is_invalid());
    assert_eq!(wrapper.emit("activate", &[]), None);
    assert_eq!(hits.get(), 0);
}
