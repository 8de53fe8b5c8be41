use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use gcbridge::{
    bridge::{CallableMode, InvokeError, JsClosure},
    runtime::{context::Context, leak_detector, value::Value},
};

#[path = "../common/mod.rs"]
mod common;

use common::{counting_function, flaky_function, init_logging, receiver_recorder};

#[test]
fn rooted_closure_invokes_then_stops_after_context_destroy() {
    init_logging();
    let context = Context::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let f = receiver_recorder(&context, &seen);
    let closure = JsClosure::create(&context, f, "receiver", true);

    let receiver = Value::from("receiver");
    assert_eq!(closure.data().invoke(&receiver, &[]), Ok(Value::Undefined));
    assert_eq!(*seen.borrow(), vec![receiver.clone()]);

    let before = leak_detector::snapshot();
    context.destroy();
    let after = leak_detector::snapshot();

    assert!(!closure.data().is_valid());
    assert!(closure.is_invalid());
    assert_eq!(after.closures_invalidated - before.closures_invalidated, 1);
    assert_eq!(
        closure.data().invoke(&receiver, &[]),
        Err(InvokeError::Invalidated)
    );
    assert_eq!(seen.borrow().len(), 1);

    // Later explicit invalidation is a no-op.
    closure.invalidate();
    assert_eq!(
        leak_detector::snapshot().closures_invalidated,
        after.closures_invalidated
    );
}

#[test]
fn managed_closure_finalizes_once_when_last_reference_dropped() {
    init_logging();
    let context = Context::new();
    let hits = Rc::new(Cell::new(0));
    let f = counting_function(&context, &hits);
    let root = context.add_root(f.handle());

    let before = leak_detector::snapshot();
    let closure = JsClosure::create(&context, f, "counter", false);
    assert_eq!(closure.data().mode(), CallableMode::Managed);
    let extra = closure.clone();
    let weak = closure.downgrade();

    drop(closure);
    assert_eq!(
        leak_detector::snapshot().closures_finalized,
        before.closures_finalized
    );

    drop(extra);
    let after = leak_detector::snapshot();
    assert_eq!(after.closures_created - before.closures_created, 1);
    assert_eq!(after.closures_invalidated - before.closures_invalidated, 1);
    assert_eq!(after.closures_finalized - before.closures_finalized, 1);
    assert!(weak.upgrade().is_none());

    assert_eq!(hits.get(), 0);
    context.remove_root(root);
}

#[test]
fn failing_callable_leaves_closure_valid() {
    init_logging();
    let context = Context::new();
    let attempts = Rc::new(Cell::new(0));
    let f = flaky_function(&context, &attempts, 2);
    let closure = JsClosure::create(&context, f, "flaky", true);
    let bridge = closure.data();

    assert_eq!(bridge.invoke(&Value::Undefined, &[]), Ok(Value::Boolean(true)));
    match bridge.invoke(&Value::Undefined, &[]) {
        Err(InvokeError::Exception(exception)) => {
            assert_eq!(exception.message(), "attempt 2 failed")
        }
        other => panic!("expected exception, got {:?}", other),
    }

    assert!(bridge.is_valid());
    assert_eq!(bridge.invoke(&Value::Undefined, &[]), Ok(Value::Boolean(true)));
    assert_eq!(attempts.get(), 3);
}

#[test]
fn rooted_closure_survives_collections_until_invalidated() {
    let context = Context::new();
    let hits = Rc::new(Cell::new(0));
    let f = counting_function(&context, &hits);
    let closure = JsClosure::create(&context, f, "counter", true);

    context.gc();
    assert!(context.is_live(f.handle()));
    assert_eq!(closure.data().invoke(&Value::Undefined, &[]), Ok(Value::Number(1.0)));

    closure.invalidate();
    assert_eq!(context.heap().root_count(), 0);
    assert_eq!(context.destroy_notifier_count(), 0);
    context.gc();
    assert!(!context.is_live(f.handle()));
}

#[test]
fn invalidate_from_every_entry_point_transitions_once() {
    let context = Context::new();
    let hits = Rc::new(Cell::new(0));
    let f = counting_function(&context, &hits);
    let closure = JsClosure::create(&context, f, "counter", true);

    let before = leak_detector::snapshot();
    closure.invalidate();
    closure.invalidate();
    context.destroy();
    drop(closure);
    let after = leak_detector::snapshot();

    assert_eq!(after.closures_invalidated - before.closures_invalidated, 1);
    assert_eq!(after.closures_finalized - before.closures_finalized, 1);
    assert_eq!(hits.get(), 0);
}

#[test]
fn context_dropped_while_closure_outlives_it() {
    let context = Context::new();
    let hits = Rc::new(Cell::new(0));
    let f = counting_function(&context, &hits);
    let closure = JsClosure::create(&context, f, "counter", true);

    drop(context);
    assert!(closure.is_invalid());
    assert!(closure.data().context().is_none());
    assert_eq!(
        closure.data().invoke(&Value::Undefined, &[]),
        Err(InvokeError::Invalidated)
    );
}

#[test]
fn callable_may_invalidate_its_own_closure() {
    let context = Context::new();
    let slot: Rc<RefCell<Option<gcbridge::host::Closure<JsClosure>>>> = Rc::default();

    let owner = slot.clone();
    let f = context.new_function("once", vec![], move |_, _, _| {
        if let Some(closure) = owner.borrow_mut().take() {
            closure.invalidate();
        }
        Ok(Value::from("ran"))
    });
    let closure = JsClosure::create(&context, f, "once", true);
    *slot.borrow_mut() = Some(closure.clone());

    assert_eq!(closure.call(&[]), Some(Value::from("ran")));
    assert!(closure.is_invalid());
    assert_eq!(closure.call(&[]), None);
    assert_eq!(context.heap().root_count(), 0);
}

#[test]
fn collection_during_invocation_keeps_arguments_and_callable() {
    let context = Context::new();
    let argument = context.new_object("Payload", vec![Value::Number(9.0)]);
    let f = context.new_function("collector", vec![], |scope, _, args| {
        scope.context().gc();
        let handle = args[0].as_handle().expect("object argument");
        Ok(Value::Boolean(scope.context().is_live(handle)))
    });
    let closure = JsClosure::create(&context, f, "collector", true);

    assert_eq!(
        closure.data().invoke(&Value::Undefined, &[Value::Object(argument)]),
        Ok(Value::Boolean(true))
    );

    // Nothing roots the argument once the call returns.
    context.gc();
    assert!(!context.is_live(argument));
    assert!(closure.data().is_valid());
}
