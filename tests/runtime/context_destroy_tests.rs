use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use gcbridge::{
    bridge::{InvokeError, JsClosure},
    config::RuntimeConfig,
    runtime::{context_registry::ContextRegistry, leak_detector, value::Value},
};

#[path = "../common/mod.rs"]
mod common;

use common::{counting_function, init_logging};

#[test]
fn registry_destroy_invalidates_rooted_closures_of_that_context_only() {
    init_logging();
    let mut registry = ContextRegistry::new(RuntimeConfig::default());
    let doomed = registry.create_context();
    let survivor = registry.create_context();

    let hits = Rc::new(Cell::new(0));
    let a = JsClosure::create(&doomed, counting_function(&doomed, &hits), "a", true);
    let b = JsClosure::create(&doomed, counting_function(&doomed, &hits), "b", true);
    let c = JsClosure::create(&survivor, counting_function(&survivor, &hits), "c", true);

    assert!(registry.destroy(doomed.id()));
    assert!(a.is_invalid() && b.is_invalid());
    assert!(!c.is_invalid());
    assert_eq!(
        a.data().invoke(&Value::Undefined, &[]),
        Err(InvokeError::Invalidated)
    );
    assert_eq!(c.data().invoke(&Value::Undefined, &[]), Ok(Value::Number(1.0)));
    assert_eq!(registry.live_count(), 1);
}

#[test]
fn destroy_notifiers_fire_in_registration_order() {
    let mut registry = ContextRegistry::default();
    let context = registry.create_context();
    let order = Rc::new(RefCell::new(Vec::new()));

    for name in ["first", "second", "third"] {
        let f = context.new_function(name, vec![], |_, _, _| Ok(Value::Undefined));
        let order = order.clone();
        let _token = context.register_destroy_notifier(f, move |_| order.borrow_mut().push(name));
    }

    registry.destroy_all();
    assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
}

#[test]
fn notifier_may_unregister_a_sibling_during_destroy() {
    let mut registry = ContextRegistry::default();
    let context = registry.create_context();
    let hits = Rc::new(Cell::new(0));

    let first = JsClosure::create(&context, counting_function(&context, &hits), "first", true);
    let second = JsClosure::create(&context, counting_function(&context, &hits), "second", true);

    // Invalidating `second` while `first`'s notifier runs withdraws a notifier
    // that was already taken for firing.
    let victim = second.clone();
    first.add_invalidate_notifier(move |_| victim.invalidate());

    let before = leak_detector::snapshot();
    registry.destroy(context.id());
    let after = leak_detector::snapshot();

    assert!(first.is_invalid() && second.is_invalid());
    assert_eq!(after.closures_invalidated - before.closures_invalidated, 2);
}

#[test]
fn closures_finalize_after_context_is_gone() {
    let mut registry = ContextRegistry::default();
    let context = registry.create_context();
    let hits = Rc::new(Cell::new(0));
    let closure = JsClosure::create(&context, counting_function(&context, &hits), "late", true);

    let before = leak_detector::snapshot();
    drop(registry);
    drop(context);
    drop(closure);
    let after = leak_detector::snapshot();

    assert_eq!(after.closures_finalized - before.closures_finalized, 1);
    assert_eq!(after.contexts_destroyed - before.contexts_destroyed, 1);
}

#[test]
fn pending_exception_at_teardown_is_cleared() {
    let mut registry = ContextRegistry::default();
    let context = registry.create_context();
    context.set_pending_exception(gcbridge::runtime::exception::Exception::new("late"));

    registry.destroy_all();
    assert!(!context.is_exception_pending());
}
