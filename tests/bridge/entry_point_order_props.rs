use std::{cell::Cell, rc::Rc};

use gcbridge::{
    bridge::{InvokeError, JsClosure},
    host::Closure,
    runtime::{context::Context, leak_detector, value::Value},
};
use proptest::prelude::*;

#[path = "../common/mod.rs"]
mod common;

use common::counting_function;

#[derive(Debug, Clone, Copy)]
enum Op {
    Invoke,
    Invalidate,
    DestroyContext,
    CloneRef,
    DropRef,
    Collect,
    StartIncremental,
    MarkSlice,
    FinishIncremental,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Invoke),
        1 => Just(Op::Invalidate),
        1 => Just(Op::DestroyContext),
        2 => Just(Op::CloneRef),
        2 => Just(Op::DropRef),
        1 => Just(Op::Collect),
        1 => Just(Op::StartIncremental),
        1 => Just(Op::MarkSlice),
        1 => Just(Op::FinishIncremental),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn lifecycle_entry_points_in_any_order(
        rooted in any::<bool>(),
        ops in prop::collection::vec(op_strategy(), 0..32),
    ) {
        let before = leak_detector::snapshot();
        let context = Context::new();
        let hits = Rc::new(Cell::new(0));
        let f = counting_function(&context, &hits);
        // Managed closures rely on something else keeping the callable reachable.
        let _keep_alive = context.add_root(f.handle());

        let mut refs: Vec<Closure<JsClosure>> = vec![JsClosure::create(&context, f, "prop", rooted)];
        let weak = refs[0].downgrade();
        let mut was_invalidated = false;

        for op in ops {
            match op {
                Op::Invoke => {
                    if let Some(closure) = refs.first() {
                        let runnable = closure.data().is_valid() && !context.is_destroyed();
                        let calls = hits.get();
                        let result = closure.data().invoke(&Value::Undefined, &[]);
                        if runnable {
                            prop_assert!(result.is_ok());
                            prop_assert_eq!(hits.get(), calls + 1);
                        } else {
                            prop_assert_eq!(result, Err(InvokeError::Invalidated));
                            prop_assert_eq!(hits.get(), calls);
                        }
                    }
                }
                Op::Invalidate => {
                    if let Some(closure) = refs.first() {
                        closure.invalidate();
                    }
                }
                Op::DestroyContext => context.destroy(),
                Op::CloneRef => {
                    if let Some(closure) = refs.first() {
                        refs.push(closure.clone());
                    }
                }
                Op::DropRef => {
                    refs.pop();
                }
                Op::Collect => context.gc(),
                Op::StartIncremental => context.start_incremental_gc(),
                Op::MarkSlice => {
                    context.gc_slice();
                }
                Op::FinishIncremental => context.finish_gc(),
            }

            if let Some(closure) = refs.first() {
                if was_invalidated {
                    prop_assert!(closure.is_invalid());
                    prop_assert!(!closure.data().is_valid());
                }
                if closure.is_invalid() {
                    was_invalidated = true;
                    prop_assert!(!closure.data().is_valid());
                    prop_assert!(closure.data().context().is_none());
                }
            }

            let now = leak_detector::snapshot();
            prop_assert!(now.closures_invalidated - before.closures_invalidated <= 1);
            prop_assert!(now.closures_finalized - before.closures_finalized <= 1);
            if weak.is_alive() {
                prop_assert_eq!(now.closures_finalized, before.closures_finalized);
            }
        }

        drop(refs);
        let after = leak_detector::snapshot();
        prop_assert!(!weak.is_alive());
        prop_assert_eq!(after.closures_created - before.closures_created, 1);
        prop_assert_eq!(after.closures_invalidated - before.closures_invalidated, 1);
        prop_assert_eq!(after.closures_finalized - before.closures_finalized, 1);

        context.destroy();
        prop_assert_eq!(context.heap().root_count(), 0);
    }
}
