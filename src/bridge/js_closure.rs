//! Host closures that call functions on the collected heap.
//!
//! A [`JsClosure`] is the payload of a host [`Closure`]. The host owns its lifetime
//! through reference counting, the collector owns the callable's, and the hooks
//! installed by [`JsClosure::create`] keep the two consistent:
//!
//! * host invalidation of a rooted closure unroots the callable and withdraws the
//!   context destroy notifier;
//! * host invalidation of a managed closure pins the callable for any running
//!   incremental cycle before dropping the reference;
//! * context destruction clears the handle first and then invalidates the host
//!   closure, whose invalidate hook then finds nothing left to do;
//! * finalization releases whatever is still held.
//!
//! The callable handle and the context reference are always cleared together.

use std::{
    cell::{Cell, RefCell},
    fmt,
};

use crate::{
    bridge::owned_callable::{
        CallableMode, CallableSlot, ManagedCallable, OwnedCallable, RootedCallable,
    },
    host::closure::{Closure, Marshal, WeakClosure},
    runtime::{
        context::{Context, WeakContext},
        exception::Exception,
        function::Function,
        gc::Tracer,
        leak_detector,
        value::Value,
    },
};

thread_local! {
    static NEXT_CLOSURE_ID: Cell<u64> = const { Cell::new(1) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClosureId(u64);

impl ClosureId {
    fn next() -> Self {
        NEXT_CLOSURE_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            ClosureId(id)
        })
    }
}

impl fmt::Display for ClosureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "closure#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvokeError {
    /// The closure no longer refers to a callable. Expected after invalidation.
    #[error("closure was invalidated")]
    Invalidated,
    #[error(transparent)]
    Exception(#[from] Exception),
}

pub struct JsClosure {
    id: ClosureId,
    description: String,
    callable: RefCell<OwnedCallable>,
    context: RefCell<Option<WeakContext>>,
}

impl fmt::Debug for JsClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsClosure")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("callable", &self.callable())
            .field("mode", &self.mode())
            .finish()
    }
}

impl JsClosure {
    /// Wraps `callable` in a new host closure holding one reference.
    ///
    /// With `root_function` the closure keeps the callable alive on its own; otherwise
    /// the caller must make the callable reachable from the heap for as long as the
    /// closure is valid (see [`ObjectWrapper`](crate::bridge::ObjectWrapper)).
    ///
    /// Panics if `context` is already destroyed.
    pub fn create(
        context: &Context,
        callable: Function,
        description: &str,
        root_function: bool,
    ) -> Closure<JsClosure> {
        assert!(
            !context.is_destroyed(),
            "cannot create a closure on a destroyed context"
        );

        let id = ClosureId::next();
        let closure = Closure::new_cyclic(|weak: &WeakClosure<JsClosure>| {
            let owned = if root_function {
                let weak = weak.clone();
                let mut rooted = RootedCallable::default();
                rooted.root(context, callable, move |callable| {
                    JsClosure::context_destroyed(&weak, callable)
                });
                OwnedCallable::Rooted(rooted)
            } else {
                let mut managed = ManagedCallable::default();
                managed.assign(context, callable);
                OwnedCallable::Managed(managed)
            };

            JsClosure {
                id,
                description: description.to_string(),
                callable: RefCell::new(owned),
                context: RefCell::new(Some(context.downgrade())),
            }
        });

        let hooked = if root_function {
            closure.add_invalidate_notifier(JsClosure::closure_invalidated)
        } else {
            closure.add_invalidate_notifier(JsClosure::closure_set_invalid)
        };
        debug_assert!(hooked.is_some());
        closure.add_finalize_notifier(JsClosure::closure_finalized);

        leak_detector::record_closure_created();
        log::debug!(
            target: "gcbridge::closure",
            "Create closure {} which calls function {:?} '{}'",
            id,
            callable,
            description
        );
        closure
    }

    /// Managed closure used for signal connections; the connected object traces it.
    pub fn create_for_signal(
        context: &Context,
        callable: Function,
        description: &str,
    ) -> Closure<JsClosure> {
        Self::create(context, callable, description, false)
    }

    pub fn id(&self) -> ClosureId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn mode(&self) -> CallableMode {
        self.callable.borrow().mode()
    }

    /// `true` while both the callable and its context are present.
    pub fn is_valid(&self) -> bool {
        self.callable().is_some()
    }

    /// The context, while the callable is live and the context still exists.
    pub fn context(&self) -> Option<Context> {
        if !self.callable.borrow().is_live() {
            return None;
        }
        self.context.borrow().as_ref().and_then(WeakContext::upgrade)
    }

    /// The callable, while its context still exists. A destroyed context takes
    /// every managed callable down with its heap.
    pub fn callable(&self) -> Option<Function> {
        self.context()?;
        self.callable.borrow().get()
    }

    pub fn trace(&self, tracer: &mut dyn Tracer) {
        self.callable.borrow().trace(tracer);
    }

    /// Calls the callable with `this` and `args`.
    ///
    /// A closure whose callable is gone returns [`InvokeError::Invalidated`]; the
    /// callable's own failure is returned as [`InvokeError::Exception`].
    pub fn invoke(&self, this: &Value, args: &[Value]) -> Result<Value, InvokeError> {
        let callable = self.callable.borrow().get();
        let Some(callable) = callable else {
            log::debug!(
                target: "gcbridge::closure",
                "Invoking invalidated closure {} '{}', ignoring",
                self.id,
                self.description
            );
            *self.context.borrow_mut() = None;
            return Err(InvokeError::Invalidated);
        };

        let context = self.context();
        let Some(context) = context.filter(|context| context.is_live(callable.handle())) else {
            log::debug!(
                target: "gcbridge::closure",
                "Closure {} outlived function {:?}, ignoring",
                self.id,
                callable
            );
            self.clear();
            return Err(InvokeError::Invalidated);
        };

        let _scope = context.enter();
        context.log_pending_exception("Exception was pending before invoking callback??? Not expected");

        let _this_root = context.root_values(std::slice::from_ref(this));
        let _arg_roots = context.root_values(args);

        match context.call_function(callable, this, args) {
            Err(exception) => {
                log::debug!(
                    target: "gcbridge::closure",
                    "Closure invocation failed: {}",
                    exception
                );
                Err(InvokeError::Exception(exception))
            }
            Ok(value) => {
                // The callable may have torn down its own context.
                if !context.is_destroyed() {
                    context.log_pending_exception(
                        "Closure invocation succeeded but an exception was set",
                    );
                    let _result_root = context.root_values(std::slice::from_ref(&value));
                    context.schedule_gc_if_needed();
                }
                Ok(value)
            }
        }
    }

    fn clear(&self) {
        self.callable.borrow_mut().reset();
        *self.context.borrow_mut() = None;
    }

    /// Invalidate hook for rooted closures.
    fn closure_invalidated(&self) {
        leak_detector::record_closure_invalidated();
        let callable = self.callable.borrow().get();
        log::debug!(
            target: "gcbridge::closure",
            "Invalidating closure {} which calls function {:?}",
            self.id,
            callable
        );

        if callable.is_none() {
            log::debug!(target: "gcbridge::closure", "   (closure already dead, nothing to do)");
            return;
        }

        log::debug!(
            target: "gcbridge::closure",
            "   (context was alive, removing our destroy notifier)"
        );
        self.clear();
    }

    /// Invalidate hook for managed closures.
    fn closure_set_invalid(&self) {
        leak_detector::record_closure_invalidated();
        log::debug!(
            target: "gcbridge::closure",
            "Invalidating signal closure {} which calls function {:?}",
            self.id,
            self.callable.borrow().get()
        );

        // The callable may be reachable only through the object being swept.
        self.callable.borrow().prevent_collection();
        self.clear();
    }

    fn closure_finalized(&self) {
        self.clear();
        leak_detector::record_closure_finalized();
        log::debug!(target: "gcbridge::closure", "Finalizing closure {}", self.id);
    }

    fn context_destroyed(weak: &WeakClosure<JsClosure>, callable: Function) {
        let Some(closure) = weak.upgrade() else {
            return;
        };
        let bridge = closure.data();

        // The context is already marked destroyed here, so read the slot directly.
        let current = bridge.callable.borrow().get();
        if let Some(current) = current {
            assert_eq!(
                current, callable,
                "context destroy notifier fired for a callable closure {} does not own",
                bridge.id
            );
        }

        log::debug!(
            target: "gcbridge::closure",
            "Context destroy notifier on closure {} which calls object {:?}",
            bridge.id,
            callable
        );

        bridge.clear();
        closure.invalidate();
    }
}

impl Marshal for JsClosure {
    fn marshal(closure: &Closure<Self>, args: &[Value]) -> Option<Value> {
        let bridge = closure.data();
        match bridge.invoke(&Value::Undefined, args) {
            Ok(value) => Some(value),
            Err(InvokeError::Invalidated) => {
                closure.invalidate();
                None
            }
            Err(InvokeError::Exception(exception)) => {
                log::warn!(
                    target: "gcbridge::closure",
                    "Callback '{}' threw: {}",
                    bridge.description,
                    exception
                );
                None
            }
        }
    }
}
