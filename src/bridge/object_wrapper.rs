use std::{
    any::Any,
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use crate::{
    bridge::js_closure::{ClosureId, JsClosure},
    host::{
        closure::{Closure, NotifierId, WeakClosure},
        signal::{HandlerId, SignalEmitter},
    },
    runtime::{
        context::{Context, WeakContext},
        function::Function,
        gc::{GcHandle, NativeData, Trace, Tracer},
        value::Value,
    },
};

struct AssociatedClosure {
    id: ClosureId,
    closure: WeakClosure<JsClosure>,
    notifier: NotifierId,
}

/// Heap object standing in for a host object with signals.
///
/// Signal closures connected through the wrapper are managed: the wrapper traces their
/// callables while it is alive, and invalidates every one of them when it is collected.
pub struct ObjectWrapper {
    this: Weak<ObjectWrapper>,
    handle: Cell<Option<GcHandle>>,
    context: WeakContext,
    emitter: SignalEmitter<JsClosure>,
    closures: RefCell<Vec<AssociatedClosure>>,
    finalized: Cell<bool>,
}

impl ObjectWrapper {
    /// Allocates a wrapper on `context`'s heap. Unrooted, like any fresh object.
    pub fn new(context: &Context) -> Rc<ObjectWrapper> {
        let wrapper = Rc::new_cyclic(|this| ObjectWrapper {
            this: this.clone(),
            handle: Cell::new(None),
            context: context.downgrade(),
            emitter: SignalEmitter::new(),
            closures: RefCell::new(Vec::new()),
            finalized: Cell::new(false),
        });

        let handle = context.new_native(wrapper.clone());
        wrapper.handle.set(Some(handle));
        wrapper
    }

    /// Returns the wrapper behind `value`, if it is one.
    pub fn from_value(context: &Context, value: &Value) -> Option<Rc<ObjectWrapper>> {
        let data = context.native_data(value.as_handle()?)?;
        data.as_any_rc().downcast::<ObjectWrapper>().ok()
    }

    pub fn handle(&self) -> Option<GcHandle> {
        self.handle.get()
    }

    pub fn to_value(&self) -> Value {
        self.handle.get().map_or(Value::Undefined, Value::Object)
    }

    pub fn emitter(&self) -> &SignalEmitter<JsClosure> {
        &self.emitter
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.get()
    }

    /// Number of associated closures that have not been invalidated.
    pub fn closure_count(&self) -> usize {
        self.closures.borrow().len()
    }

    /// Connects `callable` to `signal` through a new signal closure.
    pub fn connect(&self, signal: &str, callable: Function) -> Option<HandlerId> {
        if self.finalized.get() {
            return None;
        }
        let context = self.context.upgrade()?;

        let description = format!("signal handler for '{}'", signal);
        let closure = JsClosure::create_for_signal(&context, callable, &description);
        self.associate_closure(&closure);
        self.emitter.connect(signal, closure)
    }

    pub fn disconnect(&self, id: HandlerId) -> bool {
        self.emitter.disconnect(id)
    }

    /// Emits `signal` with the wrapper itself as first argument.
    pub fn emit(&self, signal: &str, args: &[Value]) -> Option<Value> {
        let mut full_args = Vec::with_capacity(args.len() + 1);
        full_args.push(self.to_value());
        full_args.extend_from_slice(args);
        self.emitter.emit(signal, &full_args)
    }

    /// Finds the handler on `signal` whose closure calls `callable`.
    pub fn find_handler(&self, signal: &str, callable: Function) -> Option<HandlerId> {
        self.emitter
            .find_handler(signal, |bridge| bridge.callable() == Some(callable))
    }

    fn associate_closure(&self, closure: &Closure<JsClosure>) {
        let id = closure.data().id();
        let owner = self.this.clone();

        let notifier = closure.add_invalidate_notifier(move |_| {
            if let Some(owner) = owner.upgrade() {
                owner.forget_closure(id);
            }
        });

        if let Some(notifier) = notifier {
            self.closures.borrow_mut().push(AssociatedClosure {
                id,
                closure: closure.downgrade(),
                notifier,
            });
        }
    }

    fn forget_closure(&self, id: ClosureId) {
        self.closures
            .borrow_mut()
            .retain(|associated| associated.id != id);
    }

    fn invalidate_closures(&self) {
        // Our own notifiers go first so invalidation cannot re-enter the list.
        let closures = std::mem::take(&mut *self.closures.borrow_mut());
        for associated in closures {
            if let Some(closure) = associated.closure.upgrade() {
                closure.remove_invalidate_notifier(associated.notifier);
                closure.invalidate();
            }
        }
        self.emitter.dispose();
    }
}

impl Trace for ObjectWrapper {
    fn trace(&self, tracer: &mut dyn Tracer) {
        for associated in self.closures.borrow().iter() {
            if let Some(closure) = associated.closure.upgrade() {
                closure.data().trace(tracer);
            }
        }
    }
}

impl NativeData for ObjectWrapper {
    fn class_name(&self) -> &'static str {
        "ObjectWrapper"
    }

    fn finalize(&self) {
        if self.finalized.replace(true) {
            return;
        }
        log::debug!(
            target: "gcbridge::closure",
            "Finalizing object wrapper with {} signal closures",
            self.closure_count()
        );
        self.invalidate_closures();
    }

    fn as_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}
