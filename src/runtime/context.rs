//! Execution contexts.
//!
//! A [`Context`] owns one GC heap plus the per-context state the bridge relies on: the
//! pending-exception slot, the destroy-notifier table and the idle-collection flag.
//! Contexts are reference counted; the last strong [`Context`] to go away destroys it,
//! and [`WeakContext`] is the non-owning back-reference held by bridge objects.

use std::{
    cell::{Cell, Ref, RefCell, RefMut},
    collections::BTreeMap,
    fmt,
    rc::{Rc, Weak},
};

use serde::Serialize;

use crate::{
    config::GcConfig,
    runtime::{
        exception::Exception,
        function::{CallScope, Function, FunctionObject, NativeFn},
        gc::{GcHandle, GcHeap, GcStats, HeapObject, NativeData, NativeObject, RootId},
        leak_detector,
        value::Value,
    },
};

thread_local! {
    static NEXT_CONTEXT_ID: Cell<u64> = const { Cell::new(1) };
    static CURRENT_CONTEXT: RefCell<Option<WeakContext>> = const { RefCell::new(None) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        NEXT_CONTEXT_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            ContextId(id)
        })
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Registration returned by [`Context::register_destroy_notifier`].
///
/// Consumed by [`Context::unregister_destroy_notifier`], so a registration can be
/// withdrawn at most once.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct NotifierToken {
    context: ContextId,
    key: u64,
}

impl NotifierToken {
    pub fn context(&self) -> ContextId {
        self.context
    }
}

type DestroyCallback = Box<dyn FnOnce(Function)>;

struct DestroyNotifier {
    callable: Function,
    callback: DestroyCallback,
}

struct ContextInner {
    id: ContextId,
    config: GcConfig,
    heap: RefCell<GcHeap>,
    pending_exception: RefCell<Option<Exception>>,
    destroy_notifiers: RefCell<BTreeMap<u64, DestroyNotifier>>,
    next_notifier: Cell<u64>,
    destroyed: Cell<bool>,
    idle_gc_pending: Cell<bool>,
}

#[derive(Clone)]
pub struct Context {
    inner: Rc<ContextInner>,
}

#[derive(Clone)]
pub struct WeakContext {
    inner: Weak<ContextInner>,
}

impl WeakContext {
    /// Returns the context if it still exists and has not been destroyed.
    pub fn upgrade(&self) -> Option<Context> {
        self.inner
            .upgrade()
            .filter(|inner| !inner.destroyed.get())
            .map(|inner| Context { inner })
    }

    pub fn ptr_eq(&self, other: &WeakContext) -> bool {
        Weak::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for WeakContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.upgrade() {
            Some(inner) => write!(f, "WeakContext({})", inner.id),
            None => write!(f, "WeakContext(<gone>)"),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("destroyed", &self.inner.destroyed.get())
            .finish()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self::with_config(GcConfig::default())
    }

    pub fn with_config(config: GcConfig) -> Self {
        let id = ContextId::next();
        let heap = GcHeap::from_config(&config);
        leak_detector::record_context_created();
        log::debug!(target: "gcbridge::context", "created context {}", id);

        Self {
            inner: Rc::new(ContextInner {
                id,
                config,
                heap: RefCell::new(heap),
                pending_exception: RefCell::new(None),
                destroy_notifiers: RefCell::new(BTreeMap::new()),
                next_notifier: Cell::new(1),
                destroyed: Cell::new(false),
                idle_gc_pending: Cell::new(false),
            }),
        }
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn config(&self) -> &GcConfig {
        &self.inner.config
    }

    pub fn downgrade(&self) -> WeakContext {
        WeakContext {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn ptr_eq(&self, other: &Context) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Borrows the heap. Must not be held across calls back into the context.
    pub fn heap(&self) -> Ref<'_, GcHeap> {
        self.inner.heap.borrow()
    }

    pub(crate) fn heap_mut(&self) -> RefMut<'_, GcHeap> {
        self.inner.heap.borrow_mut()
    }

    pub fn stats(&self) -> GcStats {
        self.heap().stats()
    }

    // ----- allocation -----

    pub fn new_function<F>(&self, name: &str, captures: Vec<Value>, call: F) -> Function
    where
        F: Fn(&CallScope<'_>, &Value, &[Value]) -> Result<Value, Exception> + 'static,
    {
        let call: NativeFn = Rc::new(call);
        let object = FunctionObject::new(name, call, captures);
        Function::from_handle(self.heap_mut().alloc(HeapObject::Function(object)))
    }

    pub fn new_object(&self, class: &str, slots: Vec<Value>) -> GcHandle {
        self.heap_mut().alloc(HeapObject::Object {
            class: class.into(),
            slots,
        })
    }

    pub fn new_native(&self, data: Rc<dyn NativeData>) -> GcHandle {
        self.heap_mut()
            .alloc(HeapObject::Native(NativeObject { data }))
    }

    pub fn set_slot(&self, handle: GcHandle, index: usize, value: Value) -> bool {
        self.heap_mut().set_slot(handle, index, value)
    }

    pub fn native_data(&self, handle: GcHandle) -> Option<Rc<dyn NativeData>> {
        self.heap()
            .try_get(handle)
            .and_then(HeapObject::as_native)
            .map(|native| native.data.clone())
    }

    /// Returns `value` as a function handle if it refers to a live function.
    pub fn function_from_value(&self, value: &Value) -> Option<Function> {
        let handle = value.as_handle()?;
        let heap = self.heap();
        heap.try_get(handle)?.as_function()?;
        Some(Function::from_handle(handle))
    }

    pub fn is_live(&self, handle: GcHandle) -> bool {
        self.heap().is_live(handle)
    }

    /// Calls `function` with `this` and `args`.
    ///
    /// The function body runs without any heap borrow held, so it may allocate,
    /// collect or re-enter the bridge.
    pub fn call_function(
        &self,
        function: Function,
        this: &Value,
        args: &[Value],
    ) -> Result<Value, Exception> {
        let object = {
            let heap = self.heap();
            match heap.try_get(function.handle()).and_then(HeapObject::as_function) {
                Some(object) => object.clone(),
                None => return Err(Exception::new("called a collected or non-function object")),
            }
        };

        let scope = CallScope::new(self, function, &object.captures);
        (object.call)(&scope, this, args)
    }

    // ----- roots -----

    pub fn add_root(&self, handle: GcHandle) -> RootId {
        self.heap_mut().add_root(handle)
    }

    pub fn remove_root(&self, root: RootId) -> bool {
        self.heap_mut().remove_root(root)
    }

    /// Roots every object in `values` until the guard is dropped.
    pub fn root_values(&self, values: &[Value]) -> RootedValues {
        let mut heap = self.heap_mut();
        let mut roots = Vec::with_capacity(values.len());
        for handle in values.iter().filter_map(Value::as_handle) {
            if heap.is_live(handle) {
                roots.push(heap.add_root(handle));
            }
        }

        RootedValues {
            context: self.downgrade(),
            roots,
        }
    }

    // ----- pending exception -----

    pub fn set_pending_exception(&self, exception: Exception) {
        *self.inner.pending_exception.borrow_mut() = Some(exception);
    }

    pub fn take_pending_exception(&self) -> Option<Exception> {
        self.inner.pending_exception.borrow_mut().take()
    }

    pub fn is_exception_pending(&self) -> bool {
        self.inner.pending_exception.borrow().is_some()
    }

    /// Logs and clears a pending exception. Returns `true` if one was pending.
    pub fn log_pending_exception(&self, what: &str) -> bool {
        match self.take_pending_exception() {
            Some(exception) => {
                log::warn!(
                    target: "gcbridge::context",
                    "{}: {} ({})",
                    what,
                    exception,
                    self.inner.id
                );
                true
            }
            None => false,
        }
    }

    // ----- destroy notifiers -----

    /// Registers `callback` to be called with `callable` when this context is
    /// destroyed. Fires at most once; never fires after it was unregistered.
    pub fn register_destroy_notifier<F>(&self, callable: Function, callback: F) -> NotifierToken
    where
        F: FnOnce(Function) + 'static,
    {
        let key = self.inner.next_notifier.get();
        self.inner.next_notifier.set(key + 1);

        self.inner.destroy_notifiers.borrow_mut().insert(
            key,
            DestroyNotifier {
                callable,
                callback: Box::new(callback),
            },
        );

        NotifierToken {
            context: self.inner.id,
            key,
        }
    }

    /// Withdraws a registration. Returns `false` if it already fired or belongs to
    /// another context.
    pub fn unregister_destroy_notifier(&self, token: NotifierToken) -> bool {
        if token.context != self.inner.id {
            return false;
        }
        self.inner
            .destroy_notifiers
            .borrow_mut()
            .remove(&token.key)
            .is_some()
    }

    pub fn destroy_notifier_count(&self) -> usize {
        self.inner.destroy_notifiers.borrow().len()
    }

    // ----- collection -----

    /// Runs a full collection and finalizes what it reclaimed.
    pub fn gc(&self) {
        let reclaimed = self.heap_mut().collect();
        reclaimed.finalize();
    }

    /// Collects if the allocation threshold was reached. Returns `true` if it did.
    pub fn maybe_gc(&self) -> bool {
        let should_collect = self.heap().should_collect();
        if should_collect {
            self.gc();
        }
        should_collect
    }

    /// Runs a threshold collection if one is due and flags an idle full collection.
    pub fn schedule_gc_if_needed(&self) {
        if self.is_destroyed() {
            return;
        }
        self.maybe_gc();
        if !self.inner.idle_gc_pending.replace(true) {
            log::trace!(target: "gcbridge::context", "idle collection scheduled for {}", self.inner.id);
        }
    }

    pub fn is_idle_gc_pending(&self) -> bool {
        self.inner.idle_gc_pending.get()
    }

    /// Runs the flagged idle collection, if any. Returns `true` if one ran.
    pub fn run_idle_gc(&self) -> bool {
        if !self.inner.idle_gc_pending.replace(false) {
            return false;
        }
        self.gc();
        true
    }

    pub fn start_incremental_gc(&self) {
        self.heap_mut().start_incremental();
    }

    /// Scans one budgeted slice. Returns `true` once marking is complete.
    pub fn gc_slice(&self) -> bool {
        let budget = self.inner.config.slice_budget;
        self.heap_mut().mark_slice(budget)
    }

    pub fn finish_gc(&self) {
        let reclaimed = self.heap_mut().finish_incremental();
        reclaimed.finalize();
    }

    pub fn is_marking(&self) -> bool {
        self.heap().is_marking()
    }

    /// Read barrier; see [`GcHeap::pin`].
    pub fn pin(&self, handle: GcHandle) {
        self.heap_mut().pin(handle);
    }

    // ----- scope and teardown -----

    /// Makes this the thread's current context until the guard is dropped.
    pub fn enter(&self) -> ContextScope {
        let previous = CURRENT_CONTEXT.with(|current| current.replace(Some(self.downgrade())));
        ContextScope { previous }
    }

    pub fn current() -> Option<Context> {
        CURRENT_CONTEXT.with(|current| current.borrow().as_ref().and_then(WeakContext::upgrade))
    }

    /// Destroys the context: fires every registered destroy notifier, then reclaims
    /// the whole heap. Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        log::debug!(target: "gcbridge::context", "destroying context {}", self.inner.id);

        // Notifiers may unregister siblings or invalidate closures; none of that can
        // touch the map once it is taken.
        let notifiers = std::mem::take(&mut *self.inner.destroy_notifiers.borrow_mut());
        for (_, notifier) in notifiers {
            (notifier.callback)(notifier.callable);
        }

        self.log_pending_exception("Exception pending at context teardown");

        let reclaimed = self.heap_mut().teardown();
        log::debug!(
            target: "gcbridge::context",
            "context {} released {} objects",
            self.inner.id,
            reclaimed.len()
        );
        reclaimed.finalize();
        leak_detector::record_context_destroyed();
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if Rc::strong_count(&self.inner) == 1 && !self.inner.destroyed.get() {
            self.destroy();
        }
    }
}

/// Restores the previously current context on drop.
pub struct ContextScope {
    previous: Option<WeakContext>,
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_CONTEXT.with(|current| *current.borrow_mut() = previous);
    }
}

/// Temporary roots created by [`Context::root_values`].
pub struct RootedValues {
    context: WeakContext,
    roots: Vec<RootId>,
}

impl RootedValues {
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

impl Drop for RootedValues {
    fn drop(&mut self) {
        if let Some(context) = self.context.upgrade() {
            let mut heap = context.heap_mut();
            for root in self.roots.drain(..) {
                heap.remove_root(root);
            }
        }
    }
}
