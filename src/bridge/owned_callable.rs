//! Owning references from the host side to a callable on the GC heap.
//!
//! A *rooted* handle keeps its callable alive through a persistent root and learns
//! about context teardown from a destroy notifier. A *managed* handle keeps nothing
//! alive: something else on the heap (usually the object the closure is connected to)
//! traces it, and the handle only needs the read barrier before it lets go.

use crate::runtime::{
    context::{Context, NotifierToken, WeakContext},
    function::Function,
    gc::{RootId, Tracer},
};

pub const CALLABLE_EDGE_NAME: &str = "signal connection";

/// What the bridge needs from either kind of handle.
pub trait CallableSlot {
    /// The callable, or `None` once the handle is dead.
    fn get(&self) -> Option<Function>;

    fn is_live(&self) -> bool {
        self.get().is_some()
    }

    /// Reports the callable edge when live.
    fn trace(&self, tracer: &mut dyn Tracer) {
        if let Some(callable) = self.get() {
            tracer.trace_edge(callable.handle(), CALLABLE_EDGE_NAME);
        }
    }

    /// Releases everything the handle holds and makes it dead. Idempotent.
    fn reset(&mut self);

    /// Keeps the callable alive through a collection that is currently marking.
    fn prevent_collection(&self);
}

fn pin(context: Option<&WeakContext>, callable: Option<Function>) {
    if let (Some(context), Some(callable)) = (context.and_then(WeakContext::upgrade), callable) {
        context.pin(callable.handle());
    }
}

#[derive(Debug, Default)]
pub struct RootedCallable {
    callable: Option<Function>,
    root: Option<RootId>,
    notifier: Option<NotifierToken>,
    context: Option<WeakContext>,
}

impl RootedCallable {
    /// Roots `callable` on `context` and registers `on_context_destroyed` to run with
    /// the callable if the context is destroyed first.
    ///
    /// The handle must be dead.
    pub fn root<F>(&mut self, context: &Context, callable: Function, on_context_destroyed: F)
    where
        F: FnOnce(Function) + 'static,
    {
        debug_assert!(self.callable.is_none(), "rooting a live callable handle");
        self.reset();

        self.root = Some(context.add_root(callable.handle()));
        self.notifier = Some(context.register_destroy_notifier(callable, on_context_destroyed));
        self.context = Some(context.downgrade());
        self.callable = Some(callable);
    }

    pub fn has_destroy_notifier(&self) -> bool {
        self.notifier.is_some()
    }
}

impl CallableSlot for RootedCallable {
    fn get(&self) -> Option<Function> {
        self.callable
    }

    fn reset(&mut self) {
        self.callable = None;
        let root = self.root.take();
        let notifier = self.notifier.take();

        // A destroyed context has already fired our notifier and dropped every root.
        let Some(context) = self.context.take().and_then(|context| context.upgrade()) else {
            return;
        };
        if let Some(token) = notifier {
            context.unregister_destroy_notifier(token);
        }
        if let Some(root) = root {
            context.remove_root(root);
        }
    }

    fn prevent_collection(&self) {
        pin(self.context.as_ref(), self.callable);
    }
}

#[derive(Debug, Default)]
pub struct ManagedCallable {
    callable: Option<Function>,
    context: Option<WeakContext>,
}

impl ManagedCallable {
    /// Points the handle at `callable` without rooting it.
    pub fn assign(&mut self, context: &Context, callable: Function) {
        self.callable = Some(callable);
        self.context = Some(context.downgrade());
    }
}

impl CallableSlot for ManagedCallable {
    fn get(&self) -> Option<Function> {
        self.callable
    }

    fn reset(&mut self) {
        self.callable = None;
        self.context = None;
    }

    fn prevent_collection(&self) {
        pin(self.context.as_ref(), self.callable);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallableMode {
    Rooted,
    Managed,
}

/// A callable handle in either ownership mode; the mode is fixed at construction.
#[derive(Debug)]
pub enum OwnedCallable {
    Rooted(RootedCallable),
    Managed(ManagedCallable),
}

impl OwnedCallable {
    pub fn mode(&self) -> CallableMode {
        match self {
            OwnedCallable::Rooted(_) => CallableMode::Rooted,
            OwnedCallable::Managed(_) => CallableMode::Managed,
        }
    }

    fn slot(&self) -> &dyn CallableSlot {
        match self {
            OwnedCallable::Rooted(rooted) => rooted,
            OwnedCallable::Managed(managed) => managed,
        }
    }
}

impl CallableSlot for OwnedCallable {
    fn get(&self) -> Option<Function> {
        self.slot().get()
    }

    fn reset(&mut self) {
        match self {
            OwnedCallable::Rooted(rooted) => rooted.reset(),
            OwnedCallable::Managed(managed) => managed.reset(),
        }
    }

    fn prevent_collection(&self) {
        self.slot().prevent_collection()
    }
}
