//! Named signals with closure handlers.
//!
//! An emitter holds one reference on every connected closure. Connecting also adds an
//! invalidate notifier, so a closure invalidated elsewhere disconnects itself.

use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use crate::{
    host::closure::{Closure, Marshal, NotifierId},
    runtime::value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId(u64);

struct Handler<T: 'static> {
    id: HandlerId,
    signal: Rc<str>,
    closure: Closure<T>,
    notifier: Option<NotifierId>,
    block_count: Cell<u32>,
}

struct EmitterInner<T: 'static> {
    handlers: RefCell<Vec<Handler<T>>>,
    next_id: Cell<u64>,
}

impl<T: 'static> EmitterInner<T> {
    fn take_handler(&self, id: HandlerId) -> Option<Handler<T>> {
        let mut handlers = self.handlers.borrow_mut();
        let position = handlers.iter().position(|handler| handler.id == id)?;
        Some(handlers.remove(position))
    }
}

pub struct SignalEmitter<T: 'static> {
    inner: Rc<EmitterInner<T>>,
}

impl<T: 'static> Clone for SignalEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> Default for SignalEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> SignalEmitter<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(EmitterInner {
                handlers: RefCell::new(Vec::new()),
                next_id: Cell::new(1),
            }),
        }
    }

    /// Connects `closure` to `signal`, taking a reference on it.
    ///
    /// Returns `None` if the closure is already invalid.
    pub fn connect(&self, signal: &str, closure: Closure<T>) -> Option<HandlerId> {
        let id = HandlerId(self.inner.next_id.get());

        let emitter: Weak<EmitterInner<T>> = Rc::downgrade(&self.inner);
        let notifier = closure.add_invalidate_notifier(move |_| {
            if let Some(emitter) = emitter.upgrade() {
                // Released after the borrow ends; dropping may finalize the closure.
                let removed = emitter.take_handler(id);
                drop(removed);
            }
        })?;

        self.inner.next_id.set(id.0 + 1);
        self.inner.handlers.borrow_mut().push(Handler {
            id,
            signal: signal.into(),
            closure,
            notifier: Some(notifier),
            block_count: Cell::new(0),
        });
        Some(id)
    }

    /// Disconnects a handler and releases the emitter's reference on its closure.
    /// Returns `false` if the handler is not connected.
    pub fn disconnect(&self, id: HandlerId) -> bool {
        let Some(handler) = self.inner.take_handler(id) else {
            return false;
        };

        if let Some(notifier) = handler.notifier {
            handler.closure.remove_invalidate_notifier(notifier);
        }
        true
    }

    /// Disconnects every handler.
    pub fn dispose(&self) {
        let handlers = std::mem::take(&mut *self.inner.handlers.borrow_mut());
        for handler in handlers {
            if let Some(notifier) = handler.notifier {
                handler.closure.remove_invalidate_notifier(notifier);
            }
        }
    }

    pub fn handler_is_connected(&self, id: HandlerId) -> bool {
        self.inner
            .handlers
            .borrow()
            .iter()
            .any(|handler| handler.id == id)
    }

    pub fn handler_count(&self) -> usize {
        self.inner.handlers.borrow().len()
    }

    pub fn handlers_for(&self, signal: &str) -> Vec<HandlerId> {
        self.inner
            .handlers
            .borrow()
            .iter()
            .filter(|handler| &*handler.signal == signal)
            .map(|handler| handler.id)
            .collect()
    }

    /// Finds the first handler on `signal` whose closure payload satisfies `predicate`.
    pub fn find_handler<P>(&self, signal: &str, predicate: P) -> Option<HandlerId>
    where
        P: Fn(&T) -> bool,
    {
        self.inner
            .handlers
            .borrow()
            .iter()
            .find(|handler| &*handler.signal == signal && predicate(handler.closure.data()))
            .map(|handler| handler.id)
    }

    pub fn closure(&self, id: HandlerId) -> Option<Closure<T>> {
        self.inner
            .handlers
            .borrow()
            .iter()
            .find(|handler| handler.id == id)
            .map(|handler| handler.closure.clone())
    }

    pub fn block(&self, id: HandlerId) -> bool {
        self.with_handler(id, |handler| {
            handler.block_count.set(handler.block_count.get() + 1)
        })
    }

    pub fn unblock(&self, id: HandlerId) -> bool {
        self.with_handler(id, |handler| {
            handler
                .block_count
                .set(handler.block_count.get().saturating_sub(1))
        })
    }

    fn with_handler<F>(&self, id: HandlerId, f: F) -> bool
    where
        F: FnOnce(&Handler<T>),
    {
        let handlers = self.inner.handlers.borrow();
        match handlers.iter().find(|handler| handler.id == id) {
            Some(handler) => {
                f(handler);
                true
            }
            None => false,
        }
    }

    fn is_runnable(&self, id: HandlerId) -> bool {
        self.inner
            .handlers
            .borrow()
            .iter()
            .any(|handler| handler.id == id && handler.block_count.get() == 0)
    }
}

impl<T: Marshal> SignalEmitter<T> {
    /// Calls every unblocked handler of `signal` in connection order and returns the
    /// last value produced.
    ///
    /// Handlers disconnected, blocked or invalidated by an earlier handler in the same
    /// emission are skipped.
    pub fn emit(&self, signal: &str, args: &[Value]) -> Option<Value> {
        let snapshot: Vec<(HandlerId, Closure<T>)> = self
            .inner
            .handlers
            .borrow()
            .iter()
            .filter(|handler| &*handler.signal == signal && handler.block_count.get() == 0)
            .map(|handler| (handler.id, handler.closure.clone()))
            .collect();

        let mut result = None;
        for (id, closure) in snapshot {
            if !self.is_runnable(id) || closure.is_invalid() {
                continue;
            }
            if let Some(value) = closure.call(args) {
                result = Some(value);
            }
        }
        result
    }
}
