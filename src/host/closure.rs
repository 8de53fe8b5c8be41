//! Reference-counted host closures.
//!
//! A [`Closure`] is the host framework's handle to something callable. Cloning takes a
//! reference, dropping releases one. A closure is *invalidated* at most once, either
//! explicitly through [`Closure::invalidate`] or implicitly when the last reference
//! goes away, and is *finalized* once, when the last reference goes away. Invalidate
//! notifiers always run before finalize notifiers.

use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
};

use crate::runtime::value::Value;

/// Identifies an invalidate notifier for [`Closure::remove_invalidate_notifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotifierId(u64);

type Notifier<T> = Box<dyn FnOnce(&T)>;

struct ClosureInner<T: 'static> {
    data: T,
    invalid: Cell<bool>,
    next_notifier: Cell<u64>,
    invalidate_notifiers: RefCell<Vec<(NotifierId, Notifier<T>)>>,
    finalize_notifiers: RefCell<Vec<Notifier<T>>>,
}

impl<T: 'static> ClosureInner<T> {
    fn new(data: T) -> Self {
        Self {
            data,
            invalid: Cell::new(false),
            next_notifier: Cell::new(1),
            invalidate_notifiers: RefCell::new(Vec::new()),
            finalize_notifiers: RefCell::new(Vec::new()),
        }
    }
}

impl<T: 'static> Drop for ClosureInner<T> {
    fn drop(&mut self) {
        if !self.invalid.replace(true) {
            let notifiers = std::mem::take(self.invalidate_notifiers.get_mut());
            for (_, notify) in notifiers {
                notify(&self.data);
            }
        }

        let notifiers = std::mem::take(self.finalize_notifiers.get_mut());
        for notify in notifiers {
            notify(&self.data);
        }
    }
}

pub struct Closure<T: 'static> {
    inner: Rc<ClosureInner<T>>,
}

pub struct WeakClosure<T: 'static> {
    inner: Weak<ClosureInner<T>>,
}

impl<T: 'static> Clone for Closure<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> Clone for WeakClosure<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> fmt::Debug for Closure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("ptr", &Rc::as_ptr(&self.inner))
            .field("refs", &Rc::strong_count(&self.inner))
            .field("invalid", &self.inner.invalid.get())
            .finish()
    }
}

impl<T: 'static> fmt::Debug for WeakClosure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakClosure({:p})", self.inner.as_ptr())
    }
}

impl<T: 'static> Closure<T> {
    pub fn new(data: T) -> Self {
        Self {
            inner: Rc::new(ClosureInner::new(data)),
        }
    }

    /// Builds a closure whose payload needs a weak reference to its own closure.
    pub fn new_cyclic<F>(build: F) -> Self
    where
        F: FnOnce(&WeakClosure<T>) -> T,
    {
        let inner = Rc::new_cyclic(|weak| {
            let weak = WeakClosure {
                inner: weak.clone(),
            };
            ClosureInner::new(build(&weak))
        });
        Self { inner }
    }

    pub fn data(&self) -> &T {
        &self.inner.data
    }

    pub fn is_invalid(&self) -> bool {
        self.inner.invalid.get()
    }

    /// Number of references currently held.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    pub fn downgrade(&self) -> WeakClosure<T> {
        WeakClosure {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn ptr_eq(&self, other: &Closure<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Marks the closure invalid and runs its invalidate notifiers. Idempotent.
    ///
    /// A reference is held for the duration, so notifiers may drop the caller's last
    /// reference without finalizing the closure underneath them.
    pub fn invalidate(&self) {
        if self.inner.invalid.replace(true) {
            return;
        }

        let _hold = self.clone();
        let notifiers = std::mem::take(&mut *self.inner.invalidate_notifiers.borrow_mut());
        for (_, notify) in notifiers {
            notify(&self.inner.data);
        }
    }

    /// Adds a notifier run when the closure is invalidated. Returns `None` if the
    /// closure is already invalid.
    pub fn add_invalidate_notifier<F>(&self, notify: F) -> Option<NotifierId>
    where
        F: FnOnce(&T) + 'static,
    {
        if self.is_invalid() {
            return None;
        }

        let id = NotifierId(self.inner.next_notifier.get());
        self.inner.next_notifier.set(id.0 + 1);
        self.inner
            .invalidate_notifiers
            .borrow_mut()
            .push((id, Box::new(notify)));
        Some(id)
    }

    pub fn remove_invalidate_notifier(&self, id: NotifierId) -> bool {
        let mut notifiers = self.inner.invalidate_notifiers.borrow_mut();
        let Some(position) = notifiers.iter().position(|(candidate, _)| *candidate == id) else {
            return false;
        };

        // Dropping the boxed notifier may release captured closures.
        let removed = notifiers.remove(position);
        drop(notifiers);
        drop(removed);
        true
    }

    /// Adds a notifier run once, when the last reference is dropped.
    pub fn add_finalize_notifier<F>(&self, notify: F)
    where
        F: FnOnce(&T) + 'static,
    {
        self.inner
            .finalize_notifiers
            .borrow_mut()
            .push(Box::new(notify));
    }
}

impl<T: 'static> WeakClosure<T> {
    pub fn upgrade(&self) -> Option<Closure<T>> {
        self.inner.upgrade().map(|inner| Closure { inner })
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    pub fn points_to(&self, closure: &Closure<T>) -> bool {
        std::ptr::eq(self.inner.as_ptr(), Rc::as_ptr(&closure.inner))
    }
}

/// Converts a host call into a call on the closure payload.
pub trait Marshal: Sized + 'static {
    /// Runs the payload with `args`. `None` means no value was produced.
    fn marshal(closure: &Closure<Self>, args: &[Value]) -> Option<Value>;
}

impl<T: Marshal> Closure<T> {
    /// Invokes the closure through its marshaller. Invalid closures are not called.
    pub fn call(&self, args: &[Value]) -> Option<Value> {
        if self.is_invalid() {
            return None;
        }

        // Keeps the payload alive if the callee drops the caller's reference.
        let hold = self.clone();
        T::marshal(&hold, args)
    }
}
