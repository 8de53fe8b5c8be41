//! Idle sources: closures dispatched repeatedly until they return a falsy value.

use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use crate::host::closure::{Closure, Marshal, NotifierId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(u64);

struct Source<T: 'static> {
    id: SourceId,
    closure: Closure<T>,
    notifier: NotifierId,
}

struct QueueInner<T: 'static> {
    sources: RefCell<Vec<Source<T>>>,
    next_id: Cell<u64>,
}

impl<T: 'static> QueueInner<T> {
    fn take_source(&self, id: SourceId) -> Option<Source<T>> {
        let mut sources = self.sources.borrow_mut();
        let position = sources.iter().position(|source| source.id == id)?;
        Some(sources.remove(position))
    }
}

pub struct SourceQueue<T: 'static> {
    inner: Rc<QueueInner<T>>,
}

impl<T: 'static> Clone for SourceQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> Default for SourceQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> SourceQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(QueueInner {
                sources: RefCell::new(Vec::new()),
                next_id: Cell::new(1),
            }),
        }
    }

    /// Adds an idle source. Invalidating the closure removes it.
    pub fn add(&self, closure: Closure<T>) -> Option<SourceId> {
        let id = SourceId(self.inner.next_id.get());

        let queue: Weak<QueueInner<T>> = Rc::downgrade(&self.inner);
        let notifier = closure.add_invalidate_notifier(move |_| {
            if let Some(queue) = queue.upgrade() {
                let removed = queue.take_source(id);
                drop(removed);
            }
        })?;

        self.inner.next_id.set(id.0 + 1);
        self.inner.sources.borrow_mut().push(Source {
            id,
            closure,
            notifier,
        });
        Some(id)
    }

    /// Removes a source and releases its reference. Returns `false` if it is gone.
    pub fn remove(&self, id: SourceId) -> bool {
        let Some(source) = self.inner.take_source(id) else {
            return false;
        };
        source.closure.remove_invalidate_notifier(source.notifier);
        true
    }

    pub fn contains(&self, id: SourceId) -> bool {
        self.inner
            .sources
            .borrow()
            .iter()
            .any(|source| source.id == id)
    }

    pub fn len(&self) -> usize {
        self.inner.sources.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let sources = std::mem::take(&mut *self.inner.sources.borrow_mut());
        for source in sources {
            source.closure.remove_invalidate_notifier(source.notifier);
        }
    }
}

impl<T: Marshal> SourceQueue<T> {
    /// Runs every source once. Sources returning a falsy value, or nothing, are
    /// removed. Returns how many sources ran.
    pub fn dispatch(&self) -> usize {
        let snapshot: Vec<(SourceId, Closure<T>)> = self
            .inner
            .sources
            .borrow()
            .iter()
            .map(|source| (source.id, source.closure.clone()))
            .collect();

        let mut dispatched = 0;
        for (id, closure) in snapshot {
            if !self.contains(id) || closure.is_invalid() {
                continue;
            }

            dispatched += 1;
            let keep = closure.call(&[]).is_some_and(|value| value.is_truthy());
            if !keep {
                self.remove(id);
            }
        }
        dispatched
    }
}
