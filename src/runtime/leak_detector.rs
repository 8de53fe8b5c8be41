use std::cell::Cell;

use serde::Serialize;

/// Lifecycle counters for bridge closures and contexts on the current thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LeakStats {
    pub closures_created: usize,
    pub closures_invalidated: usize,
    pub closures_finalized: usize,
    pub contexts_created: usize,
    pub contexts_destroyed: usize,
}

impl LeakStats {
    /// Closures created but not yet finalized.
    pub fn live_closures(&self) -> usize {
        self.closures_created - self.closures_finalized
    }

    pub fn live_contexts(&self) -> usize {
        self.contexts_created - self.contexts_destroyed
    }
}

thread_local! {
    static CLOSURES_CREATED: Cell<usize> = const { Cell::new(0) };
    static CLOSURES_INVALIDATED: Cell<usize> = const { Cell::new(0) };
    static CLOSURES_FINALIZED: Cell<usize> = const { Cell::new(0) };
    static CONTEXTS_CREATED: Cell<usize> = const { Cell::new(0) };
    static CONTEXTS_DESTROYED: Cell<usize> = const { Cell::new(0) };
}

fn bump(counter: &'static std::thread::LocalKey<Cell<usize>>) {
    counter.with(|c| c.set(c.get() + 1));
}

pub fn record_closure_created() {
    bump(&CLOSURES_CREATED);
}

pub fn record_closure_invalidated() {
    bump(&CLOSURES_INVALIDATED);
}

pub fn record_closure_finalized() {
    bump(&CLOSURES_FINALIZED);
}

pub fn record_context_created() {
    bump(&CONTEXTS_CREATED);
}

pub fn record_context_destroyed() {
    bump(&CONTEXTS_DESTROYED);
}

pub fn snapshot() -> LeakStats {
    LeakStats {
        closures_created: CLOSURES_CREATED.with(Cell::get),
        closures_invalidated: CLOSURES_INVALIDATED.with(Cell::get),
        closures_finalized: CLOSURES_FINALIZED.with(Cell::get),
        contexts_created: CONTEXTS_CREATED.with(Cell::get),
        contexts_destroyed: CONTEXTS_DESTROYED.with(Cell::get),
    }
}
