/// Handle into the GC heap.
///
/// A `GcHandle` is a lightweight, copyable reference to a heap slot. Besides the slot
/// index it records the slot generation at allocation time, so a handle that outlives
/// its object is detected as stale instead of aliasing whatever the slot holds next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl GcHandle {
    /// Returns the raw heap slot index backing this handle.
    pub fn index(self) -> u32 {
        self.index
    }

    /// Returns the slot generation this handle was issued for.
    pub fn generation(self) -> u32 {
        self.generation
    }

    #[cfg(test)]
    pub fn new_for_test(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

/// Persistent root registered with [`GcHeap::add_root`](super::GcHeap::add_root).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootId(pub(crate) u32);
