use serde::Serialize;

use crate::{
    config::GcConfig,
    runtime::gc::{
        gc_handle::{GcHandle, RootId},
        heap_entry::HeapEntry,
        heap_object::HeapObject,
        tracer::{EdgeBuffer, Trace, Tracer},
    },
    runtime::value::Value,
};

const DEFAULT_GC_THRESHOLD: usize = 10_000;
const MIN_GC_THRESHOLD: usize = 1024;
const MAX_GC_THRESHOLD: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Marking,
}

/// Point-in-time heap counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GcStats {
    pub live_objects: usize,
    pub capacity: usize,
    pub free_slots: usize,
    pub roots: usize,
    pub threshold: usize,
    pub total_allocations: usize,
    pub total_collections: usize,
    pub total_pins: usize,
}

/// Objects reclaimed by a collection.
///
/// Native finalizers and the drop glue of reclaimed functions may re-enter the heap
/// owner, so they run from [`Reclaimed::finalize`] once the caller has released its
/// borrow of the heap.
#[must_use = "reclaimed objects must be finalized outside the heap borrow"]
pub struct Reclaimed {
    objects: Vec<HeapObject>,
}

impl Reclaimed {
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Runs every native finalizer, then drops the reclaimed objects.
    pub fn finalize(self) {
        for object in &self.objects {
            if let Some(native) = object.as_native() {
                native.data.finalize();
            }
        }
    }
}

/// Non-moving mark-and-sweep heap with incremental marking.
///
/// Collections are snapshot-at-the-beginning: roots are greyed when marking starts,
/// objects allocated while marking are born marked, and [`GcHeap::pin`] is the read
/// barrier for references that are about to disappear mid-cycle. Collections only run
/// when the owner asks for one; allocation never collects.
pub struct GcHeap {
    entries: Vec<Option<HeapEntry>>,
    generations: Vec<u32>,
    free_list: Vec<u32>,
    roots: Vec<Option<GcHandle>>,
    roots_free: Vec<u32>,
    worklist: Vec<GcHandle>,
    edge_scratch: Vec<GcHandle>,
    phase: Phase,
    live_at_start: usize,
    allocation_count: usize,
    gc_threshold: usize,
    gc_enabled: bool,
    adaptive: bool,
    total_collections: usize,
    total_allocations: usize,
    total_pins: usize,
}

impl Default for GcHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl GcHeap {
    /// Creates a new GC heap with default collection settings.
    ///
    /// Defaults:
    /// - threshold: `10_000` allocations
    /// - GC enabled: `true`
    /// - adaptive threshold: `true`
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            roots: Vec::new(),
            roots_free: Vec::new(),
            worklist: Vec::with_capacity(16),
            edge_scratch: Vec::new(),
            phase: Phase::Idle,
            live_at_start: 0,
            allocation_count: 0,
            gc_threshold: DEFAULT_GC_THRESHOLD,
            gc_enabled: true,
            adaptive: true,
            total_collections: 0,
            total_allocations: 0,
            total_pins: 0,
        }
    }

    /// Creates a new heap with a custom GC allocation threshold.
    ///
    /// Unlike [`Self::set_threshold`], this does not clamp to `MIN_GC_THRESHOLD`.
    pub fn with_threshold(threshold: usize) -> Self {
        let mut heap = Self::new();
        heap.gc_threshold = threshold;
        heap
    }

    pub fn from_config(config: &GcConfig) -> Self {
        let mut heap = Self::with_threshold(config.threshold);
        heap.gc_enabled = config.enabled;
        heap.adaptive = config.adaptive;
        heap
    }

    /// Enables or disables automatic collection checks.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.gc_enabled = enabled
    }

    /// Sets the allocation threshold that triggers collection.
    ///
    /// Values below `MIN_GC_THRESHOLD` are clamped upward.
    pub fn set_threshold(&mut self, threshold: usize) {
        self.gc_threshold = threshold.max(MIN_GC_THRESHOLD)
    }

    pub fn threshold(&self) -> usize {
        self.gc_threshold
    }

    /// Returns `true` when GC is enabled and the threshold was reached.
    pub fn should_collect(&self) -> bool {
        self.gc_enabled && self.allocation_count >= self.gc_threshold
    }

    /// Returns `true` between [`Self::start_incremental`] and the end of the cycle.
    pub fn is_marking(&self) -> bool {
        self.phase == Phase::Marking
    }

    /// Allocates a new heap object and returns a handle to it.
    ///
    /// Freed slots are reused through the internal free-list before growing
    /// the storage vector.
    pub fn alloc(&mut self, object: HeapObject) -> GcHandle {
        self.allocation_count += 1;
        self.total_allocations += 1;

        let marking = self.phase == Phase::Marking;
        let entry = HeapEntry {
            object,
            marked: marking,
        };

        let handle = if let Some(idx) = self.free_list.pop() {
            self.entries[idx as usize] = Some(entry);
            GcHandle {
                index: idx,
                generation: self.generations[idx as usize],
            }
        } else {
            let idx = self.entries.len() as u32;
            self.entries.push(Some(entry));
            self.generations.push(0);
            GcHandle {
                index: idx,
                generation: 0,
            }
        };

        if marking {
            // Born marked, but its children still need scanning.
            self.worklist.push(handle);
        }
        handle
    }

    /// Returns the live object behind `handle`, or `None` for stale and free handles.
    pub fn try_get(&self, handle: GcHandle) -> Option<&HeapObject> {
        self.entry(handle).map(|entry| &entry.object)
    }

    /// Returns `true` if `handle` still refers to the object it was issued for.
    pub fn is_live(&self, handle: GcHandle) -> bool {
        self.entry(handle).is_some()
    }

    fn entry(&self, handle: GcHandle) -> Option<&HeapEntry> {
        let idx = handle.index as usize;
        if self.generations.get(idx).copied() != Some(handle.generation) {
            return None;
        }
        self.entries[idx].as_ref()
    }

    /// Overwrites slot `index` of a plain object. Returns `false` if `handle` is not a
    /// live plain object or the slot is out of range.
    pub fn set_slot(&mut self, handle: GcHandle, index: usize, value: Value) -> bool {
        let idx = handle.index as usize;
        if self.generations.get(idx).copied() != Some(handle.generation) {
            return false;
        }

        let previous = match self.entries[idx].as_mut().map(|entry| &mut entry.object) {
            Some(HeapObject::Object { slots, .. }) if index < slots.len() => {
                std::mem::replace(&mut slots[index], value)
            }
            _ => return false,
        };

        // Pre-write barrier: the overwritten edge was part of the snapshot.
        if let Value::Object(old) = previous
            && self.phase == Phase::Marking
        {
            self.mark_grey(old);
        }
        true
    }

    /// Adds a persistent root, keeping `handle` live until the returned [`RootId`] is
    /// removed.
    pub fn add_root(&mut self, handle: GcHandle) -> RootId {
        debug_assert!(self.is_live(handle), "rooting a dead handle");

        if self.phase == Phase::Marking {
            self.mark_grey(handle);
        }

        if let Some(idx) = self.roots_free.pop() {
            self.roots[idx as usize] = Some(handle);
            RootId(idx)
        } else {
            self.roots.push(Some(handle));
            RootId(self.roots.len() as u32 - 1)
        }
    }

    /// Removes a persistent root. Returns `false` if it was already removed.
    pub fn remove_root(&mut self, root: RootId) -> bool {
        match self.roots.get_mut(root.0 as usize) {
            Some(slot @ Some(_)) => {
                *slot = None;
                self.roots_free.push(root.0);
                true
            }
            _ => false,
        }
    }

    pub fn root_count(&self) -> usize {
        self.roots.len() - self.roots_free.len()
    }

    /// Read barrier for a reference that is about to be dropped.
    ///
    /// While an incremental cycle is marking, the object is marked so the cycle cannot
    /// reclaim it. Outside of marking, and for stale handles, this only counts the request.
    pub fn pin(&mut self, handle: GcHandle) {
        self.total_pins += 1;
        if self.phase == Phase::Marking {
            self.mark_grey(handle);
        }
    }

    /// Returns the number of currently live heap entries.
    pub fn live_count(&self) -> usize {
        let mut live = 0;
        let mut i = 0;
        let len = self.entries.len();

        while i < len {
            if self.entries[i].is_some() {
                live += 1;
            }
            i += 1;
        }

        live
    }

    /// Returns the total number of allocations performed by this heap.
    pub fn total_allocations(&self) -> usize {
        self.total_allocations
    }

    /// Returns the total number of completed GC cycles.
    pub fn total_collections(&self) -> usize {
        self.total_collections
    }

    pub fn total_pins(&self) -> usize {
        self.total_pins
    }

    pub fn stats(&self) -> GcStats {
        GcStats {
            live_objects: self.live_count(),
            capacity: self.entries.len(),
            free_slots: self.free_list.len(),
            roots: self.root_count(),
            threshold: self.gc_threshold,
            total_allocations: self.total_allocations,
            total_collections: self.total_collections,
            total_pins: self.total_pins,
        }
    }

    /// Runs a full stop-the-world collection, finishing an incremental cycle if one is
    /// in progress.
    pub fn collect(&mut self) -> Reclaimed {
        self.start_incremental();
        self.finish_incremental()
    }

    /// Starts an incremental cycle by greying every persistent root. No-op if a cycle
    /// is already marking.
    pub fn start_incremental(&mut self) {
        if self.phase == Phase::Marking {
            return;
        }
        self.phase = Phase::Marking;
        self.live_at_start = self.live_count();
        self.mark_roots();
        log::trace!(
            target: "gcbridge::gc",
            "begin collection {} ({} live, {} roots)",
            self.total_collections,
            self.live_at_start,
            self.root_count()
        );
    }

    /// Scans up to `budget` grey objects. Returns `true` once the grey set is empty.
    pub fn mark_slice(&mut self, budget: usize) -> bool {
        if self.phase == Phase::Idle {
            return true;
        }

        let mut processed = 0;
        while processed < budget {
            let Some(handle) = self.worklist.pop() else {
                break;
            };
            self.scan(handle);
            processed += 1;
        }

        self.worklist.is_empty()
    }

    /// Completes marking, sweeps, and returns what was reclaimed.
    pub fn finish_incremental(&mut self) -> Reclaimed {
        if self.phase == Phase::Idle {
            return Reclaimed {
                objects: Vec::new(),
            };
        }

        // Roots registered since the cycle started.
        self.mark_roots();
        while let Some(handle) = self.worklist.pop() {
            self.scan(handle);
        }

        let reclaimed = self.sweep();
        let live_before = self.live_at_start;
        let collected = reclaimed.len();

        self.phase = Phase::Idle;
        self.total_collections += 1;
        self.allocation_count = 0;

        if self.adaptive {
            self.adapt_threshold(collected, live_before);
        }

        log::debug!(
            target: "gcbridge::gc",
            "end collection {}: {} collected, {} live, threshold {}",
            self.total_collections,
            collected,
            self.live_count(),
            self.gc_threshold
        );
        reclaimed
    }

    /// Drops every root and reclaims the whole heap.
    pub fn teardown(&mut self) -> Reclaimed {
        self.roots.clear();
        self.roots_free.clear();
        self.worklist.clear();
        self.phase = Phase::Idle;

        for entry in self.entries.iter_mut().flatten() {
            entry.marked = false;
        }
        self.sweep()
    }

    fn mark_roots(&mut self) {
        let mut i = 0;
        let len = self.roots.len();
        while i < len {
            if let Some(handle) = self.roots[i] {
                self.mark_grey(handle);
            }
            i += 1;
        }
    }

    fn mark_grey(&mut self, handle: GcHandle) {
        let idx = handle.index as usize;
        if self.generations.get(idx).copied() != Some(handle.generation) {
            return;
        }

        // Mark first so cycles/shared nodes are visited once.
        if let Some(entry) = self.entries[idx].as_mut()
            && !entry.marked
        {
            entry.marked = true;
            self.worklist.push(handle);
        }
    }

    fn scan(&mut self, handle: GcHandle) {
        let mut buffer = EdgeBuffer {
            edges: std::mem::take(&mut self.edge_scratch),
        };

        match self.try_get(handle) {
            Some(HeapObject::Function(function)) => {
                for value in &function.captures {
                    buffer.trace_value(value, "capture");
                }
            }
            Some(HeapObject::Object { slots, .. }) => {
                for value in slots {
                    buffer.trace_value(value, "slot");
                }
            }
            Some(HeapObject::Native(native)) => native.data.trace(&mut buffer),
            None => {}
        }

        let mut i = 0;
        let len = buffer.edges.len();
        while i < len {
            self.mark_grey(buffer.edges[i]);
            i += 1;
        }

        buffer.edges.clear();
        self.edge_scratch = buffer.edges;
    }

    fn sweep(&mut self) -> Reclaimed {
        let mut objects = Vec::new();
        let mut i = 0;
        let len = self.entries.len();
        while i < len {
            let reclaim = match &mut self.entries[i] {
                Some(entry) if entry.marked => {
                    entry.marked = false;
                    false
                }
                Some(_) => true,
                None => false,
            };

            if reclaim && let Some(entry) = self.entries[i].take() {
                objects.push(entry.object);
                self.generations[i] = self.generations[i].wrapping_add(1);
                self.free_list.push(i as u32);
            }
            i += 1;
        }
        Reclaimed { objects }
    }

    fn adapt_threshold(&mut self, collected: usize, total_before: usize) {
        if total_before == 0 {
            return;
        }

        let ratio = collected as f64 / total_before as f64;
        if ratio < 0.25 {
            self.gc_threshold = (self.gc_threshold * 2).min(MAX_GC_THRESHOLD);
        } else if ratio > 0.75 {
            self.gc_threshold = (self.gc_threshold / 2).max(MIN_GC_THRESHOLD)
        }
    }
}
