pub mod gc_handle;
pub mod gc_heap;
pub mod heap_entry;
pub mod heap_object;
pub mod tracer;

pub use gc_handle::{GcHandle, RootId};
pub use gc_heap::{GcHeap, GcStats, Reclaimed};
pub use heap_object::{HeapObject, NativeObject};
pub use tracer::{NativeData, Trace, Tracer};
