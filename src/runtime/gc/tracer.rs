//! Tracing protocol shared by the collector and host-owned payloads.

use std::{any::Any, rc::Rc};

use crate::runtime::{gc::gc_handle::GcHandle, value::Value};

/// Receives the outgoing edges of a traced value.
///
/// The collector hands a `Tracer` to every marked native object. Implementations must
/// not touch the heap; they only report edges.
pub trait Tracer {
    fn trace_edge(&mut self, handle: GcHandle, name: &'static str);

    fn trace_value(&mut self, value: &Value, name: &'static str) {
        if let Value::Object(handle) = value {
            self.trace_edge(*handle, name);
        }
    }
}

/// Values that hold references into the GC heap.
pub trait Trace {
    fn trace(&self, tracer: &mut dyn Tracer);
}

/// Host payload attached to a [`HeapObject::Native`](super::HeapObject::Native).
///
/// `trace` is called whenever the owning heap object is marked. `finalize` runs
/// exactly once, after the sweep that reclaimed the object, outside of any heap borrow;
/// the object is never traced again afterwards.
pub trait NativeData: Trace {
    fn class_name(&self) -> &'static str;

    fn finalize(&self);

    fn as_any_rc(self: Rc<Self>) -> Rc<dyn Any>;
}

/// Collects traced edges into a buffer.
#[derive(Debug, Default)]
pub(crate) struct EdgeBuffer {
    pub(crate) edges: Vec<GcHandle>,
}

impl Tracer for EdgeBuffer {
    fn trace_edge(&mut self, handle: GcHandle, _name: &'static str) {
        self.edges.push(handle);
    }
}
