use std::{fmt, rc::Rc};

use crate::runtime::{function::FunctionObject, gc::tracer::NativeData, value::Value};

/// Objects that live on the GC-managed heap.
#[derive(Debug, Clone)]
pub enum HeapObject {
    /// Callable object. Captured values are traced.
    Function(FunctionObject),
    /// Plain object with positional slots.
    Object { class: Rc<str>, slots: Vec<Value> },
    /// Object whose payload is owned by the host and traced through [`NativeData`].
    Native(NativeObject),
}

impl HeapObject {
    pub fn as_function(&self) -> Option<&FunctionObject> {
        match self {
            HeapObject::Function(function) => Some(function),
            _ => None,
        }
    }

    pub fn as_native(&self) -> Option<&NativeObject> {
        match self {
            HeapObject::Native(native) => Some(native),
            _ => None,
        }
    }

    /// Label used in heap statistics and debug output.
    pub fn kind(&self) -> &'static str {
        match self {
            HeapObject::Function(_) => "Function",
            HeapObject::Object { .. } => "Object",
            HeapObject::Native(native) => native.data.class_name(),
        }
    }
}

#[derive(Clone)]
pub struct NativeObject {
    pub data: Rc<dyn NativeData>,
}

impl fmt::Debug for NativeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeObject({})", self.data.class_name())
    }
}
