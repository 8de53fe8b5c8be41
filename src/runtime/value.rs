use std::{fmt, rc::Rc};

use crate::runtime::gc::GcHandle;

/// Value passed between the host and the collected runtime.
///
/// Primitives are stored inline. Anything that lives on the GC heap is an
/// [`Value::Object`] handle, which is only meaningful together with the
/// [`Context`](crate::runtime::context::Context) whose heap issued it. A handle does
/// not keep its target alive; root it or reach it from a rooted object.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absence of a value, also the result of functions that return nothing.
    Undefined,
    /// Explicit null.
    Null,
    /// Boolean value.
    Boolean(bool),
    /// 64-bit floating point number.
    Number(f64),
    /// UTF-8 string value.
    String(Rc<str>),
    /// Reference to a heap object.
    Object(GcHandle),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Number(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "\"{}\"", v),
            Value::Object(handle) => write!(f, "<object #{}>", handle.index()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.into())
    }
}

impl Value {
    /// Returns the runtime type label used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(_) => "object",
        }
    }

    /// Only `undefined`, `null`, `false`, `0`, `NaN` and the empty string are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(v) => *v,
            Value::Number(v) => *v != 0.0 && !v.is_nan(),
            Value::String(v) => !v.is_empty(),
            Value::Object(_) => true,
        }
    }

    pub fn as_handle(&self) -> Option<GcHandle> {
        match self {
            Value::Object(handle) => Some(*handle),
            _ => None,
        }
    }
}
