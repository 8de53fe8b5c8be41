use std::{fmt, rc::Rc};

use crate::runtime::{
    context::Context,
    exception::Exception,
    gc::GcHandle,
    value::Value,
};

/// Host implementation of a runtime function.
///
/// Receives the call scope, the `this` value and the arguments. Values the function
/// closes over live in [`FunctionObject::captures`] so the collector can see them;
/// anything captured by the Rust closure itself is invisible to tracing.
pub type NativeFn = Rc<dyn Fn(&CallScope<'_>, &Value, &[Value]) -> Result<Value, Exception>>;

/// Callable heap object.
#[derive(Clone)]
pub struct FunctionObject {
    pub name: Rc<str>,
    pub call: NativeFn,
    pub captures: Vec<Value>,
}

impl FunctionObject {
    pub fn new(name: impl Into<Rc<str>>, call: NativeFn, captures: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            call,
            captures,
        }
    }
}

impl fmt::Debug for FunctionObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionObject({}, {} captures)", self.name, self.captures.len())
    }
}

/// Handle to a callable heap object.
///
/// Carries no liveness guarantee of its own; see [`Value::Object`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Function(GcHandle);

impl Function {
    pub(crate) fn from_handle(handle: GcHandle) -> Self {
        Self(handle)
    }

    pub fn handle(self) -> GcHandle {
        self.0
    }

    pub fn to_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// What a running function can see of its invocation.
pub struct CallScope<'a> {
    context: &'a Context,
    callee: Function,
    captures: &'a [Value],
}

impl<'a> CallScope<'a> {
    pub(crate) fn new(context: &'a Context, callee: Function, captures: &'a [Value]) -> Self {
        Self {
            context,
            callee,
            captures,
        }
    }

    pub fn context(&self) -> &'a Context {
        self.context
    }

    pub fn callee(&self) -> Function {
        self.callee
    }

    pub fn captures(&self) -> &'a [Value] {
        self.captures
    }

    /// Returns capture `index`, or `undefined` when out of range.
    pub fn capture(&self, index: usize) -> Value {
        self.captures.get(index).cloned().unwrap_or(Value::Undefined)
    }

    /// Leaves `exception` pending on the context without failing the call.
    pub fn report_exception(&self, exception: Exception) {
        self.context.set_pending_exception(exception);
    }
}
