use std::rc::Rc;

use crate::runtime::value::Value;

/// Failure raised by code running on the collected runtime.
///
/// `message` is what diagnostics print; `value` is the thrown value itself and
/// defaults to the message as a string.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct Exception {
    message: Rc<str>,
    value: Value,
}

impl Exception {
    pub fn new(message: impl Into<Rc<str>>) -> Self {
        let message = message.into();
        Self {
            value: Value::String(message.clone()),
            message,
        }
    }

    pub fn with_value(message: impl Into<Rc<str>>, value: Value) -> Self {
        Self {
            message: message.into(),
            value,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}
