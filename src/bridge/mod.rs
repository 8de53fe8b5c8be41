//! The bridge between host closures and callables on the collected heap.
pub mod js_closure;
pub mod object_wrapper;
pub mod owned_callable;

pub use js_closure::{ClosureId, InvokeError, JsClosure};
pub use object_wrapper::ObjectWrapper;
pub use owned_callable::{CallableMode, CallableSlot, OwnedCallable};
