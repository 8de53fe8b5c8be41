//! Host side: reference-counted closures and the consumers that hold them.
pub mod closure;
pub mod signal;
pub mod source;

pub use closure::{Closure, Marshal, NotifierId, WeakClosure};
pub use signal::{HandlerId, SignalEmitter};
pub use source::{SourceId, SourceQueue};
