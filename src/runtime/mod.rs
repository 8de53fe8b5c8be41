//! Collected runtime: values, functions, the GC heap and execution contexts.
pub mod context;
pub mod context_registry;
pub mod exception;
pub mod function;
pub mod gc;
pub mod leak_detector;
pub mod value;
