pub mod bridge;
pub mod config;
pub mod host;
pub mod runtime;
