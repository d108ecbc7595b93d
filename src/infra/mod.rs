//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod file_store;
pub mod http;
pub mod telemetry;
