//! Application layer: entity lookups wired to the API and the providers
//! composed from them.

pub mod error;
pub mod lookups;
pub mod providers;
