//! Pitlane: read-through entity cache, cancellable lookups and optimistic
//! relationship toggles for the Pitlane feed API.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
