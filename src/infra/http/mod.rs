//! HTTP transport for the feed API.

mod client;
mod credentials;

pub use client::{ApiClient, Route, decode_envelope};
pub use credentials::Credentials;
