//! Pitlane entity cache
//!
//! Read-through, session-scoped caching of API entities:
//!
//! - **Namespaces**: one named `key -> value` map per entity type, persisted
//!   through an injected [`SessionStore`].
//! - **Lookups**: reactive `{status, value}` bindings that serve cached data,
//!   fetch on miss and never let a superseded response through.
//! - **Relationships**: boolean lookups with optimistic `toggle()`.
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `pitlane.toml`:
//!
//! ```toml
//! [cache]
//! store = "file"
//! directory = ".pitlane/session"
//! # refetch_failure = "keep_stale"
//! ```

mod cancel;
mod config;
mod fetch;
mod lock;
mod lookup;
mod mutation;
mod namespace;
mod state;
mod store;
#[cfg(test)]
pub(crate) mod testing;

pub use cancel::{CancelSlot, CancelToken};
pub use config::{CacheConfig, RefetchFailurePolicy, StoreKind};
pub use fetch::{CacheValue, CompanionRefresh, FetchError, Fetcher, Mutator};
pub(crate) use lock::mutex_lock;
pub use lookup::{Lookup, LookupEngine};
pub use mutation::{Relationship, RelationshipEngine};
pub use namespace::Namespace;
pub use state::{LookupState, LookupStatus};
pub use store::{MemoryStore, NamespaceStore, SessionCache, SessionStore, StoreError};
