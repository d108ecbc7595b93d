//! Capabilities the engines consume: fetching an entity and mutating a
//! boolean relationship.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::cancel::CancelToken;

/// Values that can live in a namespace and be published to bindings.
pub trait CacheValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Failure reported by a fetch or mutate capability.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The operation's token was cancelled before it settled.
    #[error("request cancelled")]
    Cancelled,
    /// A required input (credential, key) was missing; nothing was sent.
    #[error("precondition not met: {0}")]
    Precondition(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected status {code}: {body}")]
    Status { code: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    /// Well-formed envelope reporting a business-level failure.
    #[error("server reported `{code}`: {message}")]
    Domain { code: String, message: String },
}

impl FetchError {
    pub fn domain(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Domain {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Error code of a domain failure.
    pub fn domain_code(&self) -> Option<&str> {
        match self {
            Self::Domain { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    /// Short label used as a log and metric field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Precondition(_) => "precondition",
            Self::Transport(_) => "transport",
            Self::Status { .. } => "status",
            Self::Malformed(_) => "malformed",
            Self::Domain { .. } => "domain",
        }
    }
}

/// Fetch-entity capability for one namespace.
#[async_trait]
pub trait Fetcher<V>: Send + Sync + 'static {
    /// Whether a fetch for `key` may be attempted at all.
    ///
    /// Returning `false` holds the lookup in `Loading` without a request;
    /// used for empty keys and missing credentials.
    fn ready(&self, key: &str) -> bool {
        !key.is_empty()
    }

    /// Answers `key` without the network, bypassing cache and fetch.
    fn resolve_locally(&self, _key: &str) -> Option<V> {
        None
    }

    async fn fetch(&self, key: &str, token: &CancelToken) -> Result<V, FetchError>;
}

/// Mutate capability for a boolean relationship.
///
/// Returns the relationship state the server reports after the mutation.
#[async_trait]
pub trait Mutator: Send + Sync + 'static {
    async fn mutate(&self, key: &str, token: &CancelToken) -> Result<bool, FetchError>;
}

/// Best-effort follow-up run after a relationship toggle commits.
#[async_trait]
pub trait CompanionRefresh: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    async fn refresh(&self, key: &str, confirmed: bool) -> Result<(), FetchError>;
}
