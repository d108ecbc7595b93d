use std::fmt;
use std::sync::{Arc, Mutex};

use crate::cache::mutex_lock;

const SOURCE: &str = "infra::http::credentials";

#[derive(Default)]
struct Inner {
    token: Option<String>,
    identity: Option<String>,
}

/// Bearer token and acting identity of the current session.
///
/// Cheap to clone; every clone observes the same session, so a login made
/// through one handle is seen by the transport and by every fetcher.
#[derive(Clone, Default)]
pub struct Credentials {
    inner: Arc<Mutex<Inner>>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(token: impl Into<String>, identity: impl Into<String>) -> Self {
        let credentials = Self::new();
        credentials.set(token, identity);
        credentials
    }

    pub fn set(&self, token: impl Into<String>, identity: impl Into<String>) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "set");
        inner.token = Some(token.into());
        inner.identity = Some(identity.into());
    }

    pub fn clear(&self) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "clear");
        inner.token = None;
        inner.identity = None;
    }

    pub fn token(&self) -> Option<String> {
        mutex_lock(&self.inner, SOURCE, "token").token.clone()
    }

    pub fn identity(&self) -> Option<String> {
        mutex_lock(&self.inner, SOURCE, "identity").identity.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        mutex_lock(&self.inner, SOURCE, "is_authenticated")
            .token
            .is_some()
    }

    /// Whether `key` names the acting identity.
    pub fn is_identity(&self, key: &str) -> bool {
        mutex_lock(&self.inner, SOURCE, "is_identity")
            .identity
            .as_deref()
            .is_some_and(|identity| identity == key)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = mutex_lock(&self.inner, SOURCE, "debug");
        f.debug_struct("Credentials")
            .field("token", &inner.token.as_ref().map(|_| "<redacted>"))
            .field("identity", &inner.identity)
            .finish()
    }
}
