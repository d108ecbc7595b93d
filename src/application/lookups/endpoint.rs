//! Fetch and mutate capabilities backed by [`ApiClient`] endpoints.

use std::fmt;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::cache::{CancelToken, FetchError, Fetcher, Mutator};
use crate::infra::http::{ApiClient, Credentials, Route};

pub type RouteFn = fn(&str) -> Route;
pub type LocalFn<V> = fn(&Credentials, &str) -> Option<V>;

/// Reads one envelope payload field from `route(key)`.
pub struct ApiFetcher<V> {
    client: ApiClient,
    route: RouteFn,
    field: &'static str,
    requires_auth: bool,
    fallbacks: Vec<(&'static str, fn() -> V)>,
    local: Option<LocalFn<V>>,
}

impl<V> ApiFetcher<V> {
    pub fn new(client: &ApiClient, route: RouteFn, field: &'static str) -> Self {
        Self {
            client: client.clone(),
            route,
            field,
            requires_auth: false,
            fallbacks: Vec::new(),
            local: None,
        }
    }

    /// Holds lookups in `Loading` until the session carries a token.
    pub fn authenticated(mut self) -> Self {
        self.requires_auth = true;
        self
    }

    /// Maps the domain error `code` to a successful `value()`.
    pub fn fallback(mut self, code: &'static str, value: fn() -> V) -> Self {
        self.fallbacks.push((code, value));
        self
    }

    /// Answers some keys from the session alone.
    pub fn local(mut self, resolve: LocalFn<V>) -> Self {
        self.local = Some(resolve);
        self
    }

    fn fallback_for(&self, code: &str) -> Option<V> {
        self.fallbacks
            .iter()
            .find(|(candidate, _)| *candidate == code)
            .map(|(_, value)| value())
    }
}

impl<V> fmt::Debug for ApiFetcher<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiFetcher")
            .field("field", &self.field)
            .field("requires_auth", &self.requires_auth)
            .field("fallbacks", &self.fallbacks.len())
            .finish()
    }
}

#[async_trait]
impl<V> Fetcher<V> for ApiFetcher<V>
where
    V: DeserializeOwned + Send + Sync + 'static,
{
    fn ready(&self, key: &str) -> bool {
        !key.is_empty() && (!self.requires_auth || self.client.credentials().is_authenticated())
    }

    fn resolve_locally(&self, key: &str) -> Option<V> {
        self.local
            .and_then(|resolve| resolve(self.client.credentials(), key))
    }

    async fn fetch(&self, key: &str, token: &CancelToken) -> Result<V, FetchError> {
        let route = (self.route)(key);
        match self.client.get(&route, self.field, token).await {
            Ok(value) => Ok(value),
            Err(err) => match err.domain_code().and_then(|code| self.fallback_for(code)) {
                Some(value) => Ok(value),
                None => Err(err),
            },
        }
    }
}

/// POSTs a toggle to `route(key)` and reads the server's verdict.
pub struct ApiMutator<R> {
    client: ApiClient,
    route: RouteFn,
    field: &'static str,
    verdict: fn(R) -> bool,
    _response: PhantomData<fn() -> R>,
}

impl<R> ApiMutator<R> {
    pub fn new(client: &ApiClient, route: RouteFn, field: &'static str, verdict: fn(R) -> bool) -> Self {
        Self {
            client: client.clone(),
            route,
            field,
            verdict,
            _response: PhantomData,
        }
    }
}

#[async_trait]
impl<R> Mutator for ApiMutator<R>
where
    R: DeserializeOwned + Send + 'static,
{
    async fn mutate(&self, key: &str, token: &CancelToken) -> Result<bool, FetchError> {
        if !self.client.credentials().is_authenticated() {
            return Err(FetchError::Precondition(
                "toggling requires a signed-in session".into(),
            ));
        }
        let response: R = self
            .client
            .post(&(self.route)(key), self.field, token)
            .await?;
        Ok((self.verdict)(response))
    }
}
