use pitlane_api_types::{NotificationCount, Profile};
use tracing::info;

use crate::application::lookups::{Catalog, SESSION};
use crate::cache::{Lookup, NamespaceStore, SessionCache};
use crate::infra::http::Credentials;

use super::{ProviderStatus, rebind};

const TOKEN_KEY: &str = "token";
const IDENTITY_KEY: &str = "identity";

/// Authenticated session: credentials, the acting identity's own profile and
/// its unread notification count.
pub struct SessionProvider {
    cache: SessionCache,
    store: NamespaceStore<String>,
    credentials: Credentials,
    profile: Lookup<Profile>,
    notifications: Lookup<NotificationCount>,
}

impl SessionProvider {
    /// Restores credentials persisted by an earlier [`login`](Self::login).
    pub fn restore(cache: &SessionCache, catalog: &Catalog) -> Self {
        let store = cache.namespace::<String>(SESSION);
        let credentials = catalog.credentials.clone();
        if let (Some(token), Some(identity)) = (store.get(TOKEN_KEY), store.get(IDENTITY_KEY)) {
            credentials.set(token, identity);
        }
        let key = credentials
            .identity()
            .filter(|_| credentials.is_authenticated())
            .unwrap_or_default();

        Self {
            cache: cache.clone(),
            store,
            profile: catalog.session_profile.lookup(key.clone(), false),
            notifications: catalog.notifications.lookup(key, true),
            credentials,
        }
    }

    /// Signs in as `identity`. Signing in as someone else first drops every
    /// namespace, since relationship and feed entries are keyed by their
    /// target rather than by the acting identity.
    pub fn login(&self, token: impl Into<String>, identity: impl Into<String>) {
        let token = token.into();
        let identity = identity.into();
        if let Some(previous) = self
            .credentials
            .identity()
            .filter(|previous| *previous != identity)
        {
            self.cache.clear();
            info!(previous = %previous, identity = %identity, "Session identity switched");
        }
        self.store.put(TOKEN_KEY, &token);
        self.store.put(IDENTITY_KEY, &identity);
        self.credentials.set(token, identity.clone());
        info!(identity = %identity, "Session started");

        rebind(&self.profile, &identity);
        rebind(&self.notifications, &identity);
    }

    /// Drops credentials and every cached namespace.
    pub fn logout(&self) {
        let identity = self.credentials.identity();
        self.credentials.clear();
        self.cache.clear();
        self.profile.set_key("");
        self.notifications.set_key("");
        info!(identity = ?identity, "Session ended");
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn identity(&self) -> Option<String> {
        self.credentials.identity()
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_authenticated()
    }

    pub fn profile(&self) -> &Lookup<Profile> {
        &self.profile
    }

    pub fn notification_count(&self) -> &Lookup<NotificationCount> {
        &self.notifications
    }

    pub fn status(&self) -> ProviderStatus {
        ProviderStatus::from_lookup(&self.profile.state())
    }

    /// Waits for the own-profile lookup; returns immediately when signed out.
    pub async fn settled(&self) -> ProviderStatus {
        if !self.is_authenticated() {
            return self.status();
        }
        ProviderStatus::from_lookup(&self.profile.settled().await)
    }
}
