use pitlane_api_types::RawResponse;
use reqwest::{Client, Method, Response, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::cache::{CancelToken, FetchError};
use crate::infra::error::InfraError;

use super::credentials::Credentials;

/// Relative path plus query pairs of one API call.
///
/// Segments are kept apart until the URL is built, so a key containing `/`,
/// `?` or `%` stays one escaped segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    segments: Vec<String>,
    query: Vec<(&'static str, String)>,
}

impl Route {
    /// Route over a fixed path such as `api/v1/session`.
    pub fn new(path: impl AsRef<str>) -> Self {
        Self {
            segments: path
                .as_ref()
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
            query: Vec::new(),
        }
    }

    /// Appends `segment` as a single path segment.
    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    pub fn query(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.query.push((name, value.into()));
        self
    }

    pub fn path(&self) -> String {
        self.segments.join("/")
    }
}

/// JSON API transport.
///
/// Every call races the request against its [`CancelToken`]; a cancelled call
/// drops the in-flight request and reports [`FetchError::Cancelled`].
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base: Url,
    credentials: Credentials,
}

impl ApiClient {
    pub fn new(base: &Url, credentials: Credentials) -> Result<Self, InfraError> {
        let base = normalize_base(base);
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .build()
            .map_err(|err| InfraError::http(err.to_string()))?;
        Ok(Self {
            client,
            base,
            credentials,
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("pitlane/", env!("CARGO_PKG_VERSION"))
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn url(&self, route: &Route) -> Result<Url, FetchError> {
        if let Some(segment) = route
            .segments
            .iter()
            .find(|segment| matches!(segment.as_str(), "" | "." | ".."))
        {
            return Err(FetchError::Precondition(format!(
                "`{segment}` is not a valid path segment"
            )));
        }
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                FetchError::Precondition(format!("base url `{}` cannot carry a path", self.base))
            })?
            .pop_if_empty()
            .extend(&route.segments);
        if !route.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &route.query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    /// GETs `route` and decodes payload `field`.
    pub async fn get<T: DeserializeOwned>(
        &self,
        route: &Route,
        field: &str,
        token: &CancelToken,
    ) -> Result<T, FetchError> {
        self.request(Method::GET, route, field, token).await
    }

    /// POSTs to `route` (no body) and decodes payload `field`.
    pub async fn post<T: DeserializeOwned>(
        &self,
        route: &Route,
        field: &str,
        token: &CancelToken,
    ) -> Result<T, FetchError> {
        self.request(Method::POST, route, field, token).await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        route: &Route,
        field: &str,
        token: &CancelToken,
    ) -> Result<T, FetchError> {
        if !token.is_live() {
            return Err(FetchError::Cancelled);
        }
        let url = self.url(route)?;
        let mut request = self.client.request(method.clone(), url);
        if let Some(bearer) = self.credentials.token() {
            request = request.bearer_auth(bearer);
        }

        debug!(%method, path = %route.path(), token = token.id(), "API request");
        let exchange = async {
            let response = request
                .send()
                .await
                .map_err(|err| FetchError::Transport(err.to_string()))?;
            Self::handle(response, field).await
        };

        tokio::select! {
            _ = token.cancelled() => Err(FetchError::Cancelled),
            result = exchange => result,
        }
    }

    async fn handle<T: DeserializeOwned>(response: Response, field: &str) -> Result<T, FetchError> {
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        if !status.is_success() {
            return Err(FetchError::Status {
                code: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        let envelope: RawResponse = serde_json::from_slice(&bytes)
            .map_err(|err| FetchError::malformed(format!("failed to parse envelope: {err}")))?;
        decode_envelope(envelope, field)
    }
}

/// Unwraps payload `field` of an envelope.
pub fn decode_envelope<T: DeserializeOwned>(
    mut envelope: RawResponse,
    field: &str,
) -> Result<T, FetchError> {
    if !envelope.is_ok() {
        let (code, message) = match envelope.error {
            Some(error) => (error.code, error.message.unwrap_or_default()),
            None => ("unknown".to_string(), String::new()),
        };
        return Err(FetchError::domain(code, message));
    }
    match envelope.take(field) {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(FetchError::malformed(format!("missing `{field}` payload"))),
        Err(err) => Err(FetchError::malformed(format!("invalid `{field}` payload: {err}"))),
    }
}

fn normalize_base(base: &Url) -> Url {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

#[cfg(test)]
mod tests {
    use pitlane_api_types::FollowResult;
    use serde_json::json;

    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(&Url::parse(base).expect("url"), Credentials::new()).expect("client")
    }

    #[test]
    fn base_without_trailing_slash_keeps_its_path() {
        let client = client("https://api.example.com/mobile");
        let url = client
            .url(&Route::new("api/v1/session"))
            .expect("joined url");
        assert_eq!(url.as_str(), "https://api.example.com/mobile/api/v1/session");
    }

    #[test]
    fn query_pairs_are_encoded() {
        let client = client("https://api.example.com/");
        let url = client
            .url(&Route::new("api/v1/feed").query("cursor", "a b&c"))
            .expect("joined url");
        assert_eq!(url.as_str(), "https://api.example.com/api/v1/feed?cursor=a+b%26c");
    }

    #[test]
    fn key_segments_are_escaped() {
        let client = client("https://api.example.com/");

        let traversal = client
            .url(&Route::new("api/v1/vehicles").segment("../profiles/uuid-1"))
            .expect("escaped url");
        assert_eq!(
            traversal.as_str(),
            "https://api.example.com/api/v1/vehicles/..%2Fprofiles%2Fuuid-1"
        );

        let injected = client
            .url(&Route::new("api/v1/vin").segment("VIN?admin=1"))
            .expect("escaped url");
        assert_eq!(injected.as_str(), "https://api.example.com/api/v1/vin/VIN%3Fadmin=1");
        assert_eq!(injected.query(), None);

        let encoded = client
            .url(&Route::new("api/v1/posts").segment("50%"))
            .expect("escaped url");
        assert_eq!(encoded.as_str(), "https://api.example.com/api/v1/posts/50%25");
    }

    #[test]
    fn dot_segments_are_rejected() {
        let client = client("https://api.example.com/");
        for key in ["..", ".", ""] {
            let err = client
                .url(&Route::new("api/v1/vehicles").segment(key))
                .expect_err("dot segment");
            assert!(matches!(err, FetchError::Precondition(_)), "{key:?}");
        }
    }

    #[test]
    fn user_agent_includes_version() {
        assert!(ApiClient::user_agent().starts_with("pitlane/"));
    }

    #[test]
    fn ok_envelope_yields_payload() {
        let envelope: RawResponse = serde_json::from_value(json!({
            "status": "ok",
            "follow_result": {"state": "unfollowing"}
        }))
        .expect("envelope");
        let result: FollowResult = decode_envelope(envelope, "follow_result").expect("payload");
        assert!(!result.is_following());
    }

    #[test]
    fn error_envelope_is_domain_failure() {
        let envelope: RawResponse = serde_json::from_value(json!({
            "status": "error",
            "error": {"code": "not_following", "message": "nope"}
        }))
        .expect("envelope");
        let err = decode_envelope::<Vec<String>>(envelope, "following").expect_err("domain");
        assert_eq!(err, FetchError::domain("not_following", "nope"));
    }

    #[test]
    fn missing_field_is_malformed() {
        let envelope: RawResponse =
            serde_json::from_value(json!({"status": "ok"})).expect("envelope");
        let err = decode_envelope::<u32>(envelope, "notifications").expect_err("missing");
        assert_eq!(err.kind(), "malformed");
    }

    #[tokio::test]
    async fn dead_token_short_circuits() {
        let client = client("http://127.0.0.1:9/");
        let token = CancelToken::new();
        token.cancel();
        let err = client
            .get::<u32>(&Route::new("api/v1/notifications/count"), "notifications", &token)
            .await
            .expect_err("cancelled");
        assert!(err.is_cancelled());
    }
}
