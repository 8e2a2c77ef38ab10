//! Authenticated API client.
//!
//! Every call goes through two stages:
//! - before sending, attach the stored access token, refreshing it first when
//!   it is about to expire (public routes are sent without credentials);
//! - after a 401, refresh once through the shared [`RefreshCoordinator`] and
//!   replay the request with the new token.

use crate::auth::{jwt, refresh::HttpRefreshTransport, RefreshCoordinator, TokenStorage};
use crate::auth::storage::ACCESS_TOKEN_KEY;
use crate::config::ClientConfig;
use crate::error::{ApiError, RefreshError, Result};
use crate::events::{AuthEvent, EventBus};
use reqwest::{cookie::Jar, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Lifecycle of one outbound call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    NotSent,
    Sent,
    Success,
    Failed401Retryable,
    AwaitingRefresh,
    Replayed,
    FailedTerminal,
    FailedOther,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Success | RequestState::FailedTerminal | RequestState::FailedOther
        )
    }
}

/// A replayable request description
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        let value = serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Whether this request has already been replayed after a 401
    pub fn is_retried(&self) -> bool {
        self.retried
    }
}

struct Inner {
    http: reqwest::Client,
    cookies: Arc<Jar>,
    base_url: url::Url,
    api_root: String,
    config: ClientConfig,
    storage: TokenStorage,
    coordinator: RefreshCoordinator,
    events: EventBus,
}

/// HTTP client for the Monetoile backend
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl ApiClient {
    pub fn new(config: ClientConfig, storage: TokenStorage) -> Result<Self> {
        Self::with_events(config, storage, EventBus::default())
    }

    pub fn with_events(
        config: ClientConfig,
        storage: TokenStorage,
        events: EventBus,
    ) -> Result<Self> {
        config.validate()?;

        let base_url = url::Url::parse(config.api.base_url.trim_end_matches('/'))
            .map_err(|e| ApiError::Config(format!("Invalid base URL: {}", e)))?;
        let api_root = config.api.api_root();

        let cookies = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .timeout(config.api.timeout())
            .cookie_provider(cookies.clone())
            .build()
            .map_err(|e| ApiError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let transport = HttpRefreshTransport::new(
            http.clone(),
            format!("{}{}", api_root, config.auth.refresh_path),
            config.api.timeout(),
        );
        let coordinator =
            RefreshCoordinator::new(storage.clone(), Arc::new(transport), events.clone());

        debug!(api_root = %api_root, "API client created");

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                cookies,
                base_url,
                api_root,
                config,
                storage,
                coordinator,
                events,
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn storage(&self) -> &TokenStorage {
        &self.inner.storage
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.inner.coordinator
    }

    pub fn cookies(&self) -> &Arc<Jar> {
        &self.inner.cookies
    }

    pub fn api_root(&self) -> &str {
        &self.inner.api_root
    }

    /// Absolute URL for a path relative to the API root.
    ///
    /// Absolute `http(s)://` paths pass through unchanged; they only receive
    /// credentials when they point at the backend origin.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{}", self.inner.api_root, path)
        } else {
            format!("{}/{}", self.inner.api_root, path)
        }
    }

    /// Mirror the access token into a cookie on the backend origin
    pub fn set_session_cookie(&self, access_token: &str) {
        let cookie = format!(
            "{}={}; Path=/; Secure; SameSite=Lax",
            ACCESS_TOKEN_KEY, access_token
        );
        self.inner.cookies.add_cookie_str(&cookie, &self.inner.base_url);
    }

    pub fn clear_session_cookie(&self) {
        let cookie = format!(
            "{}=; Path=/; Max-Age=0; Secure; SameSite=Lax",
            ACCESS_TOKEN_KEY
        );
        self.inner.cookies.add_cookie_str(&cookie, &self.inner.base_url);
    }

    /// Tear down the local session and announce it
    pub(crate) fn expire_session(&self) {
        self.inner.storage.clear_auth();
        self.clear_session_cookie();
        info!(redirect_to = %self.inner.config.auth.login_route, "Session expired");
        self.inner.events.publish(AuthEvent::SessionExpired {
            redirect_to: self.inner.config.auth.login_route.clone(),
        });
    }

    /// Send a request through the auth pipeline and return the raw response.
    ///
    /// Non-2xx responses are turned into errors.
    pub async fn send(&self, request: ApiRequest) -> Result<reqwest::Response> {
        let request_id = Uuid::new_v4();
        let span = tracing::debug_span!(
            "api_request",
            %request_id,
            method = %request.method,
            path = %request.path,
        );
        self.execute(request, request_id).instrument(span).await
    }

    async fn execute(
        &self,
        mut request: ApiRequest,
        request_id: Uuid,
    ) -> Result<reqwest::Response> {
        let mut state = RequestState::NotSent;
        let url = self.url(&request.path);
        let public = self.inner.config.auth.is_public_route(&url) || !self.is_backend_url(&url);

        let token = if public { None } else { self.authorize().await };

        let response = match self.dispatch(&request, &url, token.as_deref(), request_id).await {
            Ok(response) => response,
            Err(e) => {
                transition(&mut state, RequestState::FailedOther);
                return Err(e);
            }
        };
        transition(&mut state, RequestState::Sent);

        let status = response.status();
        if status.is_success() {
            transition(&mut state, RequestState::Success);
            return Ok(response);
        }

        if status != StatusCode::UNAUTHORIZED || request.retried || public {
            let err = error_from_response(response).await;
            let next = if status == StatusCode::UNAUTHORIZED {
                RequestState::FailedTerminal
            } else {
                RequestState::FailedOther
            };
            transition(&mut state, next);
            return Err(err);
        }

        transition(&mut state, RequestState::Failed401Retryable);
        request.retried = true;

        transition(&mut state, RequestState::AwaitingRefresh);
        let fresh = match self.superseding_token(token.as_deref()) {
            Some(current) => {
                debug!("Token already refreshed by a concurrent request");
                current
            }
            None => match self.reactive_refresh().await {
                Ok(token) => token,
                Err(e) => {
                    transition(&mut state, RequestState::FailedTerminal);
                    // 刷新被取消不代表刷新失败，会话保持不变
                    if e != RefreshError::Cancelled {
                        self.expire_session();
                    }
                    return Err(e.into());
                }
            },
        };

        transition(&mut state, RequestState::Replayed);
        let replay = match self.dispatch(&request, &url, Some(&fresh), request_id).await {
            Ok(response) => response,
            Err(e) => {
                transition(&mut state, RequestState::FailedOther);
                return Err(e);
            }
        };

        if replay.status().is_success() {
            transition(&mut state, RequestState::Success);
            return Ok(replay);
        }

        let next = if replay.status() == StatusCode::UNAUTHORIZED {
            RequestState::FailedTerminal
        } else {
            RequestState::FailedOther
        };
        transition(&mut state, next);
        Err(error_from_response(replay).await)
    }

    /// Token to attach, refreshed ahead of expiry when nobody else is refreshing.
    ///
    /// A failed proactive refresh falls back to the stale token and leaves
    /// the outcome to the 401 path.
    async fn authorize(&self) -> Option<String> {
        let token = self.inner.storage.get_access_token()?;
        let buffer = self.inner.config.auth.refresh_buffer();

        if !jwt::is_token_expiring_soon(&token, buffer) || self.inner.coordinator.is_refreshing() {
            return Some(token);
        }

        debug!(
            remaining_secs = jwt::token_time_remaining(&token),
            "Access token expiring soon, refreshing ahead of request"
        );
        match self.inner.coordinator.refresh().await {
            Ok(fresh) => Some(fresh),
            Err(e) => {
                debug!("Proactive refresh failed, sending current token: {}", e);
                Some(token)
            }
        }
    }

    /// Refresh after a 401. When the leading caller was dropped mid-refresh,
    /// take over once as the new leader.
    async fn reactive_refresh(&self) -> std::result::Result<String, RefreshError> {
        match self.inner.coordinator.refresh().await {
            Err(RefreshError::Cancelled) => {
                debug!("Refresh leader was cancelled, refreshing again");
                self.inner.coordinator.refresh().await
            }
            outcome => outcome,
        }
    }

    /// Whether `target` shares the backend's origin
    fn is_backend_url(&self, target: &str) -> bool {
        url::Url::parse(target)
            .map(|u| u.origin() == self.inner.base_url.origin())
            .unwrap_or(false)
    }

    /// A stored token that replaced `sent` after it was attached, if still valid
    fn superseding_token(&self, sent: Option<&str>) -> Option<String> {
        if self.inner.coordinator.is_refreshing() {
            return None;
        }
        let current = self.inner.storage.get_access_token()?;
        if Some(current.as_str()) == sent || jwt::is_token_expired(&current) {
            return None;
        }
        Some(current)
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        target: &str,
        token: Option<&str>,
        request_id: Uuid,
    ) -> Result<reqwest::Response> {
        let mut target = url::Url::parse(target)
            .map_err(|e| ApiError::Config(format!("Invalid URL {}: {}", target, e)))?;
        if !request.query.is_empty() {
            target.query_pairs_mut().extend_pairs(request.query.iter());
        }

        let mut builder = self
            .inner
            .http
            .request(request.method.clone(), target)
            .header("X-Request-Id", request_id.to_string());
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            warn!("Request failed before a response: {}", e);
            ApiError::from(e)
        })?;

        metrics::counter!(
            "monetoile_client_requests_total",
            "status" => response.status().as_u16().to_string()
        )
        .increment(1);
        debug!(
            status = response.status().as_u16(),
            authenticated = token.is_some(),
            retried = request.retried,
            "Response received"
        );

        Ok(response)
    }

    /// Send and decode a JSON response body. Empty bodies decode as `null`.
    pub async fn request_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let response = self.send(request).await?;
        let bytes = response.bytes().await.map_err(ApiError::from)?;
        let bytes: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };
        serde_json::from_slice(bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request_json(ApiRequest::get(path)).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request_json(ApiRequest::post(path).json(body)?).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request_json(ApiRequest::put(path).json(body)?).await
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request_json(ApiRequest::patch(path).json(body)?).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request_json(ApiRequest::delete(path)).await
    }
}

fn transition(state: &mut RequestState, next: RequestState) {
    debug!(from = ?*state, to = ?next, "Request state");
    *state = next;
}

/// Map a non-2xx response to an error, keeping the server's message if any
async fn error_from_response(response: reqwest::Response) -> ApiError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = extract_message(&body);

    match status {
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized { message },
        StatusCode::FORBIDDEN => ApiError::Forbidden { message },
        _ => ApiError::Http { status, message },
    }
}

/// `{"message": ..}` / `{"error": ..}` bodies, falling back to the raw text
fn extract_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "error", "detail"] {
            match value.get(key) {
                Some(serde_json::Value::String(s)) => return s.clone(),
                Some(serde_json::Value::Array(items)) => {
                    let joined: Vec<&str> = items.iter().filter_map(|v| v.as_str()).collect();
                    if !joined.is_empty() {
                        return joined.join(", ");
                    }
                }
                _ => {}
            }
        }
    }
    body.trim().to_string()
}
