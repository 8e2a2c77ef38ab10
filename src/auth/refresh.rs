//! Access token refresh with single-flight coordination.
//!
//! At most one refresh call is outstanding per [`RefreshCoordinator`]. Callers
//! arriving while it runs are queued and receive the same outcome, token or
//! error, once it settles.

use crate::auth::{jwt, storage::TokenStorage};
use crate::error::RefreshError;
use crate::events::{AuthEvent, EventBus};
use crate::models::auth::RefreshTokenResponse;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Tokens returned by a successful refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// Present only when the server rotated the refresh token
    pub refresh_token: Option<String>,
}

impl From<RefreshTokenResponse> for RefreshedTokens {
    fn from(resp: RefreshTokenResponse) -> Self {
        Self {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
        }
    }
}

/// Network leg of a refresh
#[async_trait]
pub trait RefreshTransport: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, RefreshError>;
}

/// `POST {api_root}{refresh_path}` with the refresh token as bearer credential
pub struct HttpRefreshTransport {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpRefreshTransport {
    pub fn new(client: reqwest::Client, url: String, timeout: Duration) -> Self {
        Self {
            client,
            url,
            timeout,
        }
    }
}

#[async_trait]
impl RefreshTransport for HttpRefreshTransport {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, RefreshError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(refresh_token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), body = %body, "Refresh rejected by server");
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
            });
        }

        let body: RefreshTokenResponse = response
            .json()
            .await
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

        if body.access_token.is_empty() {
            return Err(RefreshError::InvalidResponse(
                "empty access token".to_string(),
            ));
        }

        Ok(body.into())
    }
}

type Waiter = oneshot::Sender<Result<String, RefreshError>>;

/// Single-flight refresh guard.
///
/// `state` is `Some(queue)` exactly while a refresh is in flight; the queue
/// holds the continuations of callers that arrived during that window.
pub struct RefreshCoordinator {
    storage: TokenStorage,
    transport: Arc<dyn RefreshTransport>,
    events: EventBus,
    state: Mutex<Option<Vec<Waiter>>>,
}

impl RefreshCoordinator {
    pub fn new(
        storage: TokenStorage,
        transport: Arc<dyn RefreshTransport>,
        events: EventBus,
    ) -> Self {
        Self {
            storage,
            transport,
            events,
            state: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Vec<Waiter>>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock().is_some()
    }

    /// Number of callers waiting on the in-flight refresh
    pub fn pending_len(&self) -> usize {
        self.lock().as_ref().map_or(0, Vec::len)
    }

    /// Obtain a fresh access token, joining an in-flight refresh if there is one.
    pub async fn refresh(&self) -> Result<String, RefreshError> {
        let queued = {
            let mut state = self.lock();
            match state.as_mut() {
                Some(queue) => {
                    let (tx, rx) = oneshot::channel();
                    queue.push(tx);
                    Some(rx)
                }
                None => {
                    *state = Some(Vec::new());
                    None
                }
            }
        };

        if let Some(rx) = queued {
            debug!("Refresh already in flight, waiting for its outcome");
            return rx.await.unwrap_or(Err(RefreshError::Cancelled));
        }

        let mut in_flight = InFlight {
            coordinator: self,
            outcome: None,
        };
        let outcome = self.refresh_access_token().await;

        match &outcome {
            Ok(_) => {
                metrics::counter!("monetoile_client_refresh_total", "outcome" => "success")
                    .increment(1);
                self.events.publish(AuthEvent::TokenRefreshed);
            }
            Err(e) => {
                metrics::counter!("monetoile_client_refresh_total", "outcome" => "failure")
                    .increment(1);
                warn!("Token refresh failed: {}", e);
            }
        }

        in_flight.outcome = Some(outcome.clone());
        drop(in_flight);
        outcome
    }

    /// One refresh round trip, without single-flight protection.
    ///
    /// Clears the stored session on any terminal failure except a missing
    /// refresh token, where there is nothing left to clear.
    pub async fn refresh_access_token(&self) -> Result<String, RefreshError> {
        let refresh_token = self
            .storage
            .get_refresh_token()
            .ok_or(RefreshError::NoRefreshToken)?;

        if jwt::is_token_expired(&refresh_token) {
            info!("Refresh token expired, clearing session");
            self.storage.clear_auth();
            return Err(RefreshError::RefreshTokenExpired);
        }

        match self.transport.refresh(&refresh_token).await {
            Ok(tokens) => {
                self.storage
                    .set_tokens(&tokens.access_token, tokens.refresh_token.as_deref());
                debug!(
                    rotated = tokens.refresh_token.is_some(),
                    "Access token refreshed"
                );
                Ok(tokens.access_token)
            }
            Err(e) => {
                self.storage.clear_auth();
                Err(e)
            }
        }
    }
}

/// Resets the in-flight flag and drains the queue, even when the leading
/// future is dropped before the refresh settles.
struct InFlight<'a> {
    coordinator: &'a RefreshCoordinator,
    outcome: Option<Result<String, RefreshError>>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let waiters = self.coordinator.lock().take().unwrap_or_default();
        let outcome = self.outcome.take().unwrap_or(Err(RefreshError::Cancelled));

        if !waiters.is_empty() {
            debug!(
                waiters = waiters.len(),
                ok = outcome.is_ok(),
                "Releasing queued refresh waiters"
            );
        }

        for waiter in waiters {
            // receiver may have been dropped by a cancelled caller
            let _ = waiter.send(outcome.clone());
        }
    }
}
