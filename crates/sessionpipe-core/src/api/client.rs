//! API client that carries the stored session on every request.
//!
//! Each call goes through the same steps:
//!
//! 1. attach `Authorization: Bearer <token>` when a token is stored, an
//!    `X-Request-Timestamp` header, and the CSRF header when a source is set
//! 2. send it
//! 3. on a 401 that looks like an expired token, exchange the refresh token
//!    once and send the request again with the new token
//! 4. classify whatever failure remains into an `ApiError`
//!
//! When the session cannot be renewed all stored session state is cleared
//! and `SessionEvent::Expired` is broadcast.
//!
//! Refreshes are not coalesced: concurrent requests that all hit an expired
//! token each call the refresh endpoint.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::{Session, SessionEvents, TokenStore, UserRecord};
use crate::config::Config;
use crate::storage::Clock;

use super::{ApiError, ApiRequest, ApiResponse, ErrorResponse};

// ============================================================================
// Constants
// ============================================================================

/// Replay-mitigation header carrying the send time in epoch milliseconds.
pub const REQUEST_TIMESTAMP_HEADER: &str = "x-request-timestamp";

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";

/// A 401 from one of these means bad credentials, never an expired token.
const AUTH_ENDPOINTS: [&str; 3] = [LOGIN_PATH, REGISTER_PATH, REFRESH_PATH];

// ============================================================================
// Collaborators and wire types
// ============================================================================

/// Supplies the current CSRF token, if any.
pub trait CsrfTokenSource: Send + Sync {
    fn csrf_token(&self) -> Option<String>;
}

impl<F> CsrfTokenSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn csrf_token(&self) -> Option<String> {
        self()
    }
}

/// Token grant returned by login, register and refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    #[serde(alias = "token")]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<UserRecord>,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Which send of a logical request this is. At most one retry exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Initial,
    Retry,
}

impl Attempt {
    fn retried(self) -> Self {
        Attempt::Retry
    }

    fn is_retry(self) -> bool {
        self == Attempt::Retry
    }
}

/// What to do with a response before classifying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshDecision {
    NotUnauthorized,
    AuthEndpoint,
    Anonymous,
    AlreadyRetried,
    Refresh,
}

fn refresh_decision(
    status: StatusCode,
    endpoint: &str,
    carried_auth: bool,
    attempt: Attempt,
) -> RefreshDecision {
    if status != StatusCode::UNAUTHORIZED {
        RefreshDecision::NotUnauthorized
    } else if AUTH_ENDPOINTS.contains(&endpoint) {
        RefreshDecision::AuthEndpoint
    } else if !carried_auth {
        RefreshDecision::Anonymous
    } else if attempt.is_retry() {
        RefreshDecision::AlreadyRetried
    } else {
        RefreshDecision::Refresh
    }
}

struct Sent {
    response: reqwest::Response,
    carried_auth: bool,
}

// ============================================================================
// Client
// ============================================================================

/// Session-aware API client.
/// Clone is cheap - the HTTP connection pool, token store and event channel
/// are all shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Arc<str>,
    csrf_header: HeaderName,
    verbose: bool,
    tokens: TokenStore,
    events: SessionEvents,
    csrf: Option<Arc<dyn CsrfTokenSource>>,
}

impl ApiClient {
    pub fn new(config: &Config, tokens: TokenStore) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let csrf_header = HeaderName::from_bytes(config.csrf_header.as_bytes())
            .with_context(|| format!("Invalid CSRF header name: {:?}", config.csrf_header))?;

        Ok(Self {
            client,
            base_url: Arc::from(config.api_base_url.trim_end_matches('/')),
            csrf_header,
            verbose: config.verbose_logging,
            tokens,
            events: SessionEvents::new(),
            csrf: None,
        })
    }

    pub fn with_csrf_source(mut self, source: impl CsrfTokenSource + 'static) -> Self {
        self.csrf = Some(Arc::new(source));
        self
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Subscribe here to learn when the session is lost.
    pub fn session_events(&self) -> &SessionEvents {
        &self.events
    }

    pub fn session(&self) -> Session {
        self.tokens.session()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn clock(&self) -> &Arc<dyn Clock> {
        self.tokens.secure_store().clock()
    }

    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.clock().now_millis()).unwrap_or_else(Utc::now)
    }

    // ===== Request pipeline =====

    /// Send a request with the stored credentials, renewing an expired
    /// token at most once.
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        request.validate()?;

        let attempt = Attempt::Initial;
        let sent = self.dispatch(request, attempt, self.tokens.get_token()).await?;
        if self.inspect(request, &sent, attempt) != RefreshDecision::Refresh {
            return self.settle(sent.response).await;
        }
        drop(sent);

        let retry = attempt.retried();
        let token = self.renew_session().await?;
        let sent = self.dispatch(request, retry, Some(token)).await?;
        self.inspect(request, &sent, retry);
        self.settle(sent.response).await
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        attempt: Attempt,
        bearer: Option<String>,
    ) -> Result<Sent, ApiError> {
        let mut headers = request.header_map()?;

        if let Some(token) = bearer {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                ApiError::Validation("Stored token is not a valid header value".to_string())
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        headers.insert(
            HeaderName::from_static(REQUEST_TIMESTAMP_HEADER),
            HeaderValue::from(self.clock().now_millis()),
        );

        if let Some(token) = self.csrf.as_ref().and_then(|source| source.csrf_token()) {
            match HeaderValue::from_str(&token) {
                Ok(value) => {
                    headers.insert(self.csrf_header.clone(), value);
                }
                Err(_) => warn!("Ignoring CSRF token that is not a valid header value"),
            }
        }

        let carried_auth = headers.contains_key(AUTHORIZATION);
        let url = self.url(&request.path);

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(headers);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(|e| {
            warn!(method = %request.method, url = %url, error = %e, "Request failed without a response");
            ApiError::network(e)
        })?;

        if self.verbose {
            debug!(
                method = %request.method,
                url = %url,
                status = %response.status(),
                attempt = ?attempt,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Response received"
            );
        }

        Ok(Sent {
            response,
            carried_auth,
        })
    }

    fn inspect(&self, request: &ApiRequest, sent: &Sent, attempt: Attempt) -> RefreshDecision {
        let decision = refresh_decision(
            sent.response.status(),
            request.endpoint(),
            sent.carried_auth,
            attempt,
        );
        match decision {
            RefreshDecision::NotUnauthorized => {}
            RefreshDecision::AuthEndpoint => {
                debug!(path = %request.path, "401 from auth endpoint, not refreshing");
            }
            RefreshDecision::Anonymous => {
                debug!(path = %request.path, "401 on unauthenticated request, not refreshing");
            }
            RefreshDecision::AlreadyRetried => {
                warn!(path = %request.path, "Request rejected again after token refresh");
            }
            RefreshDecision::Refresh => {
                info!(path = %request.path, "Access token rejected, refreshing");
            }
        }
        decision
    }

    /// Turn a response into the caller's result, reading the body.
    async fn settle(&self, response: reqwest::Response) -> Result<ApiResponse, ApiError> {
        let status = response.status();
        let headers = response.headers().clone();

        if status.is_success() {
            let body = response.bytes().await.map_err(ApiError::network)?;
            return Ok(ApiResponse::new(status, headers, body.to_vec()));
        }

        let body = response.text().await.unwrap_or_default();
        let error = ApiError::from_response(ErrorResponse::new(status, headers, &body), self.now());
        debug!(status = %status, error = %error, "Request rejected");
        Err(error)
    }

    /// Exchange the refresh token for a new access token. Any failure ends
    /// the session.
    async fn renew_session(&self) -> Result<String, ApiError> {
        let Some(refresh_token) = self.tokens.get_refresh_token() else {
            warn!("No refresh token stored, ending session");
            self.end_session();
            return Err(ApiError::session_expired());
        };

        match self.request_refresh(&refresh_token).await {
            Ok(grant) => {
                self.tokens.set_token(&grant.access_token);
                if let Some(ref rotated) = grant.refresh_token {
                    self.tokens.set_refresh_token(rotated);
                }
                info!(rotated = grant.refresh_token.is_some(), "Access token refreshed");
                Ok(grant.access_token)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, ending session");
                self.end_session();
                Err(e)
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<TokenGrant, ApiError> {
        // Straight to the transport so a 401 here cannot trigger another refresh
        let response = self
            .client
            .post(self.url(REFRESH_PATH))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(ApiError::network)?;

        self.settle(response).await?.json()
    }

    fn end_session(&self) {
        self.tokens.clear_session();
        self.events.emit_expired();
    }

    // ===== Auth endpoints =====

    /// Log in and persist the returned session.
    pub async fn login<B: Serialize + ?Sized>(&self, credentials: &B) -> Result<Session, ApiError> {
        self.authenticate(LOGIN_PATH, credentials).await
    }

    /// Create an account and persist the returned session.
    pub async fn register<B: Serialize + ?Sized>(&self, payload: &B) -> Result<Session, ApiError> {
        self.authenticate(REGISTER_PATH, payload).await
    }

    async fn authenticate<B: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &B,
    ) -> Result<Session, ApiError> {
        let response = self.send(&ApiRequest::post(path).json(payload)?).await?;
        let grant: TokenGrant = response.json()?;

        self.tokens.store_session(
            &grant.access_token,
            grant.refresh_token.as_deref(),
            grant.user.as_ref(),
        );

        Ok(Session::Authenticated {
            token: grant.access_token,
            user: grant.user,
        })
    }

    /// Tell the server (best effort) and drop the local session.
    pub async fn logout(&self) {
        if let Some(token) = self.tokens.get_token() {
            let result = self
                .client
                .post(self.url(LOGOUT_PATH))
                .bearer_auth(&token)
                .header(REQUEST_TIMESTAMP_HEADER, self.clock().now_millis())
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    debug!("Server session closed");
                }
                Ok(response) => {
                    debug!(status = %response.status(), "Logout request rejected, clearing local session anyway");
                }
                Err(e) => {
                    debug!(error = %e, "Logout request failed, clearing local session anyway");
                }
            }
        }

        self.tokens.clear_session();
        info!("Logged out");
    }

    // ===== Convenience methods =====

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(&ApiRequest::get(path)).await?.json()
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(&ApiRequest::post(path).json(body)?).await?.json()
    }

    pub async fn put_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(&ApiRequest::put(path).json(body)?).await?.json()
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.send(&ApiRequest::delete(path)).await
    }
}

// ============================================================================
// Tests
// ============================================================================
