//! Authenticated portal session
//!
//! Owns the HTTP transport (client + cookie jar), the credential, and the
//! `AuthContext` holding the anti-forgery and bearer tokens. A tokio Mutex
//! guards transport and context together: `authenticate()` holds it for the
//! whole handshake + login sequence so two logins never interleave cookie
//! extraction and token assignment, while `call()` only holds it long enough
//! to copy out the client and current headers.
//!
//! The transport is opened lazily on first use. `close()` drops it and clears
//! the context; a later call opens a fresh one with an empty cookie jar.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::Secret;
use reqwest::cookie::Jar;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::api::PortalApi;
use crate::constants::{
    ACCEPT_LANGUAGE, DEFAULT_BASE_URL, DEFAULT_TIMEOUT, HANDSHAKE_PATH, LOGIN_IDENTIFIER_FIELD,
    LOGIN_PATH, LOGIN_SECRET_FIELD, USER_AGENT, XSRF_HEADER,
};
use crate::cookie;
use crate::credentials::Credential;
use crate::envelope::{self, Envelope};
use crate::error::{AuthError, AuthResult, CallError, CallResult};
use crate::status::{StatusClass, TOKEN_MISMATCH_STATUS, classify_status};

/// Where the portal lives and how long to wait for it.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub base_url: String,
    pub handshake_path: String,
    pub login_path: String,
    pub timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            handshake_path: HANDSHAKE_PATH.into(),
            login_path: LOGIN_PATH.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Session-scoped authentication state.
///
/// Both tokens start absent. The anti-forgery token is replaced on every
/// handshake; the bearer token only on a successful login. `epoch` counts
/// successful logins and survives `close()`, so a caller can tell whether
/// someone else re-authenticated since it last read the context.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    anti_forgery_token: Option<Secret<String>>,
    bearer_token: Option<Secret<String>>,
    established_at: Option<Instant>,
    epoch: u64,
}

impl AuthContext {
    pub fn anti_forgery_token(&self) -> Option<&str> {
        self.anti_forgery_token.as_ref().map(|t| t.expose().as_str())
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_ref().map(|t| t.expose().as_str())
    }

    /// When the last successful login completed.
    pub fn established_at(&self) -> Option<Instant> {
        self.established_at
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Headers for a protected call. Both tokens travel together whenever
    /// they are present.
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = self.bearer_token()
            && let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}"))
        {
            headers.insert(header::AUTHORIZATION, value);
        }
        if let Some(token) = self.anti_forgery_token()
            && let Ok(value) = HeaderValue::from_str(token)
        {
            headers.insert(XSRF_HEADER, value);
        }
        headers
    }

    fn clear(&mut self) {
        self.anti_forgery_token = None;
        self.bearer_token = None;
        self.established_at = None;
    }
}

/// HTTP client plus the cookie jar it writes into.
#[derive(Clone)]
struct Transport {
    client: reqwest::Client,
    jar: Arc<Jar>,
}

impl Transport {
    fn open(timeout: Duration) -> Result<Self, String> {
        let jar = Arc::new(Jar::default());

        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static(ACCEPT_LANGUAGE),
        );

        let client = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;

        Ok(Self { client, jar })
    }
}

struct SessionState {
    transport: Option<Transport>,
    context: AuthContext,
}

impl SessionState {
    fn transport(&mut self, timeout: Duration) -> Result<Transport, String> {
        if let Some(transport) = &self.transport {
            return Ok(transport.clone());
        }
        let transport = Transport::open(timeout)?;
        debug!("opened portal transport");
        self.transport = Some(transport.clone());
        Ok(transport)
    }
}

/// Status and body of a completed request.
struct RawResponse {
    status: u16,
    body: String,
}

/// A logged-in (or loggable-in) portal session for one account.
pub struct AuthenticatedSession {
    credential: Credential,
    config: SessionConfig,
    base_url: Url,
    state: Mutex<SessionState>,
}

impl AuthenticatedSession {
    /// Create a session. No network activity happens until the first
    /// `authenticate()` or `call()`.
    pub fn new(credential: Credential, config: SessionConfig) -> CallResult<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            CallError::InvalidInput(format!("invalid portal base URL {}: {e}", config.base_url))
        })?;
        Ok(Self {
            credential,
            config,
            base_url,
            state: Mutex::new(SessionState {
                transport: None,
                context: AuthContext::default(),
            }),
        })
    }

    pub fn identifier(&self) -> &str {
        self.credential.identifier()
    }

    /// Copy of the current authentication context.
    pub async fn auth_context(&self) -> AuthContext {
        self.state.lock().await.context.clone()
    }

    /// Run the handshake + login sequence.
    ///
    /// A token mismatch on login means the handshake result was already
    /// stale; the whole sequence is repeated once before giving up.
    #[instrument(skip_all, fields(account = %self.credential.identifier()))]
    pub async fn authenticate(&self) -> AuthResult<()> {
        let mut state = self.state.lock().await;
        self.authenticate_locked(&mut state).await
    }

    async fn authenticate_locked(&self, state: &mut SessionState) -> AuthResult<()> {
        let transport = state
            .transport(self.config.timeout)
            .map_err(AuthError::Transport)?;

        let result = match self.login_attempt(&transport, &mut state.context).await {
            Err(AuthError::TokenMismatch) => {
                warn!("anti-forgery token mismatch on login, repeating handshake");
                self.login_attempt(&transport, &mut state.context).await
            }
            other => other,
        };

        let outcome = match &result {
            Ok(()) => "success",
            Err(e) if e.is_credential_failure() => "rejected",
            Err(_) => "failed",
        };
        metrics::counter!("portal_logins_total", "outcome" => outcome).increment(1);
        result
    }

    async fn login_attempt(
        &self,
        transport: &Transport,
        context: &mut AuthContext,
    ) -> AuthResult<()> {
        let handshake_url = self
            .resolve(&self.config.handshake_path)
            .map_err(AuthError::HandshakeFailed)?;
        debug!(url = %handshake_url, "requesting anti-forgery cookie");

        let response = transport
            .client
            .get(handshake_url.clone())
            .send()
            .await
            .map_err(|e| AuthError::Transport(format!("handshake request failed: {e}")))?;
        if response.status() != StatusCode::NO_CONTENT {
            return Err(AuthError::HandshakeFailed(format!(
                "expected 204, got {}",
                response.status()
            )));
        }

        let token =
            cookie::xsrf_token(&transport.jar, &handshake_url).ok_or(AuthError::MissingToken)?;
        context.anti_forgery_token = Some(Secret::new(token.clone()));
        debug!("got anti-forgery token, logging in");

        let login_url = self
            .resolve(&self.config.login_path)
            .map_err(AuthError::HandshakeFailed)?;
        let body = json!({
            LOGIN_IDENTIFIER_FIELD: self.credential.identifier(),
            LOGIN_SECRET_FIELD: self.credential.secret(),
        });
        let response = transport
            .client
            .post(login_url)
            .header(XSRF_HEADER, token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Transport(format!("login request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == TOKEN_MISMATCH_STATUS {
            return Err(AuthError::TokenMismatch);
        }
        let text = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(format!("reading login response failed: {e}")))?;

        let envelope = match Envelope::parse(&text) {
            Some(envelope) if envelope.success && status.is_success() => envelope,
            Some(envelope) if envelope.names_credentials() => {
                warn!(%status, errors = %envelope.errors, "portal rejected credentials");
                return Err(AuthError::InvalidCredentials);
            }
            Some(envelope) => {
                let errors = if envelope.errors.is_null() {
                    json!({ "status": status.as_u16() })
                } else {
                    envelope.errors
                };
                warn!(%status, %errors, "portal rejected login");
                return Err(AuthError::LoginRejected { errors });
            }
            None => {
                warn!(%status, "login response was not a portal envelope");
                return Err(AuthError::LoginRejected {
                    errors: Value::String(text),
                });
            }
        };

        match envelope.token() {
            Some(token) => context.bearer_token = Some(Secret::new(token.to_string())),
            // Some deployments authenticate purely through the session cookie.
            None => warn!("login succeeded without a bearer token, relying on session cookie"),
        }
        context.established_at = Some(Instant::now());
        context.epoch += 1;

        info!(epoch = context.epoch, "authenticated with portal");
        Ok(())
    }

    /// Call a protected endpoint.
    ///
    /// On 401/403/419 the session re-authenticates exactly once and re-issues
    /// the request exactly once. A second authorization failure is terminal.
    #[instrument(skip(self, body), fields(account = %self.credential.identifier()))]
    pub async fn call(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<&Value>,
    ) -> CallResult<Value> {
        let url = self
            .resolve(endpoint)
            .map_err(CallError::InvalidInput)?;

        let (transport, headers, epoch) = self.prepare(endpoint).await?;
        let response = self
            .send(&transport, &url, &method, headers, body, endpoint)
            .await?;

        if classify_status(response.status) != StatusClass::AuthExpired {
            return self.finish(endpoint, response);
        }

        debug!(status = response.status, "authorization rejected, re-authenticating");
        metrics::counter!("portal_reauth_total").increment(1);
        self.reauthenticate(epoch, endpoint).await?;

        let (transport, headers, _) = self.prepare(endpoint).await?;
        let retry = self
            .send(&transport, &url, &method, headers, body, endpoint)
            .await?;

        if classify_status(retry.status) == StatusClass::AuthExpired {
            warn!(status = retry.status, "still unauthorized after re-authentication");
            metrics::counter!("portal_calls_total", "outcome" => "unauthorized").increment(1);
            return Err(CallError::Unauthorized {
                endpoint: endpoint.to_string(),
                reason: format!("status {} after re-authentication", retry.status),
            });
        }
        self.finish(endpoint, retry)
    }

    /// Release the transport and forget both tokens. Safe to call repeatedly
    /// and on a session that never opened a transport.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.transport.take().is_some() {
            debug!(account = %self.credential.identifier(), "closed portal transport");
        }
        state.context.clear();
    }

    /// Copy out the transport, the headers for the current context, and the
    /// context epoch they were read at.
    async fn prepare(&self, endpoint: &str) -> CallResult<(Transport, HeaderMap, u64)> {
        let mut state = self.state.lock().await;
        let transport = state
            .transport(self.config.timeout)
            .map_err(|message| CallError::Transport {
                endpoint: endpoint.to_string(),
                message,
            })?;
        Ok((transport, state.context.headers(), state.context.epoch))
    }

    /// Log in again unless another caller already did since `seen_epoch`.
    async fn reauthenticate(&self, seen_epoch: u64, endpoint: &str) -> CallResult<()> {
        let mut state = self.state.lock().await;
        if state.context.epoch != seen_epoch {
            debug!("context refreshed concurrently, skipping login");
            return Ok(());
        }
        self.authenticate_locked(&mut state)
            .await
            .map_err(|e| match e {
                AuthError::Transport(message) => CallError::Transport {
                    endpoint: endpoint.to_string(),
                    message,
                },
                other => {
                    warn!(error = %other, "re-authentication failed");
                    CallError::Unauthorized {
                        endpoint: endpoint.to_string(),
                        reason: other.to_string(),
                    }
                }
            })
    }

    async fn send(
        &self,
        transport: &Transport,
        url: &Url,
        method: &Method,
        headers: HeaderMap,
        body: Option<&Value>,
        endpoint: &str,
    ) -> CallResult<RawResponse> {
        let mut request = transport
            .client
            .request(method.clone(), url.clone())
            .headers(headers);
        if let Some(body) = body {
            request = request.json(body);
        }

        let transport_error = |e: reqwest::Error| {
            let kind = if e.is_timeout() { "timeout" } else { "connection" };
            metrics::counter!("portal_calls_total", "outcome" => kind).increment(1);
            warn!(error = %e, kind, "portal request failed");
            CallError::Transport {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            }
        };

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport_error)?;
        Ok(RawResponse { status, body })
    }

    /// Turn a non-auth-failure response into the call result.
    fn finish(&self, endpoint: &str, response: RawResponse) -> CallResult<Value> {
        let api_error = |errors: Value| {
            metrics::counter!("portal_calls_total", "outcome" => "api_error").increment(1);
            warn!(status = response.status, %errors, "portal returned an error");
            CallError::ApiError {
                endpoint: endpoint.to_string(),
                status: response.status,
                errors,
            }
        };

        if classify_status(response.status) != StatusClass::Success {
            return Err(api_error(envelope::error_payload(&response.body)));
        }

        // A bare 2xx with no body carries no failure flag.
        if response.body.trim().is_empty() {
            metrics::counter!("portal_calls_total", "outcome" => "success").increment(1);
            return Ok(Value::Null);
        }

        match Envelope::parse(&response.body) {
            Some(envelope) if envelope.success => {
                metrics::counter!("portal_calls_total", "outcome" => "success").increment(1);
                Ok(envelope.response)
            }
            Some(envelope) => Err(api_error(if envelope.errors.is_null() {
                json!(["Unknown error"])
            } else {
                envelope.errors
            })),
            None => Err(api_error(Value::String(response.body.clone()))),
        }
    }

    /// Resolve a relative path against the base URL; absolute URLs pass through.
    fn resolve(&self, endpoint: &str) -> Result<Url, String> {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return Url::parse(endpoint).map_err(|e| format!("invalid endpoint {endpoint}: {e}"));
        }
        self.base_url
            .join(endpoint)
            .map_err(|e| format!("invalid endpoint {endpoint}: {e}"))
    }
}

impl PortalApi for AuthenticatedSession {
    fn account(&self) -> &str {
        self.identifier()
    }

    fn call<'a>(
        &'a self,
        endpoint: &'a str,
        method: Method,
        body: Option<&'a Value>,
    ) -> Pin<Box<dyn Future<Output = CallResult<Value>> + Send + 'a>> {
        Box::pin(AuthenticatedSession::call(self, endpoint, method, body))
    }
}
