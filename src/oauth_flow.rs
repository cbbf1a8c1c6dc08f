//! Authorization-code flow primitives: consent URL, code exchange, refresh,
//! and loopback redirect capture.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use google_gmail1::yup_oauth2::ApplicationSecret;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::convert::Infallible;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinSet;
use url::Url;
use uuid::Uuid;

use crate::credential::Credential;
use crate::error::FlowError;
use crate::prompt::AuthPrompter;

/// Redirect target for the copy/paste (out-of-band) mode
pub const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

/// Read buffer cap per loopback connection; hyper rejects longer request heads
const MAX_REQUEST_HEAD_BYTES: usize = 16 * 1024;

/// How long the settling connection gets to flush its page once the redirect is in
const RESPONSE_GRACE: Duration = Duration::from_millis(500);

const SUCCESS_PAGE: &str = "<!DOCTYPE html><html><body style='font-family: sans-serif; padding: 40px; text-align: center;'>\
    <h1>Authorization complete</h1><p>You can close this window and return to the terminal.</p></body></html>";

const FAILURE_PAGE: &str = "<!DOCTYPE html><html><body style='font-family: sans-serif; padding: 40px; text-align: center;'>\
    <h1>Authorization failed</h1><p>Return to the terminal for details.</p></body></html>";

/// Where the provider sends the user after consent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    Loopback { port: u16 },
    OutOfBand,
}

impl RedirectMode {
    pub fn redirect_uri(&self) -> String {
        match self {
            RedirectMode::Loopback { port } => format!("http://localhost:{}/", port),
            RedirectMode::OutOfBand => OOB_REDIRECT_URI.to_string(),
        }
    }
}

/// Capability interface the cascade is built on.
///
/// Every failure is one of the closed `FlowError` kinds; callers never inspect message text.
#[async_trait]
pub trait AuthorizationFlow: Send + Sync {
    /// Provider consent URL for the given redirect mode
    fn build_authorization_url(
        &self,
        mode: &RedirectMode,
        state: Option<&str>,
    ) -> Result<String, FlowError>;

    /// Trade an authorization code for a credential. The redirect mode must match
    /// the one the code was issued for.
    async fn exchange_code_for_credential(
        &self,
        code: &str,
        mode: &RedirectMode,
    ) -> Result<Credential, FlowError>;

    /// Listen on `127.0.0.1:port` (0 = OS-assigned) for one redirect, then exchange its code.
    /// The listener is closed before this returns, whatever the outcome.
    async fn capture_via_local_redirect(
        &self,
        port: u16,
        auto_open_browser: bool,
        prompter: &dyn AuthPrompter,
    ) -> Result<Credential, FlowError>;

    async fn refresh(&self, credential: &Credential) -> Result<Credential, FlowError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grant {
    AuthorizationCode,
    RefreshToken,
}

/// Google installed-application flow over plain HTTPS form posts
pub struct GoogleAuthorizationFlow {
    secret: ApplicationSecret,
    scopes: Vec<String>,
    redirect_timeout: Duration,
    http: reqwest::Client,
}

impl GoogleAuthorizationFlow {
    pub fn new(secret: ApplicationSecret, scopes: Vec<String>, redirect_timeout: Duration) -> Self {
        Self {
            secret,
            scopes,
            redirect_timeout,
            http: reqwest::Client::new(),
        }
    }

    async fn post_token(
        &self,
        params: &[(&str, &str)],
        grant: Grant,
    ) -> Result<TokenResponse, FlowError> {
        let response = self
            .http
            .post(&self.secret.token_uri)
            .form(params)
            .send()
            .await
            .map_err(|e| FlowError::ProviderExchange(format!("token request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FlowError::ProviderExchange(format!("unreadable token response: {}", e)))?;

        if !status.is_success() {
            return Err(classify_token_error(status.as_u16(), &body, grant, params));
        }

        serde_json::from_str(&body)
            .map_err(|e| FlowError::ProviderExchange(format!("malformed token response: {}", e)))
    }

    fn credential_from_response(&self, response: TokenResponse) -> Credential {
        let scopes = response
            .scope
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_else(|| self.scopes.clone());

        Credential {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: response
                .expires_in
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
            scopes,
        }
    }
}

/// Map a token-endpoint rejection onto the closed error set using the `error` field
fn classify_token_error(status: u16, body: &str, grant: Grant, params: &[(&str, &str)]) -> FlowError {
    let Ok(parsed) = serde_json::from_str::<ErrorResponse>(body) else {
        return FlowError::ProviderExchange(format!("HTTP {}", status));
    };

    let detail = match parsed.error_description.as_deref() {
        Some(desc) if !desc.is_empty() => format!("{}: {}", parsed.error, desc),
        _ => parsed.error.clone(),
    };

    match (parsed.error.as_str(), grant) {
        ("invalid_grant", Grant::AuthorizationCode) => FlowError::InvalidGrant(detail),
        ("invalid_grant", Grant::RefreshToken) => FlowError::RefreshRevoked(detail),
        ("redirect_uri_mismatch", _) => FlowError::RedirectMismatch {
            redirect_uri: params
                .iter()
                .find(|(key, _)| *key == "redirect_uri")
                .map(|(_, value)| value.to_string())
                .unwrap_or_default(),
        },
        _ => FlowError::ProviderExchange(detail),
    }
}

#[async_trait]
impl AuthorizationFlow for GoogleAuthorizationFlow {
    fn build_authorization_url(
        &self,
        mode: &RedirectMode,
        state: Option<&str>,
    ) -> Result<String, FlowError> {
        let mut url = Url::parse(&self.secret.auth_uri).map_err(|e| {
            FlowError::ProviderExchange(format!("invalid auth_uri {}: {}", self.secret.auth_uri, e))
        })?;

        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.secret.client_id)
                .append_pair("redirect_uri", &mode.redirect_uri())
                .append_pair("scope", &self.scopes.join(" "))
                .append_pair("access_type", "offline")
                .append_pair("include_granted_scopes", "true")
                .append_pair("prompt", "consent");

            if let Some(state) = state {
                pairs.append_pair("state", state);
            }
        }

        Ok(url.into())
    }

    async fn exchange_code_for_credential(
        &self,
        code: &str,
        mode: &RedirectMode,
    ) -> Result<Credential, FlowError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(FlowError::UserInputInvalid("authorization code is empty".to_string()));
        }

        let redirect_uri = mode.redirect_uri();
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.secret.client_id.as_str()),
            ("client_secret", self.secret.client_secret.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
        ];

        let response = self.post_token(&params, Grant::AuthorizationCode).await?;
        tracing::debug!("Exchanged authorization code via {}", redirect_uri);
        Ok(self.credential_from_response(response))
    }

    async fn capture_via_local_redirect(
        &self,
        port: u16,
        auto_open_browser: bool,
        prompter: &dyn AuthPrompter,
    ) -> Result<Credential, FlowError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|e| FlowError::PortUnavailable {
                port,
                reason: e.to_string(),
            })?;
        let bound_port = listener
            .local_addr()
            .map_err(|e| FlowError::PortUnavailable {
                port,
                reason: e.to_string(),
            })?
            .port();

        let mode = RedirectMode::Loopback { port: bound_port };
        let state = Uuid::new_v4().simple().to_string();
        let url = self.build_authorization_url(&mode, Some(&state))?;

        prompter.present_url(&url);
        if auto_open_browser && !prompter.open_browser(&url) {
            tracing::info!("Browser launch failed; waiting for the URL to be opened manually");
        }
        prompter.report(&format!(
            "Waiting for authorization redirect on http://localhost:{}/ ...",
            bound_port
        ));

        let server = RedirectServer::new(bound_port, state, mode.redirect_uri());
        // the listener and every connection go away with the serve future
        let waited = tokio::time::timeout(self.redirect_timeout, server.serve(listener)).await;

        let code = match waited {
            Ok(result) => result?,
            Err(_) => {
                return Err(FlowError::Timeout {
                    secs: self.redirect_timeout.as_secs(),
                })
            }
        };

        self.exchange_code_for_credential(&code, &mode).await
    }

    async fn refresh(&self, credential: &Credential) -> Result<Credential, FlowError> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| FlowError::RefreshRevoked("no refresh token stored".to_string()))?;

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.secret.client_id.as_str()),
            ("client_secret", self.secret.client_secret.as_str()),
        ];

        let response = self.post_token(&params, Grant::RefreshToken).await?;
        let mut refreshed = self.credential_from_response(response);

        // Google usually omits the refresh token on refresh
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token.clone_from(&credential.refresh_token);
        }
        if refreshed.scopes.is_empty() {
            refreshed.scopes.clone_from(&credential.scopes);
        }

        Ok(refreshed)
    }
}

/// What a single request to the loopback listener amounted to
#[derive(Debug, PartialEq, Eq)]
enum RedirectOutcome {
    Code(String),
    Failed(FlowError),
    /// Not a redirect (favicon and the like)
    Ignored,
}

type Settled = Result<String, FlowError>;

/// Answers loopback requests and hands the first redirect to the waiting capture
struct RedirectHandler {
    expected_state: String,
    redirect_uri: String,
    settled: Mutex<Option<oneshot::Sender<Settled>>>,
}

impl RedirectHandler {
    async fn handle(&self, request: &Request<Incoming>) -> Response<Full<Bytes>> {
        let target = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let (status, page, outcome) =
            match parse_redirect(target, &self.expected_state, &self.redirect_uri) {
                RedirectOutcome::Ignored => return page_response(StatusCode::NOT_FOUND, ""),
                RedirectOutcome::Code(code) => (StatusCode::OK, SUCCESS_PAGE, Ok(code)),
                RedirectOutcome::Failed(err) => (StatusCode::BAD_REQUEST, FAILURE_PAGE, Err(err)),
            };

        // later redirects still get a page, only the first one counts
        if let Some(sender) = self.settled.lock().await.take() {
            let _ = sender.send(outcome);
        }
        page_response(status, page)
    }
}

fn page_response(status: StatusCode, page: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(page.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
    response
}

/// HTTP/1.1 server for one authorization redirect.
///
/// Each accepted connection is served on its own task, so an idle speculative
/// connection from the browser cannot hold up the real redirect.
struct RedirectServer {
    port: u16,
    handler: Arc<RedirectHandler>,
    settled: oneshot::Receiver<Settled>,
}

impl RedirectServer {
    fn new(port: u16, expected_state: String, redirect_uri: String) -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            port,
            handler: Arc::new(RedirectHandler {
                expected_state,
                redirect_uri,
                settled: Mutex::new(Some(tx)),
            }),
            settled: rx,
        }
    }

    /// Serve until the first redirect arrives. The listener and all connection
    /// tasks are dropped when this future completes or is cancelled.
    async fn serve(self, listener: TcpListener) -> Settled {
        let Self {
            port,
            handler,
            mut settled,
        } = self;
        let mut connections = JoinSet::new();

        let outcome = loop {
            tokio::select! {
                result = &mut settled => {
                    break result.unwrap_or_else(|_| {
                        Err(FlowError::ProviderExchange("redirect listener closed".to_string()))
                    });
                }
                accepted = listener.accept() => {
                    let (stream, peer) = accepted.map_err(|e| FlowError::PortUnavailable {
                        port,
                        reason: format!("accept failed: {}", e),
                    })?;
                    tracing::debug!("Loopback connection from {}", peer);

                    let handler = Arc::clone(&handler);
                    connections.spawn(async move {
                        let service = service_fn(move |request: Request<Incoming>| {
                            let handler = Arc::clone(&handler);
                            async move { Ok::<_, Infallible>(handler.handle(&request).await) }
                        });
                        if let Err(e) = http1::Builder::new()
                            .keep_alive(false)
                            .max_buf_size(MAX_REQUEST_HEAD_BYTES)
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            tracing::debug!("Loopback connection from {} ended: {}", peer, e);
                        }
                    });
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        };

        drop(listener);
        // let the redirect's own connection finish writing its page; idle ones are aborted
        let _ = tokio::time::timeout(RESPONSE_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        connections.abort_all();

        outcome
    }
}

/// Classify a request target (path and query) received on the loopback listener
fn parse_redirect(target: &str, expected_state: &str, redirect_uri: &str) -> RedirectOutcome {
    let Ok(url) = Url::parse(&format!("http://localhost{}", target)) else {
        return RedirectOutcome::Ignored;
    };

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return RedirectOutcome::Failed(match error.as_str() {
            "redirect_uri_mismatch" => FlowError::RedirectMismatch {
                redirect_uri: redirect_uri.to_string(),
            },
            "access_denied" => FlowError::AccessDenied,
            other => FlowError::ProviderExchange(other.to_string()),
        });
    }

    match code {
        Some(_) if state.as_deref() != Some(expected_state) => {
            RedirectOutcome::Failed(FlowError::StateMismatch)
        }
        Some(code) if code.is_empty() => RedirectOutcome::Failed(FlowError::InvalidGrant(
            "redirect carried an empty code".to_string(),
        )),
        Some(code) => RedirectOutcome::Code(code),
        None => RedirectOutcome::Ignored,
    }
}
