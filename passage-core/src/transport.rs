//! The dispatcher the flows speak through.
//!
//! The identity provider exposes a fixed route table; the SDK's only demand
//! on the transport is "POST this body to that route, give me back status
//! and body". [`Dispatch`] is that seam, and [`HttpTransport`] the reqwest
//! implementation bound to one host and port.

use crate::error::RequestError;
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

/// Routes exposed by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Account creation flow.
    Signup,
    /// Login flow.
    Login,
    /// Token peek: verify and rotate a session token.
    Refresh,
    /// Revoke every session of the bearing user.
    Revoke,
    /// Liveness probe.
    Health,
    /// Account deletion flow.
    Delete,
    /// Legacy-account migration flow.
    MigrateLogin,
    /// MFA-configuration update flow.
    UpdateMfa,
    /// Ticket-based account recovery flow.
    Recover,
}

impl Route {
    /// The path segment appended to the provider base.
    pub fn path(self) -> &'static str {
        match self {
            Route::Signup => "signup",
            Route::Login => "login",
            Route::Refresh => "refresh",
            Route::Revoke => "revoke",
            Route::Health => "health",
            Route::Delete => "delete",
            Route::MigrateLogin => "mLogin",
            Route::UpdateMfa => "upMfa",
            Route::Recover => "recover",
        }
    }
}

/// A raw response from the dispatcher, before envelope interpretation.
#[derive(Debug, Clone)]
pub struct RawReply {
    /// The HTTP status code.
    pub status: u16,
    /// The response body, verbatim.
    pub body: String,
}

/// The transport seam. Implementations carry their own timeout policy; the
/// explicit-timeout variant exists for the health probe, which takes a
/// caller-supplied deadline.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// POST `body` to `route`.
    async fn dispatch(&self, route: Route, body: String) -> Result<RawReply, RequestError>;

    /// POST `body` to `route`, overriding the transport's timeout.
    async fn dispatch_timeout(
        &self,
        route: Route,
        body: String,
        timeout: Duration,
    ) -> Result<RawReply, RequestError>;
}

/// Failure to construct the HTTP transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The host/port pair does not form a valid URL.
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    /// The underlying HTTP client could not be initialized.
    #[error("failed to initialize HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// The reqwest-backed dispatcher. Shared-immutable after construction; one
/// instance serves any number of concurrently progressing flows.
pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
}

impl HttpTransport {
    /// Connect to `https://host:port` with the default client.
    pub fn new(host: &str, port: u16) -> Result<Self, TransportError> {
        let base = Url::parse(&format!("https://{host}:{port}/"))?;
        Ok(HttpTransport {
            client: reqwest::Client::new(),
            base,
        })
    }

    /// Use a caller-configured client and base URL. The base must be a valid
    /// join root (end in `/`).
    pub fn with_client(client: reqwest::Client, base: Url) -> Self {
        HttpTransport { client, base }
    }

    fn endpoint(&self, route: Route) -> Result<Url, RequestError> {
        // Route paths are static and the base is validated at construction,
        // so a join failure means a corrupted base.
        self.base
            .join(route.path())
            .map_err(|_| RequestError::Request)
    }

    async fn send(
        &self,
        route: Route,
        body: String,
        timeout: Option<Duration>,
    ) -> Result<RawReply, RequestError> {
        let mut request = self.client.post(self.endpoint(route)?).body(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        log::debug!("{} -> {status}", route.path());
        Ok(RawReply { status, body })
    }
}

#[async_trait]
impl Dispatch for HttpTransport {
    async fn dispatch(&self, route: Route, body: String) -> Result<RawReply, RequestError> {
        self.send(route, body, None).await
    }

    async fn dispatch_timeout(
        &self,
        route: Route,
        body: String,
        timeout: Duration,
    ) -> Result<RawReply, RequestError> {
        self.send(route, body, Some(timeout)).await
    }
}
