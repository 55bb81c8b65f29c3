use crate::config::{ClientOption, Config};
use crate::error::{BoxError, HttpError};
use crate::layers::{
    CookieLayer, CookieStore, RedirectAction, RedirectAttempt, RedirectPolicy, RequestSpanLayer,
};
use crate::transport::{RequestBody, ResponseBody, Sender};
use crate::Client;
use bytes::Bytes;
use http::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneSyncService;
use tower::{Layer, ServiceExt};
use tower_http::follow_redirect::FollowRedirectLayer;

/// Fluent alternative to passing a list of [`ClientOption`]s to [`Client::new`].
///
/// ```ignore
/// let client = Client::builder()
///     .timeout(Duration::from_secs(5))
///     .headers(headers)
///     .json_error()
///     .build()?;
/// ```
#[derive(Debug, Default)]
pub struct ClientBuilder {
    options: Vec<ClientOption>,
}

impl ClientBuilder {
    /// Create a builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an arbitrary option
    #[must_use]
    pub fn option(mut self, option: ClientOption) -> Self {
        self.options.push(option);
        self
    }

    /// Set the timeout for the whole exchange; zero disables it
    #[must_use]
    pub fn timeout(self, timeout: Duration) -> Self {
        self.option(ClientOption::timeout(timeout))
    }

    /// Limit the size of buffered response bodies
    #[must_use]
    pub fn max_body_size(self, limit: usize) -> Self {
        self.option(ClientOption::max_body_size(limit))
    }

    /// Register a `tower` layer
    #[must_use]
    pub fn layer<L>(self, layer: L) -> Self
    where
        L: Layer<Sender> + Send + Sync + 'static,
        L::Service: tower::Service<
                http::Request<RequestBody>,
                Response = http::Response<ResponseBody>,
                Error = HttpError,
            > + Clone
            + Send
            + Sync
            + 'static,
        <L::Service as tower::Service<http::Request<RequestBody>>>::Future: Send + 'static,
    {
        self.option(ClientOption::layer(layer))
    }

    /// Use a custom base sender
    #[must_use]
    pub fn transport(self, transport: Sender) -> Self {
        self.option(ClientOption::transport(transport))
    }

    /// Replace the redirect policy
    #[must_use]
    pub fn redirect(self, policy: RedirectPolicy) -> Self {
        self.option(ClientOption::redirect(policy))
    }

    /// Decide every redirect hop with `check`
    #[must_use]
    pub fn check_redirect<F>(self, check: F) -> Self
    where
        F: Fn(&RedirectAttempt<'_>) -> Result<RedirectAction, HttpError> + Send + Sync + 'static,
    {
        self.option(ClientOption::check_redirect(check))
    }

    /// Use `store` for cookies
    #[must_use]
    pub fn cookie_jar(self, store: Arc<dyn CookieStore>) -> Self {
        self.option(ClientOption::cookie_jar(store))
    }

    /// Register a closure wrapping the sender built so far
    #[must_use]
    pub fn layer_fn<F>(self, layer: F) -> Self
    where
        F: Fn(Sender) -> Sender + Send + Sync + 'static,
    {
        self.option(ClientOption::layer_fn(layer))
    }

    /// Append `headers` to every request
    #[must_use]
    pub fn headers(self, headers: HeaderMap) -> Self {
        self.option(ClientOption::headers(headers))
    }

    /// Convert failing responses with `handler`
    #[must_use]
    pub fn error_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&Client, &http::response::Parts, &Bytes) -> HttpError + Send + Sync + 'static,
    {
        self.option(ClientOption::error_handler(handler))
    }

    /// Report failing responses as JSON objects
    #[must_use]
    pub fn json_error(self) -> Self {
        self.option(ClientOption::json_error())
    }

    /// Report failing responses as `E`
    #[must_use]
    pub fn custom_json_error<E>(self) -> Self
    where
        E: serde::de::DeserializeOwned + std::error::Error + Send + Sync + 'static,
    {
        self.option(ClientOption::custom_json_error::<E>())
    }

    /// Build the client
    ///
    /// # Errors
    /// Returns `HttpError::Tls` if no transport was given and the default one
    /// cannot be created
    pub fn build(self) -> Result<Client, HttpError> {
        Client::new(self.options)
    }
}

/// Compose the request sender for `config` around `transport`.
///
/// Request flow (outer to inner):
///   `RequestSpan` -> Timeout -> `FollowRedirect` -> Cookies -> user layers
///   (last registered first) -> transport
///
/// Cookies and user layers sit inside the redirect handling, so they see
/// every hop.
pub fn build_sender(config: &Config, transport: Sender) -> Sender {
    let mut sender = transport;
    for layer in config.layers() {
        sender = layer(sender);
    }

    if let Some(store) = &config.cookie_jar {
        sender = BoxCloneSyncService::new(CookieLayer::new(Arc::clone(store)).layer(sender));
    }

    let mut sender = BoxCloneSyncService::new(
        FollowRedirectLayer::with_policy(config.redirect.clone()).layer(sender),
    );

    let timeout = config.timeout;
    if !timeout.is_zero() {
        let timed = TimeoutLayer::new(timeout)
            .layer(sender)
            .map_err(move |e: BoxError| map_tower_error(e, timeout));
        sender = BoxCloneSyncService::new(timed);
    }

    tracing::debug!(
        layers = config.layers().len(),
        cookies = config.cookie_jar.is_some(),
        timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        "built request sender"
    );

    BoxCloneSyncService::new(RequestSpanLayer::new().layer(sender))
}

/// Map tower errors to `HttpError` with the configured timeout.
///
/// Errors already produced as `HttpError` by inner services are unwrapped
/// instead of being wrapped as `Transport`.
fn map_tower_error(err: BoxError, timeout: Duration) -> HttpError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return HttpError::Timeout(timeout);
    }

    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(other) => HttpError::Transport(other),
    }
}
