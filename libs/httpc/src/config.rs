use crate::error::HttpError;
use crate::error_handler::{self, ErrorHandler, JsonErrorBody};
use crate::layers::{CookieStore, HeaderLayer, RedirectAction, RedirectAttempt, RedirectPolicy};
use crate::transport::{RequestBody, ResponseBody, Sender};
use crate::Client;
use bytes::Bytes;
use http::{HeaderMap, Request, Response};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tower::util::BoxCloneSyncService;

/// Default timeout for a whole exchange, body included
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Wraps a [`Sender`] into another one. See [`ClientOption::layer_fn`].
pub type Layer = Arc<dyn Fn(Sender) -> Sender + Send + Sync>;

/// Custom JSON parser installed with [`ClientOption::json_unmarshal`].
/// Typed decoding goes through the returned value.
pub type JsonUnmarshaler =
    Arc<dyn Fn(&[u8]) -> Result<serde_json::Value, serde_json::Error> + Send + Sync>;

/// Client configuration.
///
/// Only mutated by [`ClientOption`]s; a [`Client`] rebuilds its request
/// sender every time options are applied.
#[derive(Clone)]
pub struct Config {
    /// Redirect handling (default: follow up to 10 redirects)
    pub redirect: RedirectPolicy,

    /// Cookie store consulted on every request and redirect hop
    pub cookie_jar: Option<Arc<dyn CookieStore>>,

    /// Timeout covering the whole exchange, body included (default: 30s).
    /// Zero disables it.
    pub timeout: Duration,

    /// Largest response body buffered by `do_req`, after decompression.
    /// `None` (default) buffers bodies of any size.
    pub max_body_size: Option<usize>,

    /// Custom JSON parser used by response options and JSON error handlers.
    /// `None` decodes straight from the bytes with `serde_json::from_slice`.
    pub json_unmarshal: Option<JsonUnmarshaler>,

    transport: Option<Sender>,
    layers: Vec<Layer>,
    error_handler: ErrorHandler,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redirect: RedirectPolicy::default(),
            cookie_jar: None,
            timeout: DEFAULT_TIMEOUT,
            max_body_size: None,
            json_unmarshal: None,
            transport: None,
            layers: Vec::new(),
            error_handler: Arc::new(error_handler::bytes_error_handler),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("redirect", &self.redirect)
            .field("cookie_jar", &self.cookie_jar.is_some())
            .field("timeout", &self.timeout)
            .field("max_body_size", &self.max_body_size)
            .field("custom_json_unmarshal", &self.json_unmarshal.is_some())
            .field("custom_transport", &self.transport.is_some())
            .field("layers", &self.layers.len())
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Base transport set with [`ClientOption::transport`], if any
    #[must_use]
    pub fn transport(&self) -> Option<&Sender> {
        self.transport.as_ref()
    }

    /// Replace the base transport
    pub fn set_transport(&mut self, transport: Sender) {
        self.transport = Some(transport);
    }

    /// Register a layer; the last registered layer runs first on requests
    pub fn add_layer(&mut self, layer: Layer) {
        self.layers.push(layer);
    }

    /// Registered layers, in registration order
    #[must_use]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Replace the handler for responses with status >= 400
    pub fn set_error_handler(&mut self, handler: ErrorHandler) {
        self.error_handler = handler;
    }

    /// Handler for responses with status >= 400
    #[must_use]
    pub fn error_handler(&self) -> &ErrorHandler {
        &self.error_handler
    }

    /// Decode `body` into `T`, through the custom JSON parser if one is set
    ///
    /// # Errors
    /// Returns the parse error if `body` is not valid JSON for `T`
    pub fn decode<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, serde_json::Error> {
        match &self.json_unmarshal {
            Some(unmarshal) => serde_json::from_value(unmarshal(body)?),
            None => serde_json::from_slice(body),
        }
    }

    pub(crate) fn apply(&mut self, options: impl IntoIterator<Item = ClientOption>) {
        for option in options {
            (option.0)(self);
        }
    }
}

/// A configuration change applied when a [`Client`] is built, extended or
/// given more options.
///
/// ```ignore
/// let client = Client::new([
///     ClientOption::timeout(Duration::from_secs(5)),
///     ClientOption::headers(headers),
///     ClientOption::json_error(),
/// ])?;
/// ```
pub struct ClientOption(Box<dyn FnOnce(&mut Config) + Send>);

impl fmt::Debug for ClientOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOption").finish_non_exhaustive()
    }
}

impl ClientOption {
    /// Arbitrary change to the configuration
    #[must_use]
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(&mut Config) + Send + 'static,
    {
        Self(Box::new(f))
    }

    /// Decide every redirect hop with `check`. [`RedirectAction::Stop`] hands
    /// the 3xx response back; returning an error stops there too and
    /// [`Client::do_req`] reports it along with that response.
    #[must_use]
    pub fn check_redirect<F>(check: F) -> Self
    where
        F: Fn(&RedirectAttempt<'_>) -> Result<RedirectAction, HttpError> + Send + Sync + 'static,
    {
        let check = Arc::new(check);
        Self::new(move |cfg| cfg.redirect.set_check(check))
    }

    /// Replace the whole redirect policy
    #[must_use]
    pub fn redirect(policy: RedirectPolicy) -> Self {
        Self::new(move |cfg| cfg.redirect = policy)
    }

    /// Use `store` for cookies
    #[must_use]
    pub fn cookie_jar(store: Arc<dyn CookieStore>) -> Self {
        Self::new(move |cfg| cfg.cookie_jar = Some(store))
    }

    /// Timeout for the whole exchange; zero disables it
    #[must_use]
    pub fn timeout(timeout: Duration) -> Self {
        Self::new(move |cfg| cfg.timeout = timeout)
    }

    /// Fail with [`HttpError::BodyTooLarge`] instead of buffering more than
    /// `limit` bytes of a response body
    #[must_use]
    pub fn max_body_size(limit: usize) -> Self {
        Self::new(move |cfg| cfg.max_body_size = Some(limit))
    }

    /// Base sender wrapped by all layers. See
    /// [`TransportConfig`](crate::TransportConfig) for tuning the default one.
    #[must_use]
    pub fn transport(transport: Sender) -> Self {
        Self::new(move |cfg| cfg.set_transport(transport))
    }

    /// Register a `tower` layer
    #[must_use]
    pub fn layer<L>(layer: L) -> Self
    where
        L: tower::Layer<Sender> + Send + Sync + 'static,
        L::Service: tower::Service<
                Request<RequestBody>,
                Response = Response<ResponseBody>,
                Error = HttpError,
            > + Clone
            + Send
            + Sync
            + 'static,
        <L::Service as tower::Service<Request<RequestBody>>>::Future: Send + 'static,
    {
        Self::layer_fn(move |sender| BoxCloneSyncService::new(layer.layer(sender)))
    }

    /// Register a closure wrapping the sender built so far
    #[must_use]
    pub fn layer_fn<F>(layer: F) -> Self
    where
        F: Fn(Sender) -> Sender + Send + Sync + 'static,
    {
        let layer: Layer = Arc::new(layer);
        Self::new(move |cfg| cfg.add_layer(layer))
    }

    /// Append `headers` to every request
    #[must_use]
    pub fn headers(headers: HeaderMap) -> Self {
        Self::layer(HeaderLayer::new(headers))
    }

    /// Convert failing responses with `handler`
    #[must_use]
    pub fn error_handler<F>(handler: F) -> Self
    where
        F: Fn(&Client, &http::response::Parts, &Bytes) -> HttpError + Send + Sync + 'static,
    {
        let handler: ErrorHandler = Arc::new(handler);
        Self::new(move |cfg| cfg.set_error_handler(handler))
    }

    /// Report failing responses as [`BytesErrorBody`](crate::BytesErrorBody) (default)
    #[must_use]
    pub fn bytes_error() -> Self {
        Self::error_handler(error_handler::bytes_error_handler)
    }

    /// Report failing responses as [`JsonErrorBody`]
    #[must_use]
    pub fn json_error() -> Self {
        Self::custom_json_error::<JsonErrorBody>()
    }

    /// Report failing responses as `E`, decoded from the JSON body.
    /// A body that does not decode is reported as [`HttpError::Json`].
    #[must_use]
    pub fn custom_json_error<E>() -> Self
    where
        E: DeserializeOwned + std::error::Error + Send + Sync + 'static,
    {
        let handler = error_handler::custom_json_error_handler::<E>();
        Self::new(move |cfg| cfg.set_error_handler(handler))
    }

    /// Parse JSON with `unmarshal` instead of `serde_json::from_slice`
    #[must_use]
    pub fn json_unmarshal<F>(unmarshal: F) -> Self
    where
        F: Fn(&[u8]) -> Result<serde_json::Value, serde_json::Error> + Send + Sync + 'static,
    {
        let unmarshal: JsonUnmarshaler = Arc::new(unmarshal);
        Self::new(move |cfg| cfg.json_unmarshal = Some(unmarshal))
    }
}
