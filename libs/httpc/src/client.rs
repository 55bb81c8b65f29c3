use crate::builder::{ClientBuilder, build_sender};
use crate::config::{ClientOption, Config};
use crate::error::{HttpError, RequestError};
use crate::layers::RedirectFailure;
use crate::response::{PartialBody, ResponseOption, collect_body, copy_body};
use crate::transport::{RequestBody, ResponseBody, Sender, TransportConfig};
use bytes::Bytes;
use http::{Request, Response};
use serde::de::DeserializeOwned;
use std::fmt;
use tokio::io::AsyncWrite;
use tokio::time::Instant;
use tower::ServiceExt;

/// HTTP client decorating a [`Sender`] with layers, error handling and
/// response options.
///
/// `Client` is cheap to clone; clones share the built sender. Concurrent
/// requests need no locking. Changing the configuration requires
/// `&mut self` ([`Client::add_options`]) or produces a new client
/// ([`Client::extend`]).
///
/// # Example
///
/// ```ignore
/// use httpc::{Client, ClientOption, ResponseOption};
///
/// let client = Client::new([ClientOption::json_error()])?;
///
/// let mut user = User::default();
/// let req = Request::get("https://api.example.com/users/1").body(Bytes::new())?;
/// client.json(req, &mut user, []).await?;
/// ```
#[derive(Clone)]
pub struct Client {
    config: Config,
    transport: Sender,
    sender: Sender,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client from the defaults plus `options`, applied in order.
    ///
    /// # Errors
    /// Returns `HttpError::Tls` if no transport option is given and the
    /// default transport cannot be created
    pub fn new(options: impl IntoIterator<Item = ClientOption>) -> Result<Self, HttpError> {
        let mut config = Config::default();
        config.apply(options);

        let transport = match config.transport() {
            Some(transport) => transport.clone(),
            None => TransportConfig::default().build()?,
        };
        let sender = build_sender(&config, transport.clone());

        Ok(Self {
            config,
            transport,
            sender,
        })
    }

    /// Create a builder for fluent configuration
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Configuration the client was built from
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The full request sender (transport, layers, cookies, redirects and
    /// timeout) for code expecting a plain `tower::Service`
    #[must_use]
    pub fn service(&self) -> Sender {
        self.sender.clone()
    }

    /// Apply more options and rebuild the sender
    pub fn add_options(&mut self, options: impl IntoIterator<Item = ClientOption>) {
        self.config.apply(options);
        if let Some(transport) = self.config.transport() {
            self.transport = transport.clone();
        }
        self.sender = build_sender(&self.config, self.transport.clone());
    }

    /// New independent client with this configuration plus `options`
    #[must_use]
    pub fn extend(&self, options: impl IntoIterator<Item = ClientOption>) -> Self {
        let mut client = self.clone();
        client.add_options(options);
        client
    }

    /// Send `req` and buffer the response body.
    ///
    /// A status >= 400 is converted by the configured error handler and the
    /// response options are skipped. Otherwise `options` run in order and the
    /// first failure is returned. Whenever a response was received it comes
    /// back with the error, carrying the buffered body.
    ///
    /// # Errors
    /// - transport failures and timeouts, without a response
    /// - a failed redirect check, with the redirect response
    /// - body read failures, with the partially read body
    /// - the error handler's error for status >= 400
    /// - the first failing response option's error
    pub async fn do_req<'a, B>(
        &self,
        req: Request<B>,
        options: impl IntoIterator<Item = ResponseOption<'a>>,
    ) -> Result<Response<Bytes>, RequestError>
    where
        B: Into<RequestBody>,
    {
        let options: Vec<ResponseOption<'a>> = options.into_iter().collect();
        let deadline = self.deadline();

        let (response, redirect_error) = self.send(req).await.map_err(RequestError::new)?;
        let (parts, body) = response.into_parts();

        let body = match collect_body(
            body,
            deadline,
            self.config.timeout,
            self.config.max_body_size,
        )
        .await
        {
            Ok(body) => body,
            Err(PartialBody { data, error }) => {
                tracing::debug!(
                    status = parts.status.as_u16(),
                    read = data.len(),
                    error = %error,
                    "failed to read response body"
                );
                return Err(RequestError::with_response(
                    Response::from_parts(parts, data),
                    error,
                ));
            }
        };

        if let Some(error) = redirect_error {
            return Err(RequestError::with_response(
                Response::from_parts(parts, body),
                error,
            ));
        }

        if parts.status.as_u16() >= 400 {
            let error = (self.config.error_handler())(self, &parts, &body);
            tracing::debug!(
                status = parts.status.as_u16(),
                error = %error,
                "request failed with error status"
            );
            return Err(RequestError::with_response(
                Response::from_parts(parts, body),
                error,
            ));
        }

        for option in options {
            if let Err(error) = option.apply(self, &parts, &body) {
                return Err(RequestError::with_response(
                    Response::from_parts(parts, body),
                    error,
                ));
            }
        }

        Ok(Response::from_parts(parts, body))
    }

    /// [`Client::do_req`] decoding the body into `target` before running
    /// `options`.
    ///
    /// # Errors
    /// Same as [`Client::do_req`]; a body that does not decode yields
    /// `HttpError::Json`
    pub async fn json<'a, B, T>(
        &self,
        req: Request<B>,
        target: &'a mut T,
        options: impl IntoIterator<Item = ResponseOption<'a>>,
    ) -> Result<Response<Bytes>, RequestError>
    where
        B: Into<RequestBody>,
        T: DeserializeOwned + Send,
    {
        let options: Vec<ResponseOption<'a>> = std::iter::once(ResponseOption::json(target))
            .chain(options)
            .collect();
        self.do_req(req, options).await
    }

    /// Send `req` and copy the raw response body into `writer`, whatever
    /// the status. Returns the number of bytes copied.
    ///
    /// # Errors
    /// Returns transport, timeout, redirect check, body read and write errors
    pub async fn stream<B, W>(&self, req: Request<B>, writer: &mut W) -> Result<u64, HttpError>
    where
        B: Into<RequestBody>,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let deadline = self.deadline();
        let (response, redirect_error) = self.send(req).await?;
        if let Some(error) = redirect_error {
            return Err(error);
        }
        let status = response.status();

        let copy = copy_body(response.into_body(), writer);
        let copied = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, copy)
                .await
                .map_err(|_| HttpError::Timeout(self.config.timeout))??,
            None => copy.await?,
        };

        tracing::debug!(status = status.as_u16(), bytes = copied, "streamed response body");
        Ok(copied)
    }

    /// Send `req` through the sender, returning the response along with the
    /// error of a failed redirect check that stopped at it
    async fn send<B>(
        &self,
        req: Request<B>,
    ) -> Result<(Response<ResponseBody>, Option<HttpError>), HttpError>
    where
        B: Into<RequestBody>,
    {
        let failure = RedirectFailure::default();
        let mut req = req.map(Into::into);
        req.extensions_mut().insert(failure.clone());

        let response = self.sender.clone().oneshot(req).await?;
        Ok((response, failure.take()))
    }

    /// End of the exchange, `None` when the timeout is disabled
    fn deadline(&self) -> Option<Instant> {
        if self.config.timeout.is_zero() {
            None
        } else {
            Instant::now().checked_add(self.config.timeout)
        }
    }
}
