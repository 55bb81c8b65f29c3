use http::{Request, Response};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;

/// Tower layer that wraps each outbound request in an `outgoing_http` span
///
/// The span carries:
/// - `http.method`: the HTTP method
/// - `http.url`: scheme, authority and path (query string dropped)
/// - `http.status_code`: recorded when a response arrives
/// - `error`: set for 4xx/5xx responses and failed requests
#[derive(Clone, Debug, Default)]
pub struct RequestSpanLayer;

impl RequestSpanLayer {
    /// Create the layer; spans are emitted at `DEBUG` level
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestSpanLayer {
    type Service = RequestSpanService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestSpanService { inner }
    }
}

/// Service that instruments requests with a tracing span
#[derive(Clone, Debug)]
pub struct RequestSpanService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RequestSpanService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: std::fmt::Display + Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let uri = req.uri();
        let url = format!(
            "{}://{}{}",
            uri.scheme_str().unwrap_or("https"),
            uri.authority().map_or("", http::uri::Authority::as_str),
            uri.path()
        );
        let span = tracing::debug_span!(
            "outgoing_http",
            http.method = %req.method(),
            http.url = %url,
            http.status_code = tracing::field::Empty,
            error = tracing::field::Empty,
        );

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let result = inner.call(req).instrument(span.clone()).await;
            match &result {
                Ok(response) => {
                    let status = response.status();
                    span.record("http.status_code", status.as_u16());
                    if status.is_client_error() || status.is_server_error() {
                        span.record("error", true);
                    }
                }
                Err(err) => {
                    span.record("error", true);
                    tracing::debug!(parent: &span, error = %err, "request failed");
                }
            }
            result
        })
    }
}
