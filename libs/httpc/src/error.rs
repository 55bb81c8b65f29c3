use bytes::Bytes;
use http::{Response, StatusCode};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Boxed error type used for transport, body and domain error sources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// HTTP client error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// Transport error (network, connection, DNS, layer failure)
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    /// Request did not complete within the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// TLS setup error while building the default transport
    #[error("TLS error: {0}")]
    Tls(#[source] BoxError),

    /// Reading the response body failed
    #[error("Failed to read response body: {0}")]
    Body(#[source] BoxError),

    /// JSON parsing error
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Writing the response body to a caller-supplied writer failed
    #[error("Write failed: {0}")]
    Io(#[from] std::io::Error),

    /// Buffered response body exceeded the configured size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// Status code did not match the expected one
    #[error("unexpected status code: {}", .0.as_u16())]
    UnexpectedStatus(StatusCode),

    /// Default redirect limit was exceeded
    #[error("stopped after {0} redirects")]
    TooManyRedirects(usize),

    /// Domain error produced by the configured error handler from a
    /// failing response body
    #[error(transparent)]
    Remote(BoxError),
}

impl HttpError {
    /// Returns the domain error produced by the error handler if it is of type `E`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// if let Some(body) = err.remote::<BytesErrorBody>() {
    ///     tracing::warn!(body = %body, "request rejected");
    /// }
    /// ```
    #[must_use]
    pub fn remote<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            HttpError::Remote(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

/// Error returned by [`Client::do_req`](crate::Client::do_req) and
/// [`Client::json`](crate::Client::json).
///
/// Carries the response alongside the error whenever one was received, so
/// callers can inspect status, headers and the buffered body on failure.
/// Transport failures have no response.
pub struct RequestError {
    response: Option<Response<Bytes>>,
    error: HttpError,
}

impl RequestError {
    pub(crate) fn new(error: HttpError) -> Self {
        Self {
            response: None,
            error,
        }
    }

    pub(crate) fn with_response(response: Response<Bytes>, error: HttpError) -> Self {
        Self {
            response: Some(response),
            error,
        }
    }

    /// The underlying error
    #[must_use]
    pub fn error(&self) -> &HttpError {
        &self.error
    }

    /// The response received before the failure, if any
    #[must_use]
    pub fn response(&self) -> Option<&Response<Bytes>> {
        self.response.as_ref()
    }

    /// Status code of the received response, if any
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.response.as_ref().map(Response::status)
    }

    /// Shorthand for [`HttpError::remote`]
    #[must_use]
    pub fn remote<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.remote::<E>()
    }

    /// Split into the response (if any) and the error
    #[must_use]
    pub fn into_parts(self) -> (Option<Response<Bytes>>, HttpError) {
        (self.response, self.error)
    }

    /// Discard the response and keep the error
    #[must_use]
    pub fn into_error(self) -> HttpError {
        self.error
    }
}

impl fmt::Debug for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestError")
            .field("status", &self.status())
            .field("error", &self.error)
            .finish()
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl std::error::Error for RequestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.error)
    }
}

impl From<RequestError> for HttpError {
    fn from(err: RequestError) -> Self {
        err.error
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::error::Error;

    #[derive(Debug)]
    struct TestError(&'static str);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Error for TestError {}

    #[test]
    fn test_transport_error_preserves_source() {
        let err = HttpError::Transport(Box::new(TestError("connection refused")));

        let source = err.source().expect("Transport error should have a source");
        let downcast = source.downcast_ref::<TestError>();
        assert_eq!(downcast.map(|e| e.0), Some("connection refused"));
    }

    #[test]
    fn test_unexpected_status_names_actual_code() {
        let err = HttpError::UnexpectedStatus(StatusCode::OK);
        assert_eq!(err.to_string(), "unexpected status code: 200");
    }

    #[test]
    fn test_remote_error_is_transparent() {
        let err = HttpError::Remote(Box::new(TestError("quota exceeded")));
        assert_eq!(err.to_string(), "quota exceeded");
        assert_eq!(err.remote::<TestError>().map(|e| e.0), Some("quota exceeded"));
    }

    #[test]
    fn test_remote_downcast_other_variant() {
        let err = HttpError::Timeout(Duration::from_secs(1));
        assert!(err.remote::<TestError>().is_none());
    }

    #[test]
    fn test_request_error_keeps_response() {
        let response = Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .body(Bytes::from_static(b"bad"))
            .unwrap();
        let err = RequestError::with_response(
            response,
            HttpError::Remote(Box::new(TestError("bad"))),
        );

        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
        assert_eq!(err.to_string(), "bad");
        assert!(err.remote::<TestError>().is_some());

        let (response, error) = err.into_parts();
        assert_eq!(response.map(Response::into_body), Some(Bytes::from_static(b"bad")));
        assert!(matches!(error, HttpError::Remote(_)));
    }

    #[test]
    fn test_request_error_without_response() {
        let err = RequestError::new(HttpError::Timeout(Duration::from_millis(5)));
        assert!(err.response().is_none());
        assert!(err.status().is_none());
        assert!(matches!(err.into_error(), HttpError::Timeout(_)));
    }
}
