//! Base request senders.
//!
//! A [`Sender`] is the type-erased tower service every layer wraps. The
//! default one is a pooled hyper client with rustls and transparent response
//! decompression; any other service with the same request, response and
//! error types can replace it via
//! [`ClientOption::transport`](crate::ClientOption::transport).

use crate::error::{BoxError, HttpError};
use crate::tls;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::convert::Infallible;
use std::time::Duration;
use tower::util::BoxCloneSyncService;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;

/// Request body accepted by every [`Sender`].
///
/// Bodies are fully buffered so they can be replayed on 307/308 redirects.
pub type RequestBody = Full<Bytes>;

/// Type-erased response body produced by every [`Sender`].
pub type ResponseBody = http_body_util::combinators::BoxBody<Bytes, BoxError>;

/// The composed request-execution chain: base transport plus layers.
pub type Sender = BoxCloneSyncService<Request<RequestBody>, Response<ResponseBody>, HttpError>;

/// Default maximum number of idle pooled connections per host
pub const DEFAULT_MAX_IDLE_PER_HOST: usize = 100;

/// Default idle timeout for pooled connections
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// TLS root certificate configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native root certificate store
    Native,
}

/// Settings for the default hyper transport.
///
/// ```ignore
/// let transport = TransportConfig {
///     pool_idle_timeout: Some(Duration::from_secs(30)),
///     ..Default::default()
/// }
/// .build()?;
///
/// let client = Client::new([ClientOption::transport(transport)])?;
/// ```
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum idle connections kept per host (default: 100)
    pub pool_max_idle_per_host: usize,

    /// Idle connections older than this are closed (default: 90 seconds).
    /// `None` keeps idle connections indefinitely.
    pub pool_idle_timeout: Option<Duration>,

    /// TCP connect timeout (default: none)
    pub connect_timeout: Option<Duration>,

    /// Offer HTTP/2 via ALPN in addition to HTTP/1.1 (default: true)
    pub http2: bool,

    /// Send `Accept-Encoding` and transparently decode gzip, br and deflate
    /// bodies (default: true)
    pub decompression: bool,

    /// Trusted TLS roots (default: WebPKI)
    pub tls_roots: TlsRootConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            pool_max_idle_per_host: DEFAULT_MAX_IDLE_PER_HOST,
            pool_idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            connect_timeout: None,
            http2: true,
            decompression: true,
            tls_roots: TlsRootConfig::default(),
        }
    }
}

impl TransportConfig {
    /// Build a pooled hyper [`Sender`] with these settings.
    ///
    /// Both `http` and `https` URLs are accepted.
    ///
    /// # Errors
    /// Returns `HttpError::Tls` if the TLS configuration cannot be created
    pub fn build(&self) -> Result<Sender, HttpError> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(self.connect_timeout);
        let https = self.https_connector(http)?;

        // pool_timer is required for pool_idle_timeout to take effect
        let mut builder = Client::builder(TokioExecutor::new());
        builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .pool_idle_timeout(self.pool_idle_timeout);
        let client = builder.build::<_, RequestBody>(https);

        let sender = if self.decompression {
            let service = ServiceBuilder::new()
                .layer(DecompressionLayer::new())
                .service(client)
                .map_response(box_response)
                .map_err(HttpError::from);
            BoxCloneSyncService::new(service)
        } else {
            let service = client.map_response(box_response).map_err(HttpError::from);
            BoxCloneSyncService::new(service)
        };

        tracing::debug!(
            http2 = self.http2,
            decompression = self.decompression,
            tls_roots = ?self.tls_roots,
            "built hyper transport"
        );
        Ok(sender)
    }

    fn https_connector(
        &self,
        http: HttpConnector,
    ) -> Result<HttpsConnector<HttpConnector>, HttpError> {
        let builder = match self.tls_roots {
            TlsRootConfig::WebPki => HttpsConnectorBuilder::new()
                .with_provider_and_webpki_roots(tls::crypto_provider())
                .map_err(|e| HttpError::Tls(Box::new(e)))?,
            TlsRootConfig::Native => {
                HttpsConnectorBuilder::new().with_tls_config(tls::native_roots_config()?)
            }
        };
        let builder = builder.https_or_http();

        let connector = if self.http2 {
            builder.enable_all_versions().wrap_connector(http)
        } else {
            builder.enable_http1().wrap_connector(http)
        };
        Ok(connector)
    }
}

/// Box any response body into [`ResponseBody`].
fn box_response<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, body.map_err(Into::into).boxed())
}

/// Wrap in-memory bytes as a [`ResponseBody`].
///
/// Handy for custom transports and layers that answer without touching the
/// network.
#[must_use]
pub fn full_body(data: impl Into<Bytes>) -> ResponseBody {
    Full::new(data.into())
        .map_err(|never: Infallible| match never {})
        .boxed()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_transport_config_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.pool_max_idle_per_host, 100);
        assert_eq!(config.pool_idle_timeout, Some(Duration::from_secs(90)));
        assert!(config.connect_timeout.is_none());
        assert!(config.http2);
        assert!(config.decompression);
        assert_eq!(config.tls_roots, TlsRootConfig::WebPki);
    }

    #[tokio::test]
    async fn test_build_default_transport() {
        assert!(TransportConfig::default().build().is_ok());
    }

    #[tokio::test]
    async fn test_build_http1_without_decompression() {
        let config = TransportConfig {
            http2: false,
            decompression: false,
            connect_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        assert!(config.build().is_ok());
    }

    #[tokio::test]
    async fn test_build_native_roots() {
        let config = TransportConfig {
            tls_roots: TlsRootConfig::Native,
            ..Default::default()
        };
        // Native roots depend on the host; failures must be TLS errors.
        match config.build() {
            Ok(_) | Err(HttpError::Tls(_)) => {}
            Err(other) => panic!("unexpected error type: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_full_body_roundtrip() {
        let body = full_body("hello");
        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected, Bytes::from_static(b"hello"));
    }
}
