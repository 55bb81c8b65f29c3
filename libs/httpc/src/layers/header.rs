use http::{HeaderMap, Request};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer that appends a fixed set of headers to every request.
///
/// Values are appended, so headers already present on the request keep
/// their values and gain the configured ones.
#[derive(Clone, Debug)]
pub struct HeaderLayer {
    headers: HeaderMap,
}

impl HeaderLayer {
    /// Create a layer appending `headers` to each outgoing request
    #[must_use]
    pub fn new(headers: HeaderMap) -> Self {
        Self { headers }
    }
}

impl<S> Layer<S> for HeaderLayer {
    type Service = HeaderService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HeaderService {
            inner,
            headers: self.headers.clone(),
        }
    }
}

/// Service that appends the configured headers to requests
#[derive(Clone, Debug)]
pub struct HeaderService<S> {
    inner: S,
    headers: HeaderMap,
}

impl<S, ReqBody> Service<Request<ReqBody>> for HeaderService<S>
where
    S: Service<Request<ReqBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let headers = req.headers_mut();
        for (name, value) in &self.headers {
            headers.append(name.clone(), value.clone());
        }
        self.inner.call(req)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{HeaderValue, Method, Response, StatusCode};
    use http_body_util::Full;
    use tower::ServiceExt;

    /// Test service that asserts the values of the `x-key` header.
    #[derive(Clone)]
    struct CheckHeaderService {
        expected: Vec<&'static str>,
    }

    impl Service<Request<Full<Bytes>>> for CheckHeaderService {
        type Response = Response<Full<Bytes>>;
        type Error = Box<dyn std::error::Error + Send + Sync>;
        type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
            let values: Vec<_> = req
                .headers()
                .get_all("x-key")
                .iter()
                .map(|v| v.to_str().unwrap())
                .collect();
            assert_eq!(values, self.expected);
            std::future::ready(Ok(Response::builder()
                .status(StatusCode::OK)
                .body(Full::new(Bytes::new()))
                .unwrap()))
        }
    }

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.append("x-key", HeaderValue::from_static("hello"));
        headers.append("x-key", HeaderValue::from_static("world"));
        headers
    }

    #[tokio::test]
    async fn test_headers_added() {
        let check = CheckHeaderService {
            expected: vec!["hello", "world"],
        };
        let service = HeaderLayer::new(headers()).layer(check);

        let req = Request::builder()
            .method(Method::GET)
            .uri("http://example.com")
            .body(Full::new(Bytes::new()))
            .unwrap();

        service.oneshot(req).await.unwrap();
    }

    #[tokio::test]
    async fn test_existing_values_kept() {
        let check = CheckHeaderService {
            expected: vec!["mine", "hello", "world"],
        };
        let service = HeaderLayer::new(headers()).layer(check);

        let req = Request::builder()
            .method(Method::GET)
            .uri("http://example.com")
            .header("x-key", "mine")
            .body(Full::new(Bytes::new()))
            .unwrap();

        service.oneshot(req).await.unwrap();
    }
}
