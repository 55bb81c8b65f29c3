//! Cookie store support.
//!
//! [`CookieLayer`] attaches stored cookies to each outgoing request and hands
//! every `Set-Cookie` response header back to the store. The client places it
//! inside the redirect handling, so every hop of a redirect chain is seen.

use http::uri::Scheme;
use http::{HeaderValue, Request, Response, Uri, header};
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};
use tower::{Layer, Service};

/// Storage for cookies shared across requests.
///
/// Implementations are called concurrently and must synchronise internally.
pub trait CookieStore: Send + Sync {
    /// Store the `Set-Cookie` header values received from `uri`.
    fn set_cookies(&self, uri: &Uri, cookies: &mut dyn Iterator<Item = &HeaderValue>);

    /// `Cookie` header value to send to `uri`, if any cookie matches.
    fn cookies(&self, uri: &Uri) -> Option<HeaderValue>;
}

/// In-memory [`CookieStore`].
///
/// Understands the `Domain`, `Path`, `Secure`, `Max-Age` and `Expires`
/// attributes. A cookie set again with the same name, domain and path
/// replaces the stored one; an expiry in the past (or `Max-Age=0`) deletes
/// it. `Secure` cookies are only sent over https. Other attributes such as
/// `HttpOnly` or `SameSite` are accepted and ignored.
#[derive(Debug, Default)]
pub struct Jar {
    cookies: RwLock<Vec<StoredCookie>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredCookie {
    name: String,
    value: String,
    /// Lowercase host, or the `Domain` attribute without its leading dot
    domain: String,
    /// Only the exact host matches when no `Domain` attribute was given
    host_only: bool,
    path: String,
    secure: bool,
    expires: Option<SystemTime>,
}

impl StoredCookie {
    fn same_key(&self, other: &Self) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }

    fn is_expired(&self, now: SystemTime) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }

    fn matches_host(&self, host: &str) -> bool {
        if self.host_only {
            host == self.domain
        } else {
            domain_match(host, &self.domain)
        }
    }

    fn matches(&self, host: &str, path: &str, https: bool, now: SystemTime) -> bool {
        !self.is_expired(now)
            && (https || !self.secure)
            && self.matches_host(host)
            && path_match(path, &self.path)
    }
}

impl Jar {
    /// Create an empty jar
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of the live cookie `name` that would be sent to `host`, on any path
    #[must_use]
    pub fn get(&self, host: &str, name: &str) -> Option<String> {
        let host = host.to_ascii_lowercase();
        let now = SystemTime::now();
        self.cookies
            .read()
            .iter()
            .find(|c| c.name == name && !c.is_expired(now) && c.matches_host(&host))
            .map(|c| c.value.clone())
    }
}

/// `host` equals `domain` or is one of its subdomains
fn domain_match(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Request `path` lies at or below cookie path `prefix`
fn path_match(path: &str, prefix: &str) -> bool {
    path == prefix
        || path.strip_prefix(prefix).is_some_and(|rest| {
            prefix.ends_with('/') || rest.starts_with('/')
        })
}

/// Directory of the request path, used when `Path` is missing or invalid
fn default_path(uri: &Uri) -> String {
    match uri.path().rsplit_once('/') {
        Some((dir, _)) if !dir.is_empty() => dir.to_owned(),
        _ => "/".to_owned(),
    }
}

/// Parse one `Set-Cookie` value received from `uri`.
///
/// Returns `None` for malformed values and for a `Domain` the request host
/// does not belong to.
fn parse_set_cookie(uri: &Uri, value: &HeaderValue, now: SystemTime) -> Option<StoredCookie> {
    let host = uri.host()?.to_ascii_lowercase();
    let mut parts = value.to_str().ok()?.split(';');

    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = StoredCookie {
        name: name.to_owned(),
        value: value.trim().to_owned(),
        domain: host.clone(),
        host_only: true,
        path: default_path(uri),
        secure: false,
        expires: None,
    };
    let mut max_age = None;

    for attr in parts {
        let (key, val) = match attr.split_once('=') {
            Some((key, val)) => (key.trim(), val.trim()),
            None => (attr.trim(), ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "domain" => {
                let domain = val.trim_start_matches('.').to_ascii_lowercase();
                if !domain.is_empty() {
                    if !domain_match(&host, &domain) {
                        return None;
                    }
                    cookie.domain = domain;
                    cookie.host_only = false;
                }
            }
            "path" if val.starts_with('/') => cookie.path = val.to_owned(),
            "secure" => cookie.secure = true,
            "max-age" => max_age = val.parse::<i64>().ok().or(max_age),
            "expires" => {
                if let Ok(at) = httpdate::parse_http_date(val) {
                    cookie.expires = Some(at);
                }
            }
            _ => {}
        }
    }

    // Max-Age wins over Expires
    if let Some(seconds) = max_age {
        cookie.expires = match u64::try_from(seconds) {
            Ok(seconds) if seconds > 0 => now.checked_add(Duration::from_secs(seconds)),
            _ => Some(SystemTime::UNIX_EPOCH),
        };
    }

    Some(cookie)
}

impl CookieStore for Jar {
    fn set_cookies(&self, uri: &Uri, cookies: &mut dyn Iterator<Item = &HeaderValue>) {
        let now = SystemTime::now();
        let mut stored = self.cookies.write();
        for cookie in cookies.filter_map(|value| parse_set_cookie(uri, value, now)) {
            let existing = stored.iter().position(|c| c.same_key(&cookie));
            match existing {
                Some(index) if cookie.is_expired(now) => {
                    stored.remove(index);
                }
                Some(index) => stored[index] = cookie,
                None if cookie.is_expired(now) => {}
                None => stored.push(cookie),
            }
        }
        stored.retain(|c| !c.is_expired(now));
    }

    fn cookies(&self, uri: &Uri) -> Option<HeaderValue> {
        let host = uri.host()?.to_ascii_lowercase();
        let https = uri.scheme() == Some(&Scheme::HTTPS);
        let now = SystemTime::now();

        let stored = self.cookies.read();
        let mut matching: Vec<&StoredCookie> = stored
            .iter()
            .filter(|c| c.matches(&host, uri.path(), https, now))
            .collect();
        if matching.is_empty() {
            return None;
        }
        // Longer paths first
        matching.sort_by_key(|c| Reverse(c.path.len()));

        let joined = matching
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");
        HeaderValue::from_str(&joined).ok()
    }
}

/// Tower layer connecting requests to a [`CookieStore`]
#[derive(Clone)]
pub struct CookieLayer {
    store: Arc<dyn CookieStore>,
}

impl CookieLayer {
    /// Create a layer reading from and writing to `store`
    #[must_use]
    pub fn new(store: Arc<dyn CookieStore>) -> Self {
        Self { store }
    }
}

impl<S> Layer<S> for CookieLayer {
    type Service = CookieService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CookieService {
            inner,
            store: Arc::clone(&self.store),
        }
    }
}

/// Service that adds stored cookies and records `Set-Cookie` headers
#[derive(Clone)]
pub struct CookieService<S> {
    inner: S,
    store: Arc<dyn CookieStore>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CookieService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let uri = req.uri().clone();
        if let Some(cookies) = self.store.cookies(&uri) {
            req.headers_mut().append(header::COOKIE, cookies);
        }

        // Call the instance that was poll_ready'd, leaving a fresh clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let store = Arc::clone(&self.store);

        Box::pin(async move {
            let response = inner.call(req).await?;
            let mut set_cookies = response.headers().get_all(header::SET_COOKIE).iter();
            store.set_cookies(&uri, &mut set_cookies);
            Ok(response)
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::Full;
    use tower::{ServiceExt, service_fn};

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn test_jar_stores_and_replays() {
        let jar = Jar::new();
        let values = [
            HeaderValue::from_static("foo=bar; Path=/; HttpOnly"),
            HeaderValue::from_static("session=abc"),
        ];
        jar.set_cookies(&uri("http://example.com/login"), &mut values.iter());

        assert_eq!(jar.get("example.com", "foo").as_deref(), Some("bar"));
        assert_eq!(
            jar.cookies(&uri("http://example.com/other")),
            Some(HeaderValue::from_static("foo=bar; session=abc"))
        );
        assert!(jar.cookies(&uri("http://other.com/")).is_none());
    }

    #[test]
    fn test_jar_last_write_wins() {
        let jar = Jar::new();
        let first = [HeaderValue::from_static("foo=one")];
        let second = [HeaderValue::from_static("foo=two")];
        jar.set_cookies(&uri("http://example.com/"), &mut first.iter());
        jar.set_cookies(&uri("http://example.com/"), &mut second.iter());

        assert_eq!(jar.get("example.com", "foo").as_deref(), Some("two"));
    }

    #[test]
    fn test_parse_set_cookie_rejects_garbage() {
        let from = uri("http://example.com/");
        let now = SystemTime::now();
        for value in ["novalue", "=value", "a=b; Domain=other.com"] {
            let value = HeaderValue::from_static(value);
            assert!(parse_set_cookie(&from, &value, now).is_none(), "{value:?}");
        }
    }

    #[test]
    fn test_secure_cookie_only_sent_over_https() {
        let jar = Jar::new();
        let values = [HeaderValue::from_static("session=abc; Secure")];
        jar.set_cookies(&uri("https://example.com/"), &mut values.iter());

        assert_eq!(
            jar.cookies(&uri("https://example.com/")),
            Some(HeaderValue::from_static("session=abc"))
        );
        assert!(jar.cookies(&uri("http://example.com/")).is_none());
    }

    #[test]
    fn test_max_age_zero_deletes_cookie() {
        let jar = Jar::new();
        let set = [HeaderValue::from_static("session=abc")];
        let delete = [HeaderValue::from_static("session=; Max-Age=0")];
        jar.set_cookies(&uri("http://example.com/"), &mut set.iter());
        jar.set_cookies(&uri("http://example.com/"), &mut delete.iter());

        assert!(jar.cookies(&uri("http://example.com/")).is_none());
        assert!(jar.get("example.com", "session").is_none());
    }

    #[test]
    fn test_expires_in_past_deletes_cookie() {
        let jar = Jar::new();
        let set = [HeaderValue::from_static("session=abc; Max-Age=3600")];
        let delete = [HeaderValue::from_static(
            "session=gone; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
        )];
        jar.set_cookies(&uri("http://example.com/"), &mut set.iter());
        assert_eq!(jar.get("example.com", "session").as_deref(), Some("abc"));

        jar.set_cookies(&uri("http://example.com/"), &mut delete.iter());
        assert!(jar.cookies(&uri("http://example.com/")).is_none());
    }

    #[test]
    fn test_expires_in_future_keeps_cookie() {
        let jar = Jar::new();
        let values = [HeaderValue::from_static(
            "session=abc; Expires=Fri, 01 Jan 2100 00:00:00 GMT",
        )];
        jar.set_cookies(&uri("http://example.com/"), &mut values.iter());

        assert_eq!(
            jar.cookies(&uri("http://example.com/")),
            Some(HeaderValue::from_static("session=abc"))
        );
    }

    #[test]
    fn test_max_age_overrides_expires() {
        let jar = Jar::new();
        let values = [HeaderValue::from_static(
            "session=abc; Expires=Fri, 01 Jan 2100 00:00:00 GMT; Max-Age=0",
        )];
        jar.set_cookies(&uri("http://example.com/"), &mut values.iter());

        assert!(jar.cookies(&uri("http://example.com/")).is_none());
    }

    #[test]
    fn test_path_prefix_matching() {
        let jar = Jar::new();
        let values = [
            HeaderValue::from_static("api=1; Path=/api"),
            HeaderValue::from_static("root=2; Path=/"),
        ];
        jar.set_cookies(&uri("http://example.com/"), &mut values.iter());

        assert_eq!(
            jar.cookies(&uri("http://example.com/api/users")),
            Some(HeaderValue::from_static("api=1; root=2"))
        );
        assert_eq!(
            jar.cookies(&uri("http://example.com/api")),
            Some(HeaderValue::from_static("api=1; root=2"))
        );
        assert_eq!(
            jar.cookies(&uri("http://example.com/apiary")),
            Some(HeaderValue::from_static("root=2"))
        );
    }

    #[test]
    fn test_default_path_is_request_directory() {
        let jar = Jar::new();
        let values = [HeaderValue::from_static("token=x")];
        jar.set_cookies(&uri("http://example.com/docs/index.html"), &mut values.iter());

        assert!(jar.cookies(&uri("http://example.com/docs/page")).is_some());
        assert!(jar.cookies(&uri("http://example.com/other")).is_none());
    }

    #[test]
    fn test_domain_attribute_covers_subdomains() {
        let jar = Jar::new();
        let values = [
            HeaderValue::from_static("shared=1; Domain=.example.com"),
            HeaderValue::from_static("local=2"),
        ];
        jar.set_cookies(&uri("http://api.example.com/"), &mut values.iter());

        assert_eq!(
            jar.cookies(&uri("http://www.example.com/")),
            Some(HeaderValue::from_static("shared=1"))
        );
        assert_eq!(
            jar.cookies(&uri("http://api.example.com/")),
            Some(HeaderValue::from_static("shared=1; local=2"))
        );
        assert!(jar.cookies(&uri("http://notexample.com/")).is_none());
    }

    #[tokio::test]
    async fn test_cookie_service_roundtrip() {
        let jar = Arc::new(Jar::new());
        let inner = service_fn(|req: Request<Full<Bytes>>| async move {
            let seen = req
                .headers()
                .get(header::COOKIE)
                .map(|v| v.to_str().unwrap().to_owned());
            let response = Response::builder()
                .header(header::SET_COOKIE, "foo=bar")
                .body(seen)
                .unwrap();
            Ok::<_, std::convert::Infallible>(response)
        });
        let service = CookieLayer::new(jar.clone()).layer(inner);

        let req = || {
            Request::get("http://example.com/")
                .body(Full::new(Bytes::new()))
                .unwrap()
        };

        let first = service.clone().oneshot(req()).await.unwrap();
        assert_eq!(first.into_body(), None);

        let second = service.oneshot(req()).await.unwrap();
        assert_eq!(second.into_body().as_deref(), Some("foo=bar"));
        assert_eq!(jar.get("example.com", "foo").as_deref(), Some("bar"));
    }
}
