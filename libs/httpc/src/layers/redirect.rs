//! Redirect policy for the client.
//!
//! By default a request chain may make up to [`DEFAULT_MAX_REDIRECTS`]
//! requests; the redirect that would exceed it fails with
//! [`HttpError::TooManyRedirects`]. A custom check function replaces the
//! limit and decides for every hop.
//!
//! Sensitive headers (`Authorization`, `Cookie`, `Proxy-Authorization`) are
//! stripped once the chain leaves the original origin.
//!
//! A request carrying a [`RedirectFailure`] extension keeps the redirect
//! response when the check fails: the chain stops at that response and the
//! error is parked in the slot. Without the extension the error replaces the
//! response.

use crate::error::HttpError;
use http::{Request, StatusCode, Uri, header};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tower_http::follow_redirect::policy::{Action, Attempt, Policy};

/// Default limit on requests made within one redirect chain
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Headers that are stripped on cross-origin redirects to prevent credential leakage
const SENSITIVE_HEADERS: &[header::HeaderName] = &[
    header::AUTHORIZATION,
    header::COOKIE,
    header::PROXY_AUTHORIZATION,
];

/// A redirect about to be followed
#[derive(Debug)]
pub struct RedirectAttempt<'a> {
    /// Status of the redirect response
    pub status: StatusCode,
    /// Target of the redirect
    pub location: &'a Uri,
    /// URI of the request that received the redirect response
    pub previous: &'a Uri,
    /// Every URI requested so far, oldest first
    pub via: &'a [Uri],
}

/// Decision of a redirect check function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectAction {
    /// Follow the redirect
    Follow,
    /// Stop and return the redirect response to the caller
    Stop,
}

/// Custom redirect check. Returning an error ends the chain at the current
/// redirect response, see [`RedirectFailure`].
pub type CheckRedirect =
    Arc<dyn Fn(&RedirectAttempt<'_>) -> Result<RedirectAction, HttpError> + Send + Sync>;

/// Per-request slot receiving the error of a failed redirect check
#[derive(Debug, Clone, Default)]
pub struct RedirectFailure(Arc<Mutex<Option<HttpError>>>);

impl RedirectFailure {
    /// Error parked by the redirect policy, if the check failed
    #[must_use]
    pub fn take(&self) -> Option<HttpError> {
        self.0.lock().take()
    }

    fn set(&self, error: HttpError) {
        *self.0.lock() = Some(error);
    }
}

/// Redirect policy plugged into `tower_http`'s follow-redirect service.
///
/// A fresh clone is used for every request, so the hop history is per request.
#[derive(Clone)]
pub struct RedirectPolicy {
    max_redirects: usize,
    check: Option<CheckRedirect>,
    strip_sensitive_headers: bool,
    via: Vec<Uri>,
    cross_origin: bool,
    failure: Option<RedirectFailure>,
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self {
            max_redirects: DEFAULT_MAX_REDIRECTS,
            check: None,
            strip_sensitive_headers: true,
            via: Vec::new(),
            cross_origin: false,
            failure: None,
        }
    }
}

impl fmt::Debug for RedirectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedirectPolicy")
            .field("max_redirects", &self.max_redirects)
            .field("custom_check", &self.check.is_some())
            .field("strip_sensitive_headers", &self.strip_sensitive_headers)
            .finish_non_exhaustive()
    }
}

impl RedirectPolicy {
    /// Allow at most `max` requests per chain, failing with
    /// [`HttpError::TooManyRedirects`] beyond that
    #[must_use]
    pub fn limited(max: usize) -> Self {
        Self {
            max_redirects: max,
            ..Default::default()
        }
    }

    /// Never follow redirects; 3xx responses are returned as-is
    #[must_use]
    pub fn none() -> Self {
        Self::custom(|_| Ok(RedirectAction::Stop))
    }

    /// Decide every hop with `check` instead of the redirect limit
    #[must_use]
    pub fn custom<F>(check: F) -> Self
    where
        F: Fn(&RedirectAttempt<'_>) -> Result<RedirectAction, HttpError> + Send + Sync + 'static,
    {
        Self {
            check: Some(Arc::new(check)),
            ..Default::default()
        }
    }

    /// Keep sensitive headers on cross-origin redirects
    #[must_use]
    pub fn keep_sensitive_headers(mut self) -> Self {
        self.strip_sensitive_headers = false;
        self
    }

    /// Install a check function, keeping the other settings
    pub(crate) fn set_check(&mut self, check: CheckRedirect) {
        self.check = Some(check);
    }

    /// Same scheme, host and port
    fn is_same_origin(original: &Uri, target: &Uri) -> bool {
        let orig_scheme = original.scheme_str().unwrap_or("https");
        let target_scheme = target.scheme_str().unwrap_or("https");
        let orig_port = original
            .port_u16()
            .unwrap_or_else(|| default_port(orig_scheme));
        let target_port = target
            .port_u16()
            .unwrap_or_else(|| default_port(target_scheme));

        orig_scheme == target_scheme
            && original.host() == target.host()
            && orig_port == target_port
    }

    fn decide(&self, attempt: &RedirectAttempt<'_>) -> Result<RedirectAction, HttpError> {
        match &self.check {
            Some(check) => check(attempt),
            None if attempt.via.len() >= self.max_redirects => {
                Err(HttpError::TooManyRedirects(self.max_redirects))
            }
            None => Ok(RedirectAction::Follow),
        }
    }
}

fn default_port(scheme: &str) -> u16 {
    match scheme {
        "http" => 80,
        "https" => 443,
        _ => 0,
    }
}

impl<B: Clone> Policy<B, HttpError> for RedirectPolicy {
    fn redirect(&mut self, attempt: &Attempt<'_>) -> Result<Action, HttpError> {
        if self.via.is_empty() {
            self.via.push(attempt.previous().clone());
        }
        let target = attempt.location();

        let decision = self.decide(&RedirectAttempt {
            status: attempt.status(),
            location: target,
            previous: attempt.previous(),
            via: &self.via,
        });
        let action = match (decision, &self.failure) {
            (Ok(action), _) => action,
            (Err(error), Some(failure)) => {
                tracing::debug!(location = %target, error = %error, "redirect check failed");
                failure.set(error);
                return Ok(Action::Stop);
            }
            (Err(error), None) => return Err(error),
        };

        if action == RedirectAction::Stop {
            tracing::debug!(location = %target, "redirect not followed");
            return Ok(Action::Stop);
        }

        if !self.cross_origin && !Self::is_same_origin(&self.via[0], target) {
            tracing::debug!(original = %self.via[0], location = %target, "cross-origin redirect");
            self.cross_origin = true;
        }
        self.via.push(target.clone());
        Ok(Action::Follow)
    }

    fn on_request(&mut self, request: &mut Request<B>) {
        // Only the first request of the chain carries the caller's extensions
        if self.failure.is_none() {
            self.failure = request.extensions().get::<RedirectFailure>().cloned();
        }
        if self.cross_origin && self.strip_sensitive_headers {
            let headers = request.headers_mut();
            for name in SENSITIVE_HEADERS {
                if headers.remove(name).is_some() {
                    tracing::debug!(header = %name, "stripped sensitive header on cross-origin redirect");
                }
            }
        }
    }

    fn clone_body(&self, body: &B) -> Option<B> {
        // 307/308 redirects replay the request body
        Some(body.clone())
    }
}
