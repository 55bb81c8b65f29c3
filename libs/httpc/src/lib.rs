#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Layered HTTP client
//!
//! `httpc` decorates a `tower` request sender with:
//! - An ordered middleware chain (`tower` layers or plain closures)
//! - Redirect policy, cookie store and whole-exchange timeout
//! - Pluggable conversion of error responses (status >= 400) into typed errors
//! - Response options run against the buffered body: JSON decoding, copying
//!   and status assertions
//! - Streaming of raw bodies into any `AsyncWrite`
//!
//! The default transport is a pooled hyper client with rustls, HTTP/2 via
//! ALPN and transparent gzip/br/deflate decompression. Any service with the
//! same request and response types can replace it.
//!
//! # Layer order
//!
//! Layers wrap the sender built so far, so the last registered layer sees
//! outgoing requests first:
//!
//! ```text
//! [A, B] registered  =>  request: B -> A -> transport
//!                        response: transport -> A -> B
//! ```
//!
//! # Example
//!
//! ```ignore
//! use httpc::{Client, ClientOption, ResponseOption};
//! use std::time::Duration;
//!
//! let client = Client::new([
//!     ClientOption::timeout(Duration::from_secs(10)),
//!     ClientOption::custom_json_error::<ApiError>(),
//! ])?;
//!
//! let mut user = User::default();
//! let req = http::Request::get("https://example.com/users/1").body(bytes::Bytes::new())?;
//! match client.json(req, &mut user, [ResponseOption::status_code(StatusCode::OK)]).await {
//!     Ok(_) => {}
//!     Err(err) => {
//!         if let Some(api) = err.remote::<ApiError>() {
//!             tracing::warn!(code = api.code, "request rejected");
//!         }
//!     }
//! }
//! ```

mod builder;
mod client;
mod config;
mod error;
mod error_handler;
mod layers;
mod response;
mod tls;
mod transport;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test_support;

pub use builder::ClientBuilder;
pub use client::Client;
pub use config::{ClientOption, Config, DEFAULT_TIMEOUT, JsonUnmarshaler, Layer};
pub use error::{BoxError, HttpError, RequestError};
pub use error_handler::{
    BytesErrorBody, ErrorHandler, JsonErrorBody, bytes_error_handler, custom_json_error_handler,
};
pub use layers::{
    CheckRedirect, CookieLayer, CookieService, CookieStore, DEFAULT_MAX_REDIRECTS, HeaderLayer,
    HeaderService, Jar, RedirectAction, RedirectAttempt, RedirectFailure, RedirectPolicy,
    RequestSpanLayer, RequestSpanService,
};
pub use response::ResponseOption;
pub use transport::{
    DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_IDLE_PER_HOST, RequestBody, ResponseBody, Sender,
    TlsRootConfig, TransportConfig, full_body,
};
