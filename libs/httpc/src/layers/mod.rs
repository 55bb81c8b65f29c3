//! Tower layers used to build the request sender
//!
//! ## Available Layers
//!
//! - [`HeaderLayer`] - Appends default headers to all requests
//! - [`CookieLayer`] - Connects requests to a [`CookieStore`]
//! - [`RedirectPolicy`] - Redirect decisions for `tower_http`'s follow-redirect service
//! - [`RequestSpanLayer`] - Adds a tracing span to outbound requests

mod cookie;
mod header;
mod redirect;
mod trace;

pub use cookie::{CookieLayer, CookieService, CookieStore, Jar};
pub use header::{HeaderLayer, HeaderService};
pub use redirect::{
    CheckRedirect, DEFAULT_MAX_REDIRECTS, RedirectAction, RedirectAttempt, RedirectFailure,
    RedirectPolicy,
};
pub use trace::{RequestSpanLayer, RequestSpanService};
