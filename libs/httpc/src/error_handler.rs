//! Conversion of failing responses (status >= 400) into errors.
//!
//! The handler receives the buffered body and returns the error handed back
//! from [`Client::do_req`]. Domain errors travel as [`HttpError::Remote`] and
//! are recovered with [`HttpError::remote`].

use crate::Client;
use crate::error::HttpError;
use bytes::Bytes;
use http::response::Parts;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Converts a failing response into an error
pub type ErrorHandler = Arc<dyn Fn(&Client, &Parts, &Bytes) -> HttpError + Send + Sync>;

/// Raw body of a failing response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytesErrorBody(pub Bytes);

impl fmt::Display for BytesErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http body: {}", String::from_utf8_lossy(&self.0))
    }
}

impl std::error::Error for BytesErrorBody {}

/// Body of a failing response parsed as a JSON object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonErrorBody(pub serde_json::Map<String, serde_json::Value>);

impl JsonErrorBody {
    /// Value stored under `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }
}

impl fmt::Display for JsonErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = serde_json::to_string(&self.0).unwrap_or_default();
        write!(f, "http body: {encoded}")
    }
}

impl std::error::Error for JsonErrorBody {}

/// Default handler: wraps the body in [`BytesErrorBody`]
pub fn bytes_error_handler(_client: &Client, _parts: &Parts, body: &Bytes) -> HttpError {
    HttpError::Remote(Box::new(BytesErrorBody(body.clone())))
}

/// Handler decoding the body into `E` with the client's JSON parser.
///
/// A body that does not decode yields [`HttpError::Json`] instead.
pub fn custom_json_error_handler<E>() -> ErrorHandler
where
    E: DeserializeOwned + std::error::Error + Send + Sync + 'static,
{
    Arc::new(
        |client: &Client, parts: &Parts, body: &Bytes| match client.config().decode::<E>(body) {
            Ok(remote) => HttpError::Remote(Box::new(remote)),
            Err(err) => {
                tracing::debug!(
                    status = parts.status.as_u16(),
                    error = %err,
                    "failed to decode error body"
                );
                HttpError::Json(err)
            }
        },
    )
}
