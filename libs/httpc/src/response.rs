use crate::Client;
use crate::error::HttpError;
use crate::transport::ResponseBody;
use bytes::{Bytes, BytesMut};
use http::StatusCode;
use http::response::Parts;
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

type ApplyFn<'a> =
    Box<dyn FnOnce(&Client, &Parts, &Bytes) -> Result<(), HttpError> + Send + 'a>;

/// Post-processing step run against a successful response.
///
/// Options passed to [`Client::do_req`] run in order once the body is
/// buffered; the first failure stops the rest and is returned together with
/// the response. They are skipped entirely for status >= 400.
///
/// ```ignore
/// let mut user = User::default();
/// let mut raw = Vec::new();
/// client
///     .do_req(req, [
///         ResponseOption::status_code(StatusCode::OK),
///         ResponseOption::json(&mut user),
///         ResponseOption::copy(&mut raw),
///     ])
///     .await?;
/// ```
pub struct ResponseOption<'a>(ApplyFn<'a>);

impl fmt::Debug for ResponseOption<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseOption").finish_non_exhaustive()
    }
}

impl<'a> ResponseOption<'a> {
    /// Custom step receiving the client, the response head and the body
    #[must_use]
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(&Client, &Parts, &Bytes) -> Result<(), HttpError> + Send + 'a,
    {
        Self(Box::new(f))
    }

    /// Decode the body into `target` with the client's JSON parser
    #[must_use]
    pub fn json<T>(target: &'a mut T) -> Self
    where
        T: DeserializeOwned + Send,
    {
        Self::new(move |client, _, body| {
            *target = client.config().decode(body)?;
            Ok(())
        })
    }

    /// Write the whole body to `writer`
    #[must_use]
    pub fn copy<W>(writer: &'a mut W) -> Self
    where
        W: std::io::Write + Send + ?Sized,
    {
        Self::new(move |_, _, body| {
            writer.write_all(body)?;
            Ok(())
        })
    }

    /// Fail with [`HttpError::UnexpectedStatus`] unless the status is `expected`
    #[must_use]
    pub fn status_code(expected: StatusCode) -> Self {
        Self::new(move |_, parts, _| {
            if parts.status == expected {
                Ok(())
            } else {
                Err(HttpError::UnexpectedStatus(parts.status))
            }
        })
    }

    pub(crate) fn apply(
        self,
        client: &Client,
        parts: &Parts,
        body: &Bytes,
    ) -> Result<(), HttpError> {
        (self.0)(client, parts, body)
    }
}

/// Body buffering failed; holds what was read before the failure.
pub struct PartialBody {
    pub data: Bytes,
    pub error: HttpError,
}

/// Buffer the whole body, giving up at `deadline` or once more than
/// `max_size` bytes arrived.
pub async fn collect_body(
    mut body: ResponseBody,
    deadline: Option<Instant>,
    timeout: Duration,
    max_size: Option<usize>,
) -> Result<Bytes, PartialBody> {
    let mut buf = BytesMut::new();
    loop {
        let frame = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, body.frame()).await {
                Ok(frame) => frame,
                Err(_) => {
                    return Err(PartialBody {
                        data: buf.freeze(),
                        error: HttpError::Timeout(timeout),
                    });
                }
            },
            None => body.frame().await,
        };

        match frame {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    let actual = buf.len() + data.len();
                    if let Some(limit) = max_size.filter(|limit| actual > *limit) {
                        return Err(PartialBody {
                            data: buf.freeze(),
                            error: HttpError::BodyTooLarge { limit, actual },
                        });
                    }
                    buf.extend_from_slice(data);
                }
            }
            Some(Err(e)) => {
                return Err(PartialBody {
                    data: buf.freeze(),
                    error: HttpError::Body(e),
                });
            }
            None => return Ok(buf.freeze()),
        }
    }
}

/// Copy the body into `writer` as it arrives, returning the byte count.
pub async fn copy_body<W>(mut body: ResponseBody, writer: &mut W) -> Result<u64, HttpError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut copied = 0u64;
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Body)?;
        if let Some(data) = frame.data_ref() {
            writer.write_all(data).await?;
            copied += data.len() as u64;
        }
    }
    writer.flush().await?;
    Ok(copied)
}
