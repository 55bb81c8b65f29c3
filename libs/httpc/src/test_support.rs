use crate::error::BoxError;
use crate::transport::ResponseBody;
use bytes::Bytes;
use http_body::Frame;
use http_body_util::BodyExt;
use std::pin::Pin;
use std::task::{Context, Poll};

/// What a [`TruncatedBody`] does after its first frame
#[derive(Clone, Copy)]
enum Tail {
    Fail,
    Stall,
}

/// Yields one `part` data frame, then fails or never completes
struct TruncatedBody {
    sent: bool,
    tail: Tail,
}

impl http_body::Body for TruncatedBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Self::Error>>> {
        if !self.sent {
            self.sent = true;
            return Poll::Ready(Some(Ok(Frame::data(Bytes::from_static(b"part")))));
        }
        match self.tail {
            Tail::Fail => Poll::Ready(Some(Err("connection reset".into()))),
            Tail::Stall => Poll::Pending,
        }
    }
}

/// Body failing with "connection reset" after sending `part`
pub fn failing_body() -> ResponseBody {
    TruncatedBody {
        sent: false,
        tail: Tail::Fail,
    }
    .boxed()
}

/// Body sending `part` and then nothing, forever
pub fn stalling_body() -> ResponseBody {
    TruncatedBody {
        sent: false,
        tail: Tail::Stall,
    }
    .boxed()
}
