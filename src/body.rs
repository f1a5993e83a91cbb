//! The unified response body returned by the cache service.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use http_body_util::combinators::BoxBody;

use crate::capture::CaptureBody;
use crate::entry::SegmentedBody;
use crate::layer::BoxError;

/// Response body for all paths through the cache: an empty body for 304/504
/// short-circuits, a non-destructive replay of a stored body, an untouched
/// passthrough, or a capture-wrapped upstream body.
pub struct CacheBody {
    kind: Kind,
}

enum Kind {
    Empty,
    Replay { body: SegmentedBody, index: usize },
    Passthrough(BoxBody<Bytes, BoxError>),
    Capture(CaptureBody),
}

impl CacheBody {
    pub(crate) fn empty() -> Self {
        Self { kind: Kind::Empty }
    }

    pub(crate) fn replay(body: SegmentedBody) -> Self {
        Self {
            kind: Kind::Replay { body, index: 0 },
        }
    }

    pub(crate) fn passthrough(inner: BoxBody<Bytes, BoxError>) -> Self {
        Self {
            kind: Kind::Passthrough(inner),
        }
    }

    pub(crate) fn capture(inner: CaptureBody) -> Self {
        Self {
            kind: Kind::Capture(inner),
        }
    }
}

impl Body for CacheBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match &mut this.kind {
            Kind::Empty => Poll::Ready(None),
            Kind::Replay { body, index } => match body.segment(*index) {
                Some(segment) => {
                    *index += 1;
                    Poll::Ready(Some(Ok(Frame::data(segment))))
                }
                None => Poll::Ready(None),
            },
            Kind::Passthrough(inner) => Pin::new(inner).poll_frame(cx),
            Kind::Capture(inner) => Pin::new(inner).poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.kind {
            Kind::Empty => true,
            Kind::Replay { body, index } => *index >= body.segments().len(),
            Kind::Passthrough(inner) => inner.is_end_stream(),
            Kind::Capture(inner) => inner.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.kind {
            Kind::Empty => SizeHint::with_exact(0),
            Kind::Replay { body, index } => {
                let remaining: u64 = body.segments()[*index..]
                    .iter()
                    .map(|s| s.len() as u64)
                    .sum();
                SizeHint::with_exact(remaining)
            }
            Kind::Passthrough(inner) => inner.size_hint(),
            Kind::Capture(inner) => inner.size_hint(),
        }
    }
}
