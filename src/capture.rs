//! Response-capture stream: a write-through mirror of the upstream body.
//!
//! [`CaptureStream`] accumulates bytes in fixed-size segments up to a
//! configured cap; crossing the cap silently disables buffering so the
//! response keeps streaming while nothing is stored. [`CaptureBody`] is the
//! `http_body::Body` adapter that forwards every frame downstream, mirrors
//! data frames into the stream, and commits the captured body to storage
//! when the upstream body ends.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use http_body::{Body, Frame, SizeHint};
use http_body_util::combinators::BoxBody;

use crate::entry::SegmentedBody;
use crate::events::Diagnostic;
use crate::layer::BoxError;

pub(crate) const SEGMENT_SIZE: usize = 4 * 1024;

/// Segmented mirror buffer with a hard size cap.
#[derive(Debug)]
pub struct CaptureStream {
    segments: Vec<Bytes>,
    current: BytesMut,
    length: u64,
    buffering_enabled: bool,
    maximum_body_size: u64,
}

impl CaptureStream {
    pub fn new(maximum_body_size: u64) -> Self {
        Self {
            segments: Vec::new(),
            current: BytesMut::with_capacity(SEGMENT_SIZE),
            length: 0,
            buffering_enabled: true,
            maximum_body_size,
        }
    }

    /// Mirrors `chunk` into the buffer.
    ///
    /// A chunk that would push the total past the configured cap disables
    /// buffering and abandons everything accumulated so far; the caller's
    /// downstream write is unaffected.
    pub fn write(&mut self, chunk: &[u8]) {
        if !self.buffering_enabled {
            return;
        }
        if self.length.saturating_add(chunk.len() as u64) > self.maximum_body_size {
            self.disable_buffering();
            return;
        }

        let mut rest = chunk;
        while !rest.is_empty() {
            let room = SEGMENT_SIZE - self.current.len();
            let take = room.min(rest.len());
            self.current.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.current.len() == SEGMENT_SIZE {
                self.segments.push(self.current.split().freeze());
            }
        }
        self.length += chunk.len() as u64;
    }

    /// Abandons any buffered content; subsequent writes are ignored.
    pub fn disable_buffering(&mut self) {
        self.buffering_enabled = false;
        self.segments.clear();
        self.current.clear();
        self.length = 0;
    }

    /// Bytes buffered so far.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn buffering_enabled(&self) -> bool {
        self.buffering_enabled
    }

    /// Completed segments; a partial trailing segment is flushed by
    /// [`CaptureStream::finish`].
    pub fn segments(&self) -> &[Bytes] {
        &self.segments
    }

    /// Drains the buffer into a replayable [`SegmentedBody`].
    pub fn finish(&mut self) -> SegmentedBody {
        if !self.current.is_empty() {
            let segment = self.current.split().freeze();
            self.segments.push(segment);
        }
        SegmentedBody::from_parts(std::mem::take(&mut self.segments), self.length)
    }
}

type CommitFn = Box<dyn FnOnce(SegmentedBody) + Send>;

/// Write-through body adapter wrapping the upstream response body.
///
/// Every frame is yielded downstream; data frames are mirrored into the
/// capture stream first. An upstream error propagates unchanged and aborts
/// buffering. At end-of-stream the captured body is validated against the
/// declared `Content-Length` and handed to the commit callback. Dropping the
/// body early (client cancellation) commits nothing.
pub struct CaptureBody {
    inner: BoxBody<Bytes, BoxError>,
    capture: CaptureStream,
    content_length: Option<u64>,
    commit: Option<CommitFn>,
}

impl CaptureBody {
    pub(crate) fn new(
        inner: BoxBody<Bytes, BoxError>,
        maximum_body_size: u64,
        content_length: Option<u64>,
        commit: CommitFn,
    ) -> Self {
        Self {
            inner,
            capture: CaptureStream::new(maximum_body_size),
            content_length,
            commit: Some(commit),
        }
    }

    fn finalize(&mut self) {
        let Some(commit) = self.commit.take() else {
            return;
        };
        if !self.capture.buffering_enabled() {
            Diagnostic::ResponseNotCached.emit();
            return;
        }
        if let Some(declared) = self.content_length {
            if declared != self.capture.len() {
                Diagnostic::ResponseContentLengthMismatchNotCached.emit();
                return;
            }
        }
        commit(self.capture.finish());
    }
}

impl Body for CaptureBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.capture.write(data);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.commit = None;
                this.capture.disable_buffering();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.finalize();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        // Finalization happens on the end-of-stream poll; keep consumers
        // polling until the commit decision has been made.
        self.commit.is_none() && self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
