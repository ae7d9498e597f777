//! Vendor adapter contract and the adapted canonical stream.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use pin_project_lite::pin_project;
use smallvec::SmallVec;

use super::codec::encode_event_bytes;
use crate::error::ChatError;
use crate::protocol::canonical::{CanonicalEvent, VendorId};

pub const STREAM_INCOMPLETE_CODE: &str = "stream_incomplete";
/// Code and message of a vendor failure that carried neither.
pub const UNKNOWN_ERROR_CODE: &str = "unknown";
pub const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error";

/// Canonical events produced from one native vendor event.
pub type MappedEvents = SmallVec<[CanonicalEvent; 2]>;

/// Boxed canonical event stream handed to the transport layer.
pub type CanonicalEventStream = Pin<Box<dyn Stream<Item = CanonicalEvent> + Send>>;

/// Translates one vendor's native stream events into canonical events.
///
/// `map_event` must not reorder or hold back events: every native event maps
/// to zero or more canonical events emitted immediately, in order.
pub trait VendorAdapter: Send {
    type NativeEvent: Send;

    fn vendor(&self) -> VendorId;

    fn map_event(&mut self, event: Self::NativeEvent) -> MappedEvents;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdaptState {
    Streaming,
    Finished,
}

pin_project! {
    /// Lazy, single-pass canonical stream over a native vendor stream.
    ///
    /// Terminates exactly once: after the first terminal event the inner
    /// stream is no longer polled. An inner error item or an inner end
    /// without a terminal event is surfaced as a final `response.error`.
    pub struct AdaptedStream<S, A> {
        #[pin]
        inner: S,
        adapter: A,
        pending: VecDeque<CanonicalEvent>,
        state: AdaptState,
    }
}

/// Wrap a native vendor stream with its adapter.
pub fn adapt<S, A>(inner: S, adapter: A) -> AdaptedStream<S, A>
where
    A: VendorAdapter,
    S: Stream<Item = Result<A::NativeEvent, ChatError>>,
{
    AdaptedStream {
        inner,
        adapter,
        pending: VecDeque::with_capacity(2),
        state: AdaptState::Streaming,
    }
}

impl<S, A> Stream for AdaptedStream<S, A>
where
    A: VendorAdapter,
    S: Stream<Item = Result<A::NativeEvent, ChatError>>,
{
    type Item = CanonicalEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if let Some(event) = this.pending.pop_front() {
                if event.is_terminal() {
                    *this.state = AdaptState::Finished;
                    this.pending.clear();
                }
                return Poll::Ready(Some(event));
            }
            if *this.state == AdaptState::Finished {
                return Poll::Ready(None);
            }

            let vendor = this.adapter.vendor();
            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(native)) => {
                    let mapped = this.adapter.map_event(native);
                    for event in &mapped {
                        tracing::debug!(vendor = %vendor, event = event.name(), "adapted vendor event");
                    }
                    this.pending.extend(mapped);
                }
                Some(Err(err)) => {
                    tracing::error!(vendor = %vendor, error = %err, "vendor stream failed");
                    this.pending.push_back(CanonicalEvent::ResponseError {
                        code: err.code().to_string(),
                        message: err.to_string(),
                    });
                }
                None => {
                    tracing::warn!(vendor = %vendor, "vendor stream ended without a terminal event");
                    this.pending.push_back(CanonicalEvent::ResponseError {
                        code: STREAM_INCOMPLETE_CODE.to_string(),
                        message: format!("{vendor} stream ended before the response finished"),
                    });
                }
            }
        }
    }
}

/// Encode a canonical stream as wire frames for a response body.
pub fn encode_event_stream<S>(events: S) -> impl Stream<Item = Result<Bytes, ChatError>> + Send
where
    S: Stream<Item = CanonicalEvent> + Send,
{
    use futures_util::StreamExt;
    events.map(|event| encode_event_bytes(&event))
}
