pub mod adapter;
pub mod codec;
pub mod sse;

pub use adapter::{adapt, encode_event_stream, AdaptedStream, CanonicalEventStream, VendorAdapter};
pub use codec::{decode, encode_event, WireDecoder};
pub use sse::{sse_frame_stream, SseParser};

/// A parsed SSE frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}
