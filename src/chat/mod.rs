//! Client side of a chat: transcript, response accumulation and the
//! session that drives a turn.

pub mod accumulator;
mod cell;
mod session;
mod transcript;

pub use accumulator::{accumulate, apply_delta, apply_event, ApplyOutcome, RECEIVE_ERROR_NOTE};
pub use cell::{ResponseCell, ResponseView};
pub use session::{Attachment, ChatSession};
pub use transcript::{Chat, ChatSnapshot, TranscriptEntry};
