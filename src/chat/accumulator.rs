//! Applies canonical events to a response object.

use futures_util::{Stream, StreamExt};

use crate::error::ChatError;
use crate::protocol::canonical::CanonicalEvent;
use crate::protocol::chat::{
    ChatConfig, ChatOutputItem, ChatResponseObject, ChatRole, OutputContent, OutputMessage,
    ResponseStatus,
};
use crate::util::next_error_item_id;

pub const RECEIVE_ERROR_NOTE: &str = "\n\n[Error occurred while receiving agent response]";

/// Whether an event changed the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The response was already terminal; nothing changed.
    IgnoredAfterTerminal,
}

/// Append `delta` to the text of output item `item_id`, creating the item on
/// its first delta.
///
/// # Errors
///
/// Returns [`ChatError::MissingField`] when `item_id` or `delta` is empty, or
/// when the existing item's first content block is not `output_text`. The
/// response is left unchanged in every error case.
pub fn apply_delta<'a>(
    response: &'a mut ChatResponseObject,
    item_id: &str,
    delta: &str,
) -> Result<&'a OutputMessage, ChatError> {
    if item_id.is_empty() {
        return Err(ChatError::MissingField(
            "no item id provided for output text delta".to_string(),
        ));
    }
    if delta.is_empty() {
        return Err(ChatError::MissingField(format!(
            "no delta content provided for item {item_id}"
        )));
    }

    let idx = match response.outputs.iter().position(|item| item.id() == item_id) {
        Some(idx) => {
            let ChatOutputItem::Message(message) = &response.outputs[idx];
            if !matches!(message.content.first(), Some(OutputContent::Text { .. })) {
                return Err(ChatError::MissingField(format!(
                    "output item {item_id} has no output_text content"
                )));
            }
            idx
        }
        None => {
            response.outputs.push(ChatOutputItem::Message(OutputMessage {
                id: item_id.to_string(),
                role: ChatRole::Assistant,
                content: vec![OutputContent::Text {
                    text: String::new(),
                }],
            }));
            response.outputs.len() - 1
        }
    };

    let ChatOutputItem::Message(message) = &mut response.outputs[idx];
    if let Some(OutputContent::Text { text }) = message.content.first_mut() {
        text.push_str(delta);
    }
    Ok(message)
}

/// Apply one canonical event.
///
/// `conversation.created` updates `config`, the session's chat config, so
/// later requests continue the vendor-side conversation.
///
/// # Errors
///
/// Propagates [`apply_delta`] failures.
pub fn apply_event(
    response: &mut ChatResponseObject,
    config: &mut ChatConfig,
    event: CanonicalEvent,
) -> Result<ApplyOutcome, ChatError> {
    if response.status.is_terminal() {
        tracing::warn!(
            response_id = %response.id,
            status = ?response.status,
            event = event.name(),
            "ignoring event for finished response"
        );
        return Ok(ApplyOutcome::IgnoredAfterTerminal);
    }

    match event {
        CanonicalEvent::ConversationCreated { conversation_id } => {
            tracing::debug!(conversation_id = %conversation_id, "conversation created");
            config.conversation_id = Some(conversation_id);
        }
        CanonicalEvent::ResponseStarted { response_id } => {
            tracing::debug!(response_id = %response_id, "response started");
            response.id = response_id;
            response.status = ResponseStatus::InProgress;
        }
        CanonicalEvent::OutputTextDelta { item_id, content } => {
            apply_delta(response, &item_id, &content)?;
        }
        CanonicalEvent::ResponseDone { usage } => {
            tracing::debug!(
                response_id = %response.id,
                total_tokens = usage.total_tokens,
                "response done"
            );
            response.status = ResponseStatus::Completed;
            response.usage = usage;
        }
        CanonicalEvent::ResponseError { code, message } => {
            tracing::error!(response_id = %response.id, code = %code, message = %message, "response error");
            apply_delta(response, &next_error_item_id(), &format!("\n\n[Error: {message}]"))?;
            response.status = ResponseStatus::Failed;
        }
    }
    Ok(ApplyOutcome::Applied)
}

/// Record a receive failure: append the generic error note and fail the
/// response. A response that is already terminal is left untouched.
///
/// Returns whether the response changed.
pub fn append_error_note(response: &mut ChatResponseObject) -> bool {
    if response.status.is_terminal() {
        return false;
    }
    let appended = apply_delta(response, &next_error_item_id(), RECEIVE_ERROR_NOTE).map(|_| ());
    if let Err(err) = appended {
        tracing::warn!(response_id = %response.id, error = %err, "failed to append error note");
    }
    response.status = ResponseStatus::Failed;
    true
}

/// Settle a response whose stream ended: anything still running becomes
/// `incomplete`.
pub fn finish_stream(response: &mut ChatResponseObject) {
    if !response.status.is_terminal() {
        tracing::warn!(response_id = %response.id, "stream ended before the response finished");
        response.status = ResponseStatus::Incomplete;
    }
}

/// Mark a response the caller gave up on.
pub fn cancel(response: &mut ChatResponseObject) {
    if !response.status.is_terminal() {
        tracing::info!(response_id = %response.id, "response cancelled");
        response.status = ResponseStatus::Cancelled;
    }
}

/// Drain a canonical stream into `response`.
///
/// # Errors
///
/// Returns the first apply failure after recording it on the response with
/// [`append_error_note`].
pub async fn accumulate<S>(
    events: S,
    response: &mut ChatResponseObject,
    config: &mut ChatConfig,
) -> Result<(), ChatError>
where
    S: Stream<Item = CanonicalEvent>,
{
    futures_util::pin_mut!(events);
    while let Some(event) = events.next().await {
        if let Err(err) = apply_event(response, config, event) {
            append_error_note(response);
            return Err(err);
        }
    }
    finish_stream(response);
    Ok(())
}
