use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use futures_util::StreamExt;
use mugin_rs::chat::{Chat, ChatSession, ResponseView, RECEIVE_ERROR_NOTE};
use mugin_rs::error::ChatError;
use mugin_rs::protocol::app::AppInfo;
use mugin_rs::protocol::canonical::{CanonicalEvent, ResponseUsage, VendorId};
use mugin_rs::protocol::chat::{
    ChatConfig, ChatItem, ChatOutputItem, ChatRequest, ChatResponseObject, ChatRole,
    OutputContent, OutputMessage, Principal, ResponseStatus,
};
use mugin_rs::stream::encode_event;
use mugin_rs::transport::{ChatTransport, TransportResponse};

enum Scripted {
    Chunks(Vec<Result<Bytes, ChatError>>),
    /// Chunks followed by a stream that never yields again.
    Stalled(Vec<Bytes>),
    Whole(ChatResponseObject),
    Fail(ChatError),
}

#[derive(Default)]
struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    sent: Mutex<Vec<ChatRequest>>,
}

impl ScriptedTransport {
    fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn sent(&self) -> Vec<ChatRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn send(&self, request: &ChatRequest) -> Result<TransportResponse, ChatError> {
        self.sent.lock().unwrap().push(request.clone());
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected request");
        match next {
            Scripted::Chunks(chunks) => Ok(TransportResponse::Stream(Box::pin(stream::iter(chunks)))),
            Scripted::Stalled(chunks) => Ok(TransportResponse::Stream(Box::pin(
                stream::iter(chunks.into_iter().map(Ok::<Bytes, ChatError>))
                    .chain(stream::pending()),
            ))),
            Scripted::Whole(response) => Ok(TransportResponse::Whole(Box::new(response))),
            Scripted::Fail(err) => Err(err),
        }
    }
}

fn wire(events: &[CanonicalEvent]) -> String {
    events
        .iter()
        .map(|event| encode_event(event).unwrap())
        .collect()
}

/// Cut `text` into `size`-byte chunks, ignoring char boundaries.
fn chunked(text: &str, size: usize) -> Vec<Result<Bytes, ChatError>> {
    text.as_bytes()
        .chunks(size)
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect()
}

fn started(id: &str) -> CanonicalEvent {
    CanonicalEvent::ResponseStarted {
        response_id: id.to_string(),
    }
}

fn delta(item_id: &str, content: &str) -> CanonicalEvent {
    CanonicalEvent::OutputTextDelta {
        item_id: item_id.to_string(),
        content: content.to_string(),
    }
}

fn done(total: u64) -> CanonicalEvent {
    CanonicalEvent::ResponseDone {
        usage: ResponseUsage {
            input_tokens: 1,
            output_tokens: total - 1,
            total_tokens: total,
        },
    }
}

fn session(config: ChatConfig, script: Vec<Scripted>) -> ChatSession<ScriptedTransport> {
    let chat = Chat::new(config, Principal::default()).unwrap();
    ChatSession::new(ScriptedTransport::new(script), chat, AppInfo::default()).unwrap()
}

fn openai_session(script: Vec<Scripted>) -> ChatSession<ScriptedTransport> {
    session(ChatConfig::for_model(VendorId::OpenAi, "gpt-4o"), script)
}

fn item_text(view: &ResponseView, item_id: &str) -> String {
    view.read()
        .output_message(item_id)
        .map(OutputMessage::text)
        .unwrap_or_default()
}

fn last_item_text(view: &ResponseView) -> String {
    let response = view.read();
    let text = response
        .outputs
        .last()
        .and_then(|item| response.output_message(item.id()))
        .map(OutputMessage::text)
        .unwrap_or_default();
    text
}

#[tokio::test]
async fn test_streamed_turn_in_odd_chunks_completes() {
    let body = wire(&[started("resp_1"), delta("msg_1", "Hei på "), delta("msg_1", "deg"), done(5)]);
    let mut session = openai_session(vec![Scripted::Chunks(chunked(&body, 5))]);

    let view = session.prompt("Hallo").await.unwrap();

    assert_eq!(view.id(), "resp_1");
    assert_eq!(view.status(), ResponseStatus::Completed);
    assert_eq!(item_text(&view, "msg_1"), "Hei på deg");
    assert_eq!(view.read().usage.total_tokens, 5);
    assert_eq!(session.chat().len(), 2);
}

#[tokio::test]
async fn test_second_turn_sends_flattened_history() {
    let first = wire(&[started("resp_1"), delta("msg_1", "Hi!"), done(2)]);
    let second = wire(&[started("resp_2"), delta("msg_2", "Again!"), done(2)]);
    let mut session = openai_session(vec![
        Scripted::Chunks(chunked(&first, 64)),
        Scripted::Chunks(chunked(&second, 64)),
    ]);

    session.prompt("Hello").await.unwrap();
    session.prompt("Once more").await.unwrap();

    let sent = session.transport().sent();
    assert_eq!(sent.len(), 2);
    let inputs = &sent[1].inputs;
    assert_eq!(inputs.len(), 3);
    assert!(matches!(&inputs[0], ChatItem::Input(_)));
    assert!(matches!(&inputs[1], ChatItem::Output(item) if item.id() == "msg_1"));
    assert!(matches!(&inputs[2], ChatItem::Input(_)));
    assert_eq!(sent[1].config.name, "gpt-4o");
    assert_eq!(session.chat().len(), 4);
}

#[tokio::test]
async fn test_malformed_frame_keeps_earlier_events_and_fails() {
    let mut body = wire(&[started("resp_1"), delta("msg_1", "partial")]);
    body.push_str("event: response.output_text.delta\ndata: {broken\n\n");
    let mut session = openai_session(vec![Scripted::Chunks(chunked(&body, 1024))]);

    let err = session.prompt("Hello").await.unwrap_err();
    assert!(matches!(err, ChatError::MalformedFrame(_)));

    let view = session.chat().last_response().unwrap();
    assert_eq!(view.status(), ResponseStatus::Failed);
    assert_eq!(item_text(&view, "msg_1"), "partial");
    assert_eq!(last_item_text(&view), RECEIVE_ERROR_NOTE);
}

#[tokio::test]
async fn test_unknown_event_type_fails_turn() {
    let body = format!(
        "{}event: response.reasoning.delta\ndata: {{}}\n\n",
        wire(&[started("resp_1")])
    );
    let mut session = openai_session(vec![Scripted::Chunks(chunked(&body, 1024))]);

    let err = session.prompt("Hello").await.unwrap_err();
    assert!(matches!(err, ChatError::UnknownEventType(_)));
    assert_eq!(
        session.chat().last_response().unwrap().status(),
        ResponseStatus::Failed
    );
}

#[tokio::test]
async fn test_transport_error_mid_stream_fails_turn() {
    let mut chunks = chunked(&wire(&[started("resp_1"), delta("msg_1", "so far")]), 1024);
    chunks.push(Err(ChatError::Transport("connection reset".to_string())));
    let mut session = openai_session(vec![Scripted::Chunks(chunks)]);

    let err = session.prompt("Hello").await.unwrap_err();
    assert!(matches!(err, ChatError::Transport(_)));

    let view = session.chat().last_response().unwrap();
    assert_eq!(view.status(), ResponseStatus::Failed);
    assert_eq!(item_text(&view, "msg_1"), "so far");
}

#[tokio::test]
async fn test_stream_ending_inside_a_frame_is_malformed() {
    let body = wire(&[started("resp_1"), done(2)]);
    let cut = &body[..body.len() - 3];
    let mut session = openai_session(vec![Scripted::Chunks(chunked(cut, 1024))]);

    let err = session.prompt("Hello").await.unwrap_err();
    assert!(matches!(err, ChatError::MalformedFrame(_)));
    assert_eq!(
        session.chat().last_response().unwrap().status(),
        ResponseStatus::Failed
    );
}

#[tokio::test]
async fn test_stream_without_terminal_event_is_incomplete() {
    let body = wire(&[started("resp_1"), delta("msg_1", "cut off")]);
    let mut session = openai_session(vec![Scripted::Chunks(chunked(&body, 1024))]);

    let view = session.prompt("Hello").await.unwrap();
    assert_eq!(view.status(), ResponseStatus::Incomplete);
    assert_eq!(item_text(&view, "msg_1"), "cut off");
}

#[tokio::test]
async fn test_events_after_error_event_are_ignored() {
    let body = wire(&[
        started("resp_1"),
        CanonicalEvent::ResponseError {
            code: "rate_limit".to_string(),
            message: "slow down".to_string(),
        },
        delta("msg_1", "late"),
        done(3),
    ]);
    let mut session = openai_session(vec![Scripted::Chunks(chunked(&body, 1024))]);

    let view = session.prompt("Hello").await.unwrap();
    let response = view.snapshot();
    assert_eq!(response.status, ResponseStatus::Failed);
    assert_eq!(response.outputs.len(), 1);
    assert_eq!(response.usage, ResponseUsage::default());
    assert_eq!(last_item_text(&view), "\n\n[Error: slow down]");
}

#[tokio::test]
async fn test_whole_response_overwrites_placeholder() {
    let mut config = ChatConfig::for_model(VendorId::Mistral, "mistral-large-latest");
    let mut whole = ChatResponseObject::new("resp_whole", config.clone(), "2025-01-01T00:00:00.000Z");
    whole.status = ResponseStatus::Completed;
    whole.outputs.push(ChatOutputItem::Message(OutputMessage {
        id: "msg_1".to_string(),
        role: ChatRole::Assistant,
        content: vec![OutputContent::Text {
            text: "Bonjour".to_string(),
        }],
    }));
    whole.config.conversation_id = Some("conv_1".to_string());
    config.conversation_id = None;

    let mut session = session(config, vec![Scripted::Whole(whole.clone())]);
    session.set_stream(false);
    session.set_store(true);

    let view = session.prompt("Salut").await.unwrap();
    assert_eq!(view.snapshot(), whole);
    assert_eq!(session.chat().config.conversation_id.as_deref(), Some("conv_1"));

    let sent = session.transport().sent();
    assert!(!sent[0].stream);
    assert!(sent[0].store);
}

#[tokio::test]
async fn test_send_failure_marks_placeholder_failed() {
    let mut session = openai_session(vec![Scripted::Fail(ChatError::Vendor {
        code: "invalid_request".to_string(),
        message: "model gpt-4o is not available".to_string(),
    })]);

    let err = session.prompt("Hello").await.unwrap_err();
    assert_eq!(err.code(), "invalid_request");

    let view = session.chat().last_response().unwrap();
    assert_eq!(view.status(), ResponseStatus::Failed);
    assert_eq!(last_item_text(&view), RECEIVE_ERROR_NOTE);
    // the user's input stays in the transcript
    assert_eq!(session.chat().len(), 2);
}

#[tokio::test]
async fn test_conversation_created_carries_into_next_request() {
    let first = wire(&[
        CanonicalEvent::ConversationCreated {
            conversation_id: "conv_9".to_string(),
        },
        started("conv_9"),
        delta("msg_1", "Oui"),
        done(2),
    ]);
    let second = wire(&[started("conv_9"), delta("msg_2", "Encore"), done(2)]);
    let mut session = session(
        ChatConfig::for_model(VendorId::Mistral, "mistral-large-latest"),
        vec![
            Scripted::Chunks(chunked(&first, 16)),
            Scripted::Chunks(chunked(&second, 16)),
        ],
    );

    session.prompt("Bonjour").await.unwrap();
    assert_eq!(session.chat().config.conversation_id.as_deref(), Some("conv_9"));

    session.prompt("Encore").await.unwrap();
    let sent = session.transport().sent();
    assert_eq!(sent[0].config.conversation_id, None);
    assert_eq!(sent[1].config.conversation_id.as_deref(), Some("conv_9"));
}

#[tokio::test]
async fn test_cancel_keeps_partial_text() {
    let body = wire(&[started("resp_1"), delta("msg_1", "Once upon")]);
    let mut session = openai_session(vec![Scripted::Stalled(vec![Bytes::from(body)])]);

    let view = session
        .prompt_with_cancel(
            "Tell me a story",
            tokio::time::sleep(std::time::Duration::from_millis(50)),
        )
        .await
        .unwrap();

    assert_eq!(view.status(), ResponseStatus::Cancelled);
    assert_eq!(item_text(&view, "msg_1"), "Once upon");
}

#[tokio::test]
async fn test_response_hook_sees_placeholder_first() {
    let body = wire(&[started("resp_1"), done(2)]);
    let seen: Arc<Mutex<Vec<ResponseView>>> = Arc::default();
    let hook_seen = Arc::clone(&seen);
    let mut session = openai_session(vec![Scripted::Chunks(chunked(&body, 1024))])
        .with_response_hook(move |view| {
            assert_eq!(view.status(), ResponseStatus::Queued);
            assert!(view.id().starts_with("temp_id_"));
            hook_seen.lock().unwrap().push(view);
        });

    session.prompt("Hello").await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    // the hook's view follows the live response
    assert_eq!(seen[0].id(), "resp_1");
    assert_eq!(seen[0].status(), ResponseStatus::Completed);
}

#[tokio::test]
async fn test_new_chat_clears_transcript() {
    let body = wire(&[started("resp_1"), done(2)]);
    let mut session = openai_session(vec![Scripted::Chunks(chunked(&body, 1024))]);
    session.prompt("Hello").await.unwrap();
    assert!(!session.chat().is_empty());

    session.new_chat();
    assert!(session.chat().is_empty());
    assert_eq!(session.chat().config.model.as_deref(), Some("gpt-4o"));
}
