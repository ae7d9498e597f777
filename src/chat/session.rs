//! Drives one chat turn at a time: builds the request, attaches a
//! placeholder response to the transcript and fills it from the transport.

use std::future::Future;
use std::time::Instant;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{debug, error};

use super::accumulator;
use super::cell::{ResponseCell, ResponseView};
use super::transcript::{Chat, TranscriptEntry};
use crate::error::ChatError;
use crate::observability::log_response_usage;
use crate::protocol::app::{AppInfo, AttachmentKind};
use crate::protocol::canonical::CanonicalEvent;
use crate::protocol::chat::{
    ChatConfig, ChatInputItem, ChatItem, ChatRequest, ChatResponseObject, ChatRole, InputContent,
    InputMessage,
};
use crate::stream::WireDecoder;
use crate::transport::{ChatTransport, TransportResponse};
use crate::util::{now_rfc3339, temp_response_id};

/// A file the user wants to send along with a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl Attachment {
    pub fn new(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            BASE64_STANDARD.encode(&self.data)
        )
    }
}

type ResponseHook = Box<dyn Fn(ResponseView) + Send + Sync>;

/// Chat session over a [`ChatTransport`].
pub struct ChatSession<T> {
    transport: T,
    chat: Chat,
    app_info: AppInfo,
    stream: bool,
    store: bool,
    on_response: Option<ResponseHook>,
}

impl<T: ChatTransport> ChatSession<T> {
    /// Streaming is on and storing is off until changed.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidRequest`] if the chat config names neither
    /// a model nor a vendor agent.
    pub fn new(transport: T, chat: Chat, app_info: AppInfo) -> Result<Self, ChatError> {
        chat.config.ensure_chattable()?;
        Ok(Self {
            transport,
            chat,
            app_info,
            stream: true,
            store: false,
            on_response: None,
        })
    }

    /// Call `hook` with a view of every placeholder response as soon as it
    /// is attached to the transcript, before any event arrives.
    #[must_use]
    pub fn with_response_hook(mut self, hook: impl Fn(ResponseView) + Send + Sync + 'static) -> Self {
        self.on_response = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn chat(&self) -> &Chat {
        &self.chat
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn set_stream(&mut self, stream: bool) {
        self.stream = stream;
    }

    pub fn set_store(&mut self, store: bool) {
        self.store = store;
    }

    /// Replace the chat.
    ///
    /// # Errors
    ///
    /// Same as [`ChatSession::new`]; the current chat is kept on error.
    pub fn change_chat(&mut self, chat: Chat) -> Result<(), ChatError> {
        chat.config.ensure_chattable()?;
        self.chat = chat;
        Ok(())
    }

    pub fn new_chat(&mut self) {
        self.chat.new_chat();
    }

    /// Update the chat config used for the following turns.
    ///
    /// # Errors
    ///
    /// Same as [`ChatSession::new`].
    pub fn set_config(&mut self, config: ChatConfig) -> Result<(), ChatError> {
        config.ensure_chattable()?;
        self.chat.config = config;
        Ok(())
    }

    /// Turn an attachment into a message content part.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidRequest`] when the vendor or model is not
    /// in the app info, or the model does not accept the attachment's MIME
    /// type.
    pub fn attach_file(&self, attachment: &Attachment) -> Result<InputContent, ChatError> {
        let config = &self.chat.config;
        let vendor = self.app_info.vendor(config.vendor_id).ok_or_else(|| {
            ChatError::InvalidRequest(format!("Vendor not found: {}", config.vendor_id))
        })?;
        let model_id = config.model_name().unwrap_or_default();
        let model = vendor
            .models
            .iter()
            .find(|model| model.id == model_id)
            .ok_or_else(|| {
                ChatError::InvalidRequest(format!(
                    "Model not found for vendor {}: {model_id}",
                    config.vendor_id
                ))
            })?;
        let kind = model.attachment_kind(&attachment.mime_type).ok_or_else(|| {
            ChatError::InvalidRequest(format!(
                "File type {} is not supported for upload",
                attachment.mime_type
            ))
        })?;

        Ok(match kind {
            AttachmentKind::Image => InputContent::Image {
                image_url: attachment.data_url(),
            },
            AttachmentKind::File => InputContent::File {
                file_name: attachment.file_name.clone(),
                file_url: attachment.data_url(),
            },
        })
    }

    /// The request for a turn that sends `message`: the flattened transcript
    /// plus the new message.
    #[must_use]
    pub fn build_request(&self, message: &InputMessage) -> ChatRequest {
        let mut config = self.chat.config.clone();
        config.name = self.chat.config.display_name().to_string();

        let mut inputs = self.chat.flatten();
        inputs.push(ChatItem::Input(ChatInputItem::Message(message.clone())));

        ChatRequest {
            config,
            inputs,
            store: self.store,
            stream: self.stream,
        }
    }

    /// Send a text prompt and fill the response it produces.
    ///
    /// # Errors
    ///
    /// Returns the first transport, decode or apply failure. The response
    /// is marked failed with an error note before the error is returned.
    pub async fn prompt(&mut self, text: &str) -> Result<ResponseView, ChatError> {
        self.prompt_input(InputMessage::user_text(text)).await
    }

    /// Send a prompt with attachments. Files come before the text in the
    /// message.
    ///
    /// # Errors
    ///
    /// Attachment checks fail before anything is sent or added to the
    /// transcript; see [`ChatSession::attach_file`] and
    /// [`ChatSession::prompt`].
    pub async fn prompt_with_files(
        &mut self,
        text: &str,
        files: &[Attachment],
    ) -> Result<ResponseView, ChatError> {
        let mut content = Vec::with_capacity(files.len() + 1);
        for file in files {
            content.push(self.attach_file(file)?);
        }
        content.push(InputContent::Text {
            text: text.to_string(),
        });
        self.prompt_input(InputMessage {
            role: ChatRole::User,
            content,
        })
        .await
    }

    /// # Errors
    ///
    /// See [`ChatSession::prompt`].
    pub async fn prompt_input(&mut self, message: InputMessage) -> Result<ResponseView, ChatError> {
        self.run_turn(message, std::future::pending()).await
    }

    /// Like [`ChatSession::prompt`], but gives up once `cancel` completes.
    /// A cancelled response keeps what it received so far and ends as
    /// `cancelled`; the transport stream is dropped.
    ///
    /// # Errors
    ///
    /// See [`ChatSession::prompt`]. Cancellation itself is not an error.
    pub async fn prompt_with_cancel<F>(
        &mut self,
        text: &str,
        cancel: F,
    ) -> Result<ResponseView, ChatError>
    where
        F: Future<Output = ()>,
    {
        self.run_turn(InputMessage::user_text(text), cancel).await
    }

    async fn run_turn<F>(
        &mut self,
        message: InputMessage,
        cancel: F,
    ) -> Result<ResponseView, ChatError>
    where
        F: Future<Output = ()>,
    {
        let request = self.build_request(&message);
        self.chat.push_input(ChatInputItem::Message(message));
        let view = self.chat.push_response(ChatResponseObject::new(
            temp_response_id(),
            request.config.clone(),
            now_rfc3339(),
        ));
        if let Some(hook) = &self.on_response {
            hook(view.clone());
        }

        let started = Instant::now();
        let outcome = {
            let Self { transport, chat, .. } = self;
            let Some(TranscriptEntry::Response(cell)) = chat.history.last() else {
                return Err(ChatError::Internal(
                    "placeholder response missing from transcript".to_string(),
                ));
            };
            let config = &mut chat.config;
            tokio::select! {
                outcome = receive(&*transport, &request, cell, config) => outcome,
                () = cancel => {
                    accumulator::cancel(&mut cell.write());
                    Ok(())
                }
            }
        };
        self.chat.touch();

        match outcome {
            Ok(()) => {
                log_response_usage(&view.read(), started.elapsed());
                Ok(view)
            }
            Err(err) => {
                error!(response_id = %view.id(), error = %err, "chat turn failed");
                if let Some(TranscriptEntry::Response(cell)) = self.chat.history.last() {
                    accumulator::append_error_note(&mut cell.write());
                }
                Err(err)
            }
        }
    }
}

/// Send `request` and fill `cell` from what comes back.
async fn receive<T>(
    transport: &T,
    request: &ChatRequest,
    cell: &ResponseCell,
    config: &mut ChatConfig,
) -> Result<(), ChatError>
where
    T: ChatTransport + ?Sized,
{
    let mut body = match transport.send(request).await? {
        TransportResponse::Whole(whole) => {
            debug!(response_id = %whole.id, "received whole response");
            if whole.config.conversation_id.is_some() {
                config.conversation_id.clone_from(&whole.config.conversation_id);
            }
            *cell.write() = *whole;
            return Ok(());
        }
        TransportResponse::Stream(body) => body,
    };

    let mut decoder = WireDecoder::new();
    let mut events = Vec::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        let decoded = decoder.decode_bytes_into(&chunk, &mut events);
        // events decoded ahead of a bad frame still apply
        apply_events(cell, config, &mut events)?;
        decoded?;
    }
    decoder.finish()?;
    accumulator::finish_stream(&mut cell.write());
    Ok(())
}

fn apply_events(
    cell: &ResponseCell,
    config: &mut ChatConfig,
    events: &mut Vec<CanonicalEvent>,
) -> Result<(), ChatError> {
    for event in events.drain(..) {
        let mut response = cell.write();
        accumulator::apply_event(&mut response, config, event)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::protocol::app::{ModelInfo, VendorInfo};
    use crate::protocol::canonical::VendorId;
    use crate::protocol::chat::{Principal, ResponseStatus};

    struct RecordingTransport {
        sent: Mutex<Vec<ChatRequest>>,
        frames: Vec<&'static str>,
        /// Keep the body open after the frames instead of ending it.
        stall: bool,
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        async fn send(&self, request: &ChatRequest) -> Result<TransportResponse, ChatError> {
            self.sent.lock().unwrap().push(request.clone());
            let chunks: Vec<Result<Bytes, ChatError>> = self
                .frames
                .iter()
                .map(|frame| Ok(Bytes::from_static(frame.as_bytes())))
                .collect();
            let body = futures_util::stream::iter(chunks);
            if self.stall {
                return Ok(TransportResponse::Stream(Box::pin(
                    body.chain(futures_util::stream::pending()),
                )));
            }
            Ok(TransportResponse::Stream(Box::pin(body)))
        }
    }

    fn app_info() -> AppInfo {
        let mut vendors = BTreeMap::new();
        vendors.insert(
            VendorId::OpenAi,
            VendorInfo {
                name: "OpenAI".to_string(),
                enabled: true,
                projects: vec!["DEFAULT".to_string()],
                models: vec![ModelInfo {
                    id: "gpt-4o".to_string(),
                    supported_file_mime_types: vec!["application/pdf".to_string()],
                    supported_image_mime_types: vec!["image/png".to_string()],
                }],
            },
        );
        AppInfo {
            name: "Mugin".to_string(),
            body_size_limit_bytes: 1024,
            vendors,
        }
    }

    fn session(frames: Vec<&'static str>) -> ChatSession<RecordingTransport> {
        session_with(frames, false)
    }

    fn session_with(frames: Vec<&'static str>, stall: bool) -> ChatSession<RecordingTransport> {
        let chat = Chat::new(
            ChatConfig::for_model(VendorId::OpenAi, "gpt-4o"),
            Principal::default(),
        )
        .unwrap();
        ChatSession::new(
            RecordingTransport {
                sent: Mutex::new(Vec::new()),
                frames,
                stall,
            },
            chat,
            app_info(),
        )
        .unwrap()
    }

    #[test]
    fn test_attach_file_picks_kind_and_data_url() {
        let session = session(Vec::new());
        let image = session
            .attach_file(&Attachment::new("a.png", "image/png", b"png".to_vec()))
            .unwrap();
        assert_eq!(
            image,
            InputContent::Image {
                image_url: "data:image/png;base64,cG5n".to_string()
            }
        );
        let file = session
            .attach_file(&Attachment::new("a.pdf", "application/pdf", b"pdf".to_vec()))
            .unwrap();
        assert!(matches!(file, InputContent::File { file_name, .. } if file_name == "a.pdf"));
    }

    #[test]
    fn test_attach_file_rejects_unsupported_type() {
        let session = session(Vec::new());
        let err = session
            .attach_file(&Attachment::new("a.zip", "application/zip", b"zip".to_vec()))
            .unwrap_err();
        assert!(err.to_string().contains("application/zip"));
    }

    #[test]
    fn test_build_request_names_config_after_model() {
        let session = session(Vec::new());
        let request = session.build_request(&InputMessage::user_text("Hi"));
        assert_eq!(request.config.name, "gpt-4o");
        assert!(request.stream);
        assert!(!request.store);
        assert_eq!(request.inputs.len(), 1);
    }

    #[tokio::test]
    async fn test_prompt_streams_into_placeholder() {
        let mut session = session(vec![
            "event: response.started\ndata: {\"responseId\":\"resp_1\"}\n\n",
            "event: response.output_text.delta\ndata: {\"itemId\":\"msg_1\",\"content\":\"Hi\"}\n\n",
            "event: response.done\ndata: {\"usage\":{\"inputTokens\":1,\"outputTokens\":1,\"totalTokens\":2}}\n\n",
        ]);
        let view = session.prompt("Hello").await.unwrap();
        let response = view.snapshot();
        assert_eq!(response.id, "resp_1");
        assert_eq!(response.status, ResponseStatus::Completed);
        assert_eq!(session.chat().len(), 2);
        assert!(session.chat().updated_at >= session.chat().created_at);
    }

    #[tokio::test]
    async fn test_prompt_with_cancel_marks_cancelled() {
        let mut session = session_with(
            vec!["event: response.started\ndata: {\"responseId\":\"resp_1\"}\n\n"],
            true,
        );
        let view = session
            .prompt_with_cancel("Hello", tokio::time::sleep(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(view.status(), ResponseStatus::Cancelled);
        assert_eq!(view.id(), "resp_1");
        assert_eq!(session.chat().len(), 2);
    }
}
