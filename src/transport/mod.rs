mod http_transport;
mod upstream;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

use crate::error::ChatError;
use crate::protocol::canonical::VendorId;
use crate::protocol::chat::{ChatRequest, ChatResponseObject};
use crate::protocol::mistral::{MistralAdapter, MistralStreamEvent};
use crate::protocol::openai::{OpenAiAdapter, OpenAiStreamEvent};
use crate::stream::adapter::{adapt, CanonicalEventStream};

pub use http_transport::HttpChatTransport;
pub use upstream::UpstreamClient;

/// Raw response body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ChatError>> + Send>>;

/// Native vendor events, already parsed from the vendor's wire format.
pub type NativeStream<E> = Pin<Box<dyn Stream<Item = Result<E, ChatError>> + Send>>;

/// What the dispatcher sent back for a chat request.
pub enum TransportResponse {
    /// Canonical wire frames, read incrementally.
    Stream(ByteStream),
    /// The finished response object.
    Whole(Box<ChatResponseObject>),
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportResponse::Stream(_) => f.write_str("TransportResponse::Stream(..)"),
            TransportResponse::Whole(response) => f
                .debug_tuple("TransportResponse::Whole")
                .field(&response.id)
                .finish(),
        }
    }
}

/// Sends a chat request to the dispatcher.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ChatError::Transport`] when the request cannot be delivered
    /// and the dispatcher's error when it rejects the request.
    async fn send(&self, request: &ChatRequest) -> Result<TransportResponse, ChatError>;
}

/// Opens authenticated native event streams against the vendors.
#[async_trait]
pub trait VendorEventSource: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ChatError::Vendor`] when the vendor rejects the request.
    async fn open_openai(
        &self,
        request: &ChatRequest,
    ) -> Result<NativeStream<OpenAiStreamEvent>, ChatError>;

    /// # Errors
    ///
    /// Returns [`ChatError::Vendor`] when the vendor rejects the request.
    async fn open_mistral(
        &self,
        request: &ChatRequest,
    ) -> Result<NativeStream<MistralStreamEvent>, ChatError>;
}

/// Open the vendor stream for `request` and wrap it with the adapter of the
/// configured vendor.
///
/// # Errors
///
/// Returns [`ChatError::InvalidRequest`] for vendors without a streaming
/// adapter, otherwise whatever opening the vendor stream fails with.
pub async fn open_canonical_stream(
    source: &dyn VendorEventSource,
    request: &ChatRequest,
) -> Result<CanonicalEventStream, ChatError> {
    match request.config.vendor_id {
        VendorId::OpenAi => {
            let native = source.open_openai(request).await?;
            Ok(Box::pin(adapt(native, OpenAiAdapter::new())))
        }
        VendorId::Mistral => {
            let native = source.open_mistral(request).await?;
            let adapter =
                MistralAdapter::new(request.config.conversation_id.clone(), request.store);
            Ok(Box::pin(adapt(native, adapter)))
        }
        VendorId::Ollama => Err(ChatError::InvalidRequest(format!(
            "vendor {} does not support chat streaming",
            VendorId::Ollama
        ))),
    }
}

const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const ERROR_BODY_LOG_LIMIT: usize = 512;

fn build_reqwest_client(timeout: Duration) -> Result<reqwest::Client, ChatError> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(5))
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()
        .map_err(|err| ChatError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// Byte stream of a response body.
fn body_stream(response: reqwest::Response) -> ByteStream {
    use futures_util::TryStreamExt;
    Box::pin(
        response
            .bytes_stream()
            .map_err(|err| ChatError::Transport(format!("response body read failed: {err}"))),
    )
}

/// Build a [`ChatError::Vendor`] from a non-success response body.
///
/// Understands `{"error": {"code", "type", "message"}}`,
/// `{"error": "..."}` and flat `{"code", "message"}` / `{"detail"}` bodies.
/// The HTTP status is the code when the body names none.
pub(crate) fn error_from_body(status: http::StatusCode, body: &[u8]) -> ChatError {
    let parsed: Option<serde_json::Value> = serde_json::from_slice(body).ok();
    let (code, message) = match parsed.as_ref() {
        Some(value) => match value.get("error") {
            Some(serde_json::Value::Object(error)) => (
                error
                    .get("code")
                    .and_then(scalar_text)
                    .or_else(|| error.get("type").and_then(scalar_text)),
                error.get("message").and_then(scalar_text),
            ),
            Some(serde_json::Value::String(message)) => (None, Some(message.clone())),
            _ => (
                value.get("code").and_then(scalar_text),
                value
                    .get("message")
                    .and_then(scalar_text)
                    .or_else(|| value.get("detail").map(detail_text)),
            ),
        },
        None => (None, None),
    };

    let message = message.unwrap_or_else(|| {
        let text = String::from_utf8_lossy(body);
        let text = text.trim();
        if text.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            text.chars().take(ERROR_BODY_LOG_LIMIT).collect()
        }
    });
    ChatError::Vendor {
        code: code.unwrap_or_else(|| status.as_u16().to_string()),
        message,
    }
}

fn scalar_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(text) if !text.is_empty() => Some(text.clone()),
        serde_json::Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn detail_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
