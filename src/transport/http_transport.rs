use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{body_stream, build_reqwest_client, error_from_body, ChatTransport, TransportResponse};
use crate::error::ChatError;
use crate::protocol::app::AppInfo;
use crate::protocol::chat::{ChatRequest, ChatResponseObject};

const CHAT_PATH: &str = "/api/chat";
const VENDORS_PATH: &str = "/api/vendors";

/// [`ChatTransport`] that talks to a dispatcher over HTTP.
#[derive(Debug, Clone)]
pub struct HttpChatTransport {
    client: reqwest::Client,
    base_url: url::Url,
}

impl HttpChatTransport {
    /// Transport against the dispatcher at `base_url` (for example
    /// `http://127.0.0.1:8000`, including any base path).
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] if `base_url` is not an absolute http(s)
    /// URL, [`ChatError::Transport`] if the client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ChatError> {
        let parsed = url::Url::parse(base_url)
            .map_err(|err| ChatError::Config(format!("invalid server URL {base_url}: {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ChatError::Config(format!(
                "server URL must be http or https: {base_url}"
            )));
        }
        Ok(Self {
            client: build_reqwest_client(timeout)?,
            base_url: parsed,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.as_str().trim_end_matches('/'))
    }

    /// Fetch the dispatcher's vendor and model catalogue.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Transport`] on network failures and the
    /// dispatcher's error for non-success responses.
    pub async fn fetch_app_info(&self) -> Result<AppInfo, ChatError> {
        let response = self
            .client
            .get(self.endpoint(VENDORS_PATH))
            .send()
            .await
            .map_err(|err| ChatError::Transport(format!("GET {VENDORS_PATH} failed: {err}")))?;
        let response = ensure_success(response).await?;
        response
            .json::<AppInfo>()
            .await
            .map_err(|err| ChatError::Transport(format!("invalid app info body: {err}")))
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn send(&self, request: &ChatRequest) -> Result<TransportResponse, ChatError> {
        debug!(
            vendor = %request.config.vendor_id,
            inputs = request.inputs.len(),
            stream = request.stream,
            "sending chat request"
        );
        let response = self
            .client
            .post(self.endpoint(CHAT_PATH))
            .json(request)
            .send()
            .await
            .map_err(|err| ChatError::Transport(format!("POST {CHAT_PATH} failed: {err}")))?;
        let response = ensure_success(response).await?;

        if request.stream {
            return Ok(TransportResponse::Stream(body_stream(response)));
        }
        let whole = response
            .json::<ChatResponseObject>()
            .await
            .map_err(|err| ChatError::Transport(format!("invalid chat response body: {err}")))?;
        Ok(TransportResponse::Whole(Box::new(whole)))
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .bytes()
        .await
        .map_err(|err| ChatError::Transport(format!("error body read failed: {err}")))?;
    Err(error_from_body(status, &body))
}
