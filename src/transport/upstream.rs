use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use super::{
    body_stream, build_reqwest_client, error_from_body, NativeStream, VendorEventSource,
};
use crate::config::{VendorConfig, VendorsConfig};
use crate::error::ChatError;
use crate::protocol::canonical::VendorId;
use crate::protocol::chat::ChatRequest;
use crate::protocol::mistral::{build_conversation_request, mistral_event_stream, MistralStreamEvent};
use crate::protocol::openai::{build_responses_request, openai_event_stream, OpenAiStreamEvent};
use crate::stream::sse_frame_stream;

const OPENAI_RESPONSES_PATH: &str = "/responses";

/// Opens vendor event streams over HTTP with the project keys from config.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    vendors: VendorsConfig,
}

impl UpstreamClient {
    /// # Errors
    ///
    /// Returns [`ChatError::Transport`] if the HTTP client cannot be built.
    pub fn new(vendors: VendorsConfig, timeout: Duration) -> Result<Self, ChatError> {
        Ok(Self {
            client: build_reqwest_client(timeout)?,
            vendors,
        })
    }

    fn vendor(&self, vendor: VendorId) -> &VendorConfig {
        self.vendors.get(vendor)
    }

    /// POST `body` as a streaming request and return the response once the
    /// vendor accepted it.
    async fn post_stream<B: Serialize + ?Sized>(
        &self,
        vendor: VendorId,
        project: &str,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, ChatError> {
        let config = self.vendor(vendor);
        let api_key = config.api_key(project).ok_or_else(|| {
            ChatError::InvalidRequest(format!("no API key for project {project} of {vendor}"))
        })?;
        let url = format!("{}{path}", config.base_url.trim_end_matches('/'));
        debug!(%vendor, %url, project, "opening vendor stream");

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .header(http::header::ACCEPT, "text/event-stream")
            .json(body)
            .send()
            .await
            .map_err(|err| ChatError::Transport(format!("{vendor} request failed: {err}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| ChatError::Transport(format!("{vendor} error body read failed: {err}")))?;
        let err = error_from_body(status, &body);
        warn!(%vendor, status = status.as_u16(), error = %err, "vendor rejected request");
        Err(err)
    }
}

#[async_trait]
impl VendorEventSource for UpstreamClient {
    async fn open_openai(
        &self,
        request: &ChatRequest,
    ) -> Result<NativeStream<OpenAiStreamEvent>, ChatError> {
        let mut body = build_responses_request(request)?;
        body.stream = true;
        let response = self
            .post_stream(
                VendorId::OpenAi,
                &request.config.project,
                OPENAI_RESPONSES_PATH,
                &body,
            )
            .await?;
        Ok(Box::pin(openai_event_stream(sse_frame_stream(body_stream(
            response,
        )))))
    }

    async fn open_mistral(
        &self,
        request: &ChatRequest,
    ) -> Result<NativeStream<MistralStreamEvent>, ChatError> {
        let (target, mut body) = build_conversation_request(request)?;
        body.stream = true;
        let response = self
            .post_stream(
                VendorId::Mistral,
                &request.config.project,
                &target.path(),
                &body,
            )
            .await?;
        Ok(Box::pin(mistral_event_stream(sse_frame_stream(body_stream(
            response,
        )))))
    }
}
