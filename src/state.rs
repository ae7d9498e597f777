mod request_id;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::ChatError;
use crate::protocol::app::AppInfo;
use crate::protocol::chat::ChatRequest;
use crate::transport::VendorEventSource;

use request_id::RequestIdGenerator;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    app_info: AppInfo,
    upstream: Arc<dyn VendorEventSource>,
    request_ids: RequestIdGenerator,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, upstream: Arc<dyn VendorEventSource>) -> Self {
        let app_info = config.app_info();
        Self {
            config,
            app_info,
            upstream,
            request_ids: RequestIdGenerator::new(),
        }
    }

    /// The catalogue served at `GET /api/vendors`.
    #[must_use]
    pub fn app_info(&self) -> &AppInfo {
        &self.app_info
    }

    #[must_use]
    pub fn upstream(&self) -> &dyn VendorEventSource {
        self.upstream.as_ref()
    }

    pub fn next_request_id(&self) -> uuid::Uuid {
        self.request_ids.next_id()
    }

    /// Check a chat request against the vendor configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidRequest`] when the vendor is disabled,
    /// the project has no key, the config names neither a known model nor an
    /// agent, or there is nothing to send.
    pub fn validate_chat_request(&self, request: &ChatRequest) -> Result<(), ChatError> {
        let config = &request.config;
        let vendor_id = config.vendor_id;
        let vendor = self.config.vendors.get(vendor_id);
        if !vendor.enabled() {
            return Err(ChatError::InvalidRequest(format!(
                "vendor {vendor_id} is not enabled"
            )));
        }
        if vendor.api_key(&config.project).is_none() {
            return Err(ChatError::InvalidRequest(format!(
                "project {} is not configured for vendor {vendor_id}",
                config.project
            )));
        }
        config.ensure_chattable()?;
        if config.vendor_agent_id().is_none() {
            if let Some(model) = config.model_name() {
                if vendor.model(model).is_none() {
                    return Err(ChatError::InvalidRequest(format!(
                        "model {model} is not available for vendor {vendor_id}"
                    )));
                }
            }
        }
        if request.inputs.is_empty() {
            return Err(ChatError::InvalidRequest(
                "chat request has no inputs".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::config::DEFAULT_PROJECT;
    use crate::protocol::app::ModelInfo;
    use crate::protocol::canonical::VendorId;
    use crate::protocol::chat::{
        ChatConfig, ChatInputItem, ChatItem, InputMessage, VendorAgent,
    };
    use crate::protocol::mistral::MistralStreamEvent;
    use crate::protocol::openai::OpenAiStreamEvent;
    use crate::transport::NativeStream;

    struct Unreachable;

    #[async_trait]
    impl VendorEventSource for Unreachable {
        async fn open_openai(
            &self,
            _request: &ChatRequest,
        ) -> Result<NativeStream<OpenAiStreamEvent>, ChatError> {
            Err(ChatError::Internal("unreachable".into()))
        }

        async fn open_mistral(
            &self,
            _request: &ChatRequest,
        ) -> Result<NativeStream<MistralStreamEvent>, ChatError> {
            Err(ChatError::Internal("unreachable".into()))
        }
    }

    fn state() -> AppState {
        let mut config = AppConfig::default();
        config
            .vendors
            .openai
            .projects
            .insert(DEFAULT_PROJECT.to_string(), "sk-test".to_string());
        config.vendors.openai.models.push(ModelInfo {
            id: "gpt-4o".to_string(),
            ..ModelInfo::default()
        });
        AppState::new(config, Arc::new(Unreachable))
    }

    fn request(config: ChatConfig) -> ChatRequest {
        ChatRequest {
            config,
            inputs: vec![ChatItem::Input(ChatInputItem::Message(
                InputMessage::user_text("Hi"),
            ))],
            store: false,
            stream: true,
        }
    }

    #[test]
    fn test_accepts_known_model() {
        let state = state();
        let request = request(ChatConfig::for_model(VendorId::OpenAi, "gpt-4o"));
        assert!(state.validate_chat_request(&request).is_ok());
    }

    #[test]
    fn test_rejects_disabled_vendor_and_unknown_project() {
        let state = state();
        let err = state
            .validate_chat_request(&request(ChatConfig::for_model(VendorId::Mistral, "m")))
            .unwrap_err();
        assert!(err.to_string().contains("not enabled"));

        let mut config = ChatConfig::for_model(VendorId::OpenAi, "gpt-4o");
        config.project = "OTHER".to_string();
        let err = state.validate_chat_request(&request(config)).unwrap_err();
        assert!(err.to_string().contains("OTHER"));
    }

    #[test]
    fn test_unknown_model_needs_agent() {
        let state = state();
        let mut config = ChatConfig::for_model(VendorId::OpenAi, "gpt-9");
        assert!(state.validate_chat_request(&request(config.clone())).is_err());
        config.vendor_agent = Some(VendorAgent {
            id: "ag_1".to_string(),
        });
        assert!(state.validate_chat_request(&request(config)).is_ok());
    }

    #[test]
    fn test_rejects_empty_inputs() {
        let state = state();
        let mut request = request(ChatConfig::for_model(VendorId::OpenAi, "gpt-4o"));
        request.inputs.clear();
        assert!(state.validate_chat_request(&request).is_err());
    }
}
