/// Error type shared by the wire codec, adapters, accumulator and transports.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
    #[error("Missing field: {0}")]
    MissingField(String),
    #[error("Vendor error: code={code}, message={message}")]
    Vendor { code: String, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Protocol,
    RateLimit,
    Upstream,
    ServerError,
}

impl ChatError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            ChatError::InvalidRequest(_) | ChatError::MissingField(_) => {
                ErrorCategory::InvalidRequest
            }
            ChatError::MalformedFrame(_) | ChatError::UnknownEventType(_) => {
                ErrorCategory::Protocol
            }
            ChatError::Vendor { code, .. } if is_rate_limit_code(code) => ErrorCategory::RateLimit,
            ChatError::Vendor { .. } | ChatError::Transport(_) => ErrorCategory::Upstream,
            ChatError::Config(_) | ChatError::Internal(_) => ErrorCategory::ServerError,
        }
    }

    /// Stable machine-readable code, also used as the `response.error` code
    /// when an error is surfaced through the stream.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            ChatError::MalformedFrame(_) => "malformed_frame",
            ChatError::UnknownEventType(_) => "unknown_event_type",
            ChatError::MissingField(_) => "missing_field",
            ChatError::Vendor { code, .. } => code,
            ChatError::Transport(_) => "transport_error",
            ChatError::Config(_) => "config_error",
            ChatError::InvalidRequest(_) => "invalid_request",
            ChatError::Internal(_) => "internal_error",
        }
    }
}

fn is_rate_limit_code(code: &str) -> bool {
    matches!(code, "rate_limit" | "rate_limit_exceeded" | "429")
}

fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::RateLimit => http::StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::Protocol | ErrorCategory::Upstream => http::StatusCode::BAD_GATEWAY,
        ErrorCategory::ServerError => http::StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_type(cat: ErrorCategory) -> &'static str {
    match cat {
        ErrorCategory::InvalidRequest => "invalid_request_error",
        ErrorCategory::Protocol => "protocol_error",
        ErrorCategory::RateLimit => "rate_limit_error",
        ErrorCategory::Upstream => "upstream_error",
        ErrorCategory::ServerError => "server_error",
    }
}

/// Format an error as `(status_code, JSON body)`.
#[must_use]
pub fn format_error(err: &ChatError) -> (http::StatusCode, serde_json::Value) {
    let cat = err.category();
    let body = serde_json::json!({
        "error": {
            "type": error_type(cat),
            "code": err.code(),
            "message": err.to_string(),
        }
    });
    (http_status_for_category(cat), body)
}

impl axum::response::IntoResponse for ChatError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = format_error(&self);
        (status, axum::Json(body)).into_response()
    }
}
