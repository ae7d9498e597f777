use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use tracing::{debug, warn};

use crate::chat::accumulate;
use crate::error::ChatError;
use crate::observability::log_response_usage;
use crate::protocol::chat::{ChatRequest, ChatResponseObject};
use crate::state::AppState;
use crate::stream::encode_event_stream;
use crate::transport::open_canonical_stream;
use crate::util::{now_rfc3339, temp_response_id};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// `POST /api/chat`: run one chat turn against the configured vendor.
pub async fn handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request_id = state.next_request_id();
    let mut response = match handle(&state, &body).await {
        Ok(response) => response,
        Err(err) => {
            warn!(%request_id, error = %err, "chat request failed");
            err.into_response()
        }
    };
    if let Ok(value) = http::HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn handle(state: &AppState, body: &[u8]) -> Result<Response, ChatError> {
    let request: ChatRequest = serde_json::from_slice(body)
        .map_err(|err| ChatError::InvalidRequest(format!("invalid chat request body: {err}")))?;
    state.validate_chat_request(&request)?;
    debug!(
        vendor = %request.config.vendor_id,
        model = request.config.model_name().unwrap_or("-"),
        inputs = request.inputs.len(),
        stream = request.stream,
        "chat request"
    );

    let started = Instant::now();
    let events = open_canonical_stream(state.upstream(), &request).await?;
    if request.stream {
        return Ok(sse_ok_response(Body::from_stream(encode_event_stream(
            events,
        ))));
    }

    let mut config = request.config.clone();
    let mut response =
        ChatResponseObject::new(temp_response_id(), request.config, now_rfc3339());
    accumulate(events, &mut response, &mut config).await?;
    // the caller learns a new vendor conversation through the response config
    response.config.conversation_id = config.conversation_id;
    log_response_usage(&response, started.elapsed());
    Ok(Json(response).into_response())
}

fn sse_ok_response(body: Body) -> Response {
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}
