//! Upload Routes
//!
//! HTTP adapter for the chunked upload protocol.
//!
//! Endpoints:
//! - POST /api/v1/upload_chunk - Upload one chunk (multipart: `metadata` JSON + `file`)
//!
//! The session token travels in a cookie. It is issued on the request that
//! creates the session and cleared once the session reaches a terminal outcome.

use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, Multipart, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::state::AppState;
use crate::upload::{
    ChunkReceipt, ChunkRequest, ChunkRequestMeta, ClientFingerprint, CompletionReceipt,
    PartialFailureReceipt, UploadError, UploadOutcome,
};

/// Largest accepted request body, per chunk
pub const MAX_CHUNK_BODY: usize = 64 * 1024 * 1024;

// ============================================================================
// Error Response
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Upload request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "Upload request rejected");
        }

        let body = Json(ErrorResponse {
            error: self.public_message(),
            code: self.code(),
        });

        (status, body).into_response()
    }
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum UploadResponse {
    Accepted(ChunkReceipt),
    StageFailed {
        error: String,
        code: &'static str,
        retryable: bool,
        #[serde(flatten)]
        receipt: ChunkReceipt,
    },
    Completed(CompletionReceipt),
    PartialFailure(PartialFailureReceipt),
}

impl UploadResponse {
    fn from_outcome(outcome: UploadOutcome) -> (StatusCode, Self) {
        match outcome {
            UploadOutcome::Accepted(receipt) => (StatusCode::OK, Self::Accepted(receipt)),
            UploadOutcome::StageFailed(receipt) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Self::StageFailed {
                    error: format!("Chunk {} could not be stored", receipt.chunk_number),
                    code: "CHUNK_STAGE_FAILURE",
                    retryable: true,
                    receipt,
                },
            ),
            UploadOutcome::Completed(receipt) => (StatusCode::OK, Self::Completed(receipt)),
            UploadOutcome::PartialFailure(receipt) => {
                (StatusCode::PARTIAL_CONTENT, Self::PartialFailure(receipt))
            }
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload_chunk", post(upload_chunk))
        .layer(DefaultBodyLimit::max(MAX_CHUNK_BODY))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/upload_chunk
async fn upload_chunk(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, UploadError> {
    let cookie_name = &state.config().uploads.cookie_name;
    let session_token = session_cookie(&headers, cookie_name);
    let fingerprint = client_fingerprint(&headers, connect_info.map(|ConnectInfo(addr)| addr));
    let (meta, data) = read_chunk_form(multipart).await?;

    tracing::debug!(
        client = %fingerprint,
        chunk_index = meta.chunk_number,
        total_chunks = meta.total_chunks,
        size = data.len(),
        has_token = session_token.is_some(),
        "Received chunk"
    );

    let reply = state
        .uploads()
        .handle_chunk(ChunkRequest {
            session_token,
            fingerprint,
            meta,
            data,
        })
        .await?;

    let terminal = matches!(
        reply.outcome,
        UploadOutcome::Completed(_) | UploadOutcome::PartialFailure(_)
    );
    let (status, body) = UploadResponse::from_outcome(reply.outcome);
    let mut response = (status, Json(body)).into_response();

    let cookie = if terminal {
        Some(format!("{}=; HttpOnly; Max-Age=0; Path=/", cookie_name))
    } else if reply.new_session {
        Some(format!(
            "{}={}; HttpOnly; Max-Age={}; Path=/",
            cookie_name,
            reply.session_id,
            state.uploads().session_ttl().as_secs()
        ))
    } else {
        None
    };
    if let Some(cookie) = cookie {
        let value = HeaderValue::from_str(&cookie)
            .map_err(|e| UploadError::InternalError(format!("Invalid cookie header: {}", e)))?;
        response.headers_mut().insert(header::SET_COOKIE, value);
    }

    Ok(response)
}

// ============================================================================
// Request Parsing
// ============================================================================

/// Pull the `metadata` and `file` parts out of the form
async fn read_chunk_form(mut multipart: Multipart) -> Result<(ChunkRequestMeta, Bytes), UploadError> {
    let mut meta = None;
    let mut data = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::InvalidRequest(format!("Failed to read multipart field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "metadata" => {
                let text = field.text().await.map_err(|e| {
                    UploadError::InvalidRequest(format!("Failed to read metadata: {}", e))
                })?;
                let parsed: ChunkRequestMeta = serde_json::from_str(&text).map_err(|e| {
                    UploadError::InvalidRequest(format!("Malformed metadata: {}", e))
                })?;
                meta = Some(parsed);
            }
            "file" => {
                let bytes = field.bytes().await.map_err(|e| {
                    UploadError::InvalidRequest(format!("Failed to read chunk data: {}", e))
                })?;
                data = Some(bytes);
            }
            _ => {}
        }
    }

    let meta = meta.ok_or_else(|| UploadError::InvalidRequest("Missing metadata part".to_string()))?;
    let data = data.ok_or_else(|| UploadError::InvalidRequest("Missing file part".to_string()))?;
    Ok((meta, data))
}

/// Session token from the `Cookie` header, if any
fn session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Client address from proxy headers, then the socket peer
fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next().map(str::trim).filter(|s| !s.is_empty()) {
            return first.to_string();
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn client_fingerprint(headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientFingerprint {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    ClientFingerprint::new(client_address(headers, peer), user_agent)
}
