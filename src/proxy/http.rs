//! Conversion between hyper messages and snapshots

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::ext::ReasonPhrase;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use tracing::warn;

use crate::config::LimitsConfig;
use crate::interaction::{Headers, RequestSnapshot, ResponseSnapshot};
use crate::network::read_body;
use crate::recording::PLAYBACK_ERROR_HEADER;
use crate::{PlaybackError, Result};

/// Headers dropped when emitting a buffered response
const FRAMING_HEADERS: [&str; 3] = ["connection", "keep-alive", "transfer-encoding"];

/// Capture an inbound request
///
/// # Errors
///
/// Returns `BadRequest` if there are too many headers, `DataTooLarge` if the
/// body exceeds the request limit
pub async fn snapshot_request<B>(request: Request<B>, limits: &LimitsConfig) -> Result<RequestSnapshot>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = request.into_parts();

    if parts.headers.len() > limits.max_headers {
        return Err(PlaybackError::BadRequest(format!(
            "Too many headers: {} (limit {})",
            parts.headers.len(),
            limits.max_headers
        )));
    }

    let target = parts
        .uri
        .path_and_query()
        .map_or_else(|| "/".to_string(), |pq| pq.as_str().to_string());

    let headers: Headers = parts
        .headers
        .iter()
        .map(|(name, value)| (name.as_str(), Bytes::copy_from_slice(value.as_bytes())))
        .collect();

    let body = read_body(body, limits.max_request_size).await?;

    Ok(RequestSnapshot {
        method: parts.method.as_str().to_string(),
        target,
        headers,
        body,
    })
}

/// Build the response sent to the client from a snapshot
///
/// # Errors
///
/// Returns `Decode` if the recorded status is not a valid HTTP status
pub fn into_response(snapshot: &ResponseSnapshot) -> Result<Response<Full<Bytes>>> {
    let status = StatusCode::from_u16(snapshot.status).map_err(|e| {
        PlaybackError::decode(0, format!("invalid status {}: {e}", snapshot.status))
    })?;

    let mut response = Response::new(Full::new(snapshot.body.clone()));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, value) in snapshot.headers.iter() {
        if FRAMING_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)) {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_bytes(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!("Skipping unrepresentable header {name:?}"),
        }
    }

    if status.canonical_reason() != Some(snapshot.reason.as_str()) && !snapshot.reason.is_empty() {
        match ReasonPhrase::try_from(snapshot.reason.as_bytes()) {
            Ok(reason) => {
                response.extensions_mut().insert(reason);
            }
            Err(_) => warn!("Skipping invalid reason phrase {:?}", snapshot.reason),
        }
    }

    Ok(response)
}

/// HTTP status used for an error answered by the proxy itself
#[must_use]
pub fn status_for(err: &PlaybackError) -> StatusCode {
    match err {
        PlaybackError::Decode { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        PlaybackError::ReplayExhausted { .. } => StatusCode::NOT_FOUND,
        PlaybackError::ReplayMismatch { .. } | PlaybackError::InvalidModeTransition(_) => {
            StatusCode::CONFLICT
        }
        PlaybackError::LockContention { .. }
        | PlaybackError::NoModeConfigured
        | PlaybackError::NoCassetteLoaded
        | PlaybackError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        PlaybackError::InvalidCassettePath(_) | PlaybackError::BadRequest(_) => {
            StatusCode::BAD_REQUEST
        }
        PlaybackError::DataTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        PlaybackError::Upstream(_) => StatusCode::BAD_GATEWAY,
        PlaybackError::Io(_) | PlaybackError::ConfigError(_) | PlaybackError::Other(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Plain-text error response tagged with `x-playback-error`
#[must_use]
pub fn error_response(err: &PlaybackError) -> Response<Full<Bytes>> {
    let mut response = text_response(status_for(err), format!("{err}\n"));
    response.headers_mut().insert(
        HeaderName::from_static(PLAYBACK_ERROR_HEADER),
        HeaderValue::from_static(err.kind()),
    );
    response
}

/// Plain-text response
#[must_use]
pub fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
