//! HTTP client for forwarding requests to the remote and the webhook receiver

use std::time::Duration;

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Bytes;
use hyper::ext::ReasonPhrase;
use hyper::{Method, Request, Uri};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, warn};

use super::{is_hop_by_hop, CONNECT_TIMEOUT_MS};
use crate::interaction::{Headers, RequestSnapshot, ResponseSnapshot};
use crate::{PlaybackError, Result};

/// Shared client type, speaking HTTP or HTTPS depending on the base URL
type HttpsClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// HTTP client for forwarding requests
#[derive(Clone)]
pub struct UpstreamClient {
    client: HttpsClient,
    max_response_size: usize,
}

impl UpstreamClient {
    /// Create a new client
    #[must_use]
    pub fn new(max_response_size: usize) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.set_connect_timeout(Some(Duration::from_millis(CONNECT_TIMEOUT_MS)));
        http_connector.enforce_http(false);

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build(https_connector);

        Self {
            client,
            max_response_size,
        }
    }

    /// Send `request` to `base` and capture the response
    ///
    /// Non-success statuses are a normal response, not an error.
    ///
    /// # Errors
    ///
    /// Returns `Upstream` if the remote cannot be reached or the exchange
    /// breaks off, `DataTooLarge` if the response body exceeds the limit
    pub async fn send(&self, base: &Uri, request: &RequestSnapshot) -> Result<ResponseSnapshot> {
        let uri = build_uri(base, &request.target)?;

        debug!("Forwarding {} to {}", request.method, uri);

        let method = Method::from_bytes(request.method.as_bytes()).map_err(|e| {
            PlaybackError::BadRequest(format!("Invalid HTTP method '{}': {e}", request.method))
        })?;

        let mut request_builder = Request::builder().method(method).uri(uri);

        // Host is derived from the base URL, hop-by-hop headers describe the inbound connection
        for (name, value) in request.headers.iter() {
            if name.eq_ignore_ascii_case("host") || is_hop_by_hop(name) {
                continue;
            }
            request_builder = request_builder.header(name, &value[..]);
        }

        let http_request = request_builder
            .body(Full::new(request.body.clone()))
            .map_err(|e| PlaybackError::BadRequest(format!("Failed to build request: {e}")))?;

        let response = self.client.request(http_request).await.map_err(|e| {
            warn!("Request failed: {e}");
            PlaybackError::Upstream(e.to_string())
        })?;

        let status = response.status();
        let reason = match response.extensions().get::<ReasonPhrase>() {
            Some(phrase) => String::from_utf8_lossy(phrase.as_bytes()).into_owned(),
            None => status.canonical_reason().unwrap_or_default().to_string(),
        };

        let headers: Headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str(), Bytes::copy_from_slice(value.as_bytes())))
            .collect();

        let body = read_body(response.into_body(), self.max_response_size)
            .await
            .map_err(|e| match e {
                PlaybackError::DataTooLarge { .. } => e,
                other => PlaybackError::Upstream(other.to_string()),
            })?;

        Ok(ResponseSnapshot {
            status: status.as_u16(),
            reason,
            headers,
            body,
        })
    }
}

/// Read a body with a size limit
///
/// A declared length over the limit is rejected up front; otherwise reading
/// stops as soon as the limit is crossed.
///
/// # Errors
///
/// Returns error if body is too large or read fails
pub async fn read_body<B>(body: B, max_size: usize) -> Result<Bytes>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    if let Some(size) = body.size_hint().exact() {
        let size = usize::try_from(size).unwrap_or(usize::MAX);
        if size > max_size {
            return Err(PlaybackError::DataTooLarge {
                size,
                limit: max_size,
            });
        }
    }

    let collected = Limited::new(body, max_size).collect().await.map_err(|e| {
        if e.downcast_ref::<LengthLimitError>().is_some() {
            PlaybackError::DataTooLarge {
                size: max_size.saturating_add(1),
                limit: max_size,
            }
        } else {
            PlaybackError::Other(format!("Failed to read body: {e}"))
        }
    })?;

    Ok(collected.to_bytes())
}

/// Join a base URL and a request target
fn build_uri(base: &Uri, target: &str) -> Result<Uri> {
    let scheme = base.scheme_str().unwrap_or("http");
    let authority = base
        .authority()
        .ok_or_else(|| PlaybackError::ConfigError(format!("Base URL has no host: {base}")))?;
    let prefix = base.path().trim_end_matches('/');

    let uri = if target.starts_with('/') {
        format!("{scheme}://{authority}{prefix}{target}")
    } else {
        format!("{scheme}://{authority}{prefix}/{target}")
    };

    uri.parse::<Uri>()
        .map_err(|e| PlaybackError::BadRequest(format!("Invalid URI '{uri}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(url: &str) -> Uri {
        url.parse().unwrap()
    }

    #[test]
    fn test_build_uri_simple() {
        let uri = build_uri(&base("http://example.com:8080"), "/api/test").unwrap();
        assert_eq!(uri.to_string(), "http://example.com:8080/api/test");
    }

    #[test]
    fn test_build_uri_keeps_query_verbatim() {
        let uri = build_uri(
            &base("https://api.stripe.com"),
            "/v1/customers?limit=1&email=a%40b.com",
        )
        .unwrap();
        assert_eq!(
            uri.to_string(),
            "https://api.stripe.com/v1/customers?limit=1&email=a%40b.com"
        );
    }

    #[test]
    fn test_build_uri_with_base_path() {
        let uri = build_uri(&base("http://localhost:9000/prefix/"), "/v1/balance").unwrap();
        assert_eq!(uri.to_string(), "http://localhost:9000/prefix/v1/balance");

        let uri = build_uri(&base("http://localhost:9000"), "v1/balance").unwrap();
        assert_eq!(uri.to_string(), "http://localhost:9000/v1/balance");
    }

    #[tokio::test]
    async fn test_read_body() {
        let data = Bytes::from("test data");
        let body = Full::new(data.clone());

        let result = read_body(body, 1024).await;
        assert_eq!(result.unwrap(), data);
    }

    #[tokio::test]
    async fn test_read_body_too_large() {
        let body = Full::new(Bytes::from("test data that is too long"));

        let result = read_body(body, 5).await;
        assert!(matches!(result, Err(PlaybackError::DataTooLarge { limit: 5, .. })));
    }

    /// Body that hands out chunks without announcing its length
    struct Chunked(std::collections::VecDeque<Bytes>);

    impl hyper::body::Body for Chunked {
        type Data = Bytes;
        type Error = std::convert::Infallible;

        fn poll_frame(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Option<std::result::Result<hyper::body::Frame<Bytes>, Self::Error>>>
        {
            std::task::Poll::Ready(self.0.pop_front().map(|chunk| Ok(hyper::body::Frame::data(chunk))))
        }
    }

    #[tokio::test]
    async fn test_read_body_stops_streaming_at_limit() {
        let chunks = (0..8).map(|_| Bytes::from_static(b"0123456789")).collect();

        let result = read_body(Chunked(chunks), 25).await;
        assert!(matches!(
            result,
            Err(PlaybackError::DataTooLarge { limit: 25, size }) if size > 25
        ));

        let chunks = (0..2).map(|_| Bytes::from_static(b"0123456789")).collect();
        assert_eq!(read_body(Chunked(chunks), 25).await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_unreachable_remote_is_upstream_error() {
        // port 9 (discard) on loopback is closed on test machines
        let client = UpstreamClient::new(1024);
        let request = RequestSnapshot::new("GET", "/");

        let err = client
            .send(&base("http://127.0.0.1:9"), &request)
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::Upstream(_)), "{err:?}");
    }
}
