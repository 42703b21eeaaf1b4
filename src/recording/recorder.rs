//! Recording mode: forward live, capture every outcome

use std::time::Duration;

use hyper::Uri;
use tracing::{debug, warn};

use super::WebhookRelay;
use crate::interaction::{RequestSnapshot, ResponseSnapshot};
use crate::network::UpstreamClient;
use crate::proxy::{status_for, ProxyState};
use crate::{PlaybackError, Result};

/// Header marking a response the proxy synthesized
pub const PLAYBACK_ERROR_HEADER: &str = "x-playback-error";

/// Forwards requests to the remote and records the exchange
pub struct HttpRecorder {
    client: UpstreamClient,
    remote: Uri,
    webhook: Option<WebhookRelay>,
    timeout: Duration,
}

impl HttpRecorder {
    /// Create a recorder for `remote`
    #[must_use]
    pub fn new(
        client: UpstreamClient,
        remote: Uri,
        webhook: Option<WebhookRelay>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            remote,
            webhook,
            timeout,
        }
    }

    /// Forward `request`, record the outcome and return it
    ///
    /// A failed exchange (unreachable remote, timeout, oversized response) is
    /// recorded as a synthesized error response so that replay reproduces
    /// what the caller saw.
    ///
    /// # Errors
    ///
    /// Returns `NoCassetteLoaded` if there is nowhere to record, or the
    /// encoder error if the exchange cannot be appended
    pub async fn record(&self, state: &ProxyState, request: RequestSnapshot) -> Result<ResponseSnapshot> {
        if !state.has_cassette().await {
            return Err(PlaybackError::NoCassetteLoaded);
        }

        if let Some(webhook) = &self.webhook {
            webhook.dispatch(&request);
        }

        let response = match tokio::time::timeout(self.timeout, self.client.send(&self.remote, &request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("{} {} failed: {}", request.method, request.target, e);
                failure_response(status_for(&e).as_u16(), e.kind(), &e.to_string())
            }
            Err(_) => {
                warn!(
                    "{} {} timed out after {} ms",
                    request.method,
                    request.target,
                    self.timeout.as_millis()
                );
                failure_response(
                    504,
                    "upstream",
                    &format!("Upstream request timed out after {} ms", self.timeout.as_millis()),
                )
            }
        };

        let method = request.method.clone();
        let target = request.target.clone();
        let sequence = state.append(request, response.clone()).await?;
        debug!("Recorded #{} {} {} -> {}", sequence, method, target, response.status);

        Ok(response)
    }
}

/// Response standing in for an exchange that could not be completed
fn failure_response(status: u16, kind: &'static str, message: &str) -> ResponseSnapshot {
    let mut response = ResponseSnapshot::new(status, format!("{message}\n"));
    response
        .headers
        .append("content-type", "text/plain; charset=utf-8");
    response.headers.append(PLAYBACK_ERROR_HEADER, kind);
    response
}
