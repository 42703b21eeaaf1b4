//! Fire-and-forget webhook relay
//!
//! Recorded requests are queued on a bounded channel and re-issued by a
//! background task, so the primary response never waits on the receiver.

use hyper::Uri;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::interaction::RequestSnapshot;
use crate::network::UpstreamClient;

/// Number of queued events before new ones are dropped
pub const WEBHOOK_QUEUE_DEPTH: usize = 64;

/// Handle for queueing copies of recorded requests
#[derive(Clone)]
pub struct WebhookRelay {
    tx: mpsc::Sender<RequestSnapshot>,
}

impl WebhookRelay {
    /// Spawn the relay task
    ///
    /// The task exits once every `WebhookRelay` clone is dropped. Must be
    /// called from within a tokio runtime.
    pub fn spawn(client: UpstreamClient, base: Uri) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<RequestSnapshot>(WEBHOOK_QUEUE_DEPTH);

        let task = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                match client.send(&base, &request).await {
                    Ok(response) => debug!(
                        "Webhook relay {} {} -> {}",
                        request.method, request.target, response.status
                    ),
                    Err(e) => warn!(
                        "Webhook relay {} {} failed: {}",
                        request.method, request.target, e
                    ),
                }
            }
            debug!("Webhook relay stopped");
        });

        (Self { tx }, task)
    }

    /// Queue a copy of `request` without waiting
    pub fn dispatch(&self, request: &RequestSnapshot) {
        if let Err(e) = self.tx.try_send(request.clone()) {
            warn!("Webhook relay dropped {} {}: {}", request.method, request.target, e);
        }
    }
}
