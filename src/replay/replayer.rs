//! Replay mode: serve recorded responses in order

use tracing::{debug, warn};

use crate::config::ReplayMatch;
use crate::fingerprint::{fingerprint_request, short_hex};
use crate::interaction::{RequestSnapshot, ResponseSnapshot};
use crate::proxy::ProxyState;
use crate::{PlaybackError, Result};

/// Serves the interaction at the cursor of the active cassette
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpReplayer {
    replay_match: ReplayMatch,
}

impl HttpReplayer {
    /// Create a replayer with the given matching policy
    #[must_use]
    pub fn new(replay_match: ReplayMatch) -> Self {
        Self { replay_match }
    }

    /// Pop the next recorded response
    ///
    /// Matching is positional. A request that differs from the recorded one
    /// is logged, and rejected under [`ReplayMatch::Verified`].
    ///
    /// # Errors
    ///
    /// Returns `ReplayExhausted` if nothing is left to serve, `ReplayMismatch`
    /// on a verified mismatch (the cursor does not move)
    pub async fn replay(&self, state: &ProxyState, request: &RequestSnapshot) -> Result<ResponseSnapshot> {
        let inbound = fingerprint_request(request);

        let result = state
            .next_interaction(|recorded| {
                let expected = fingerprint_request(&recorded.request);
                if expected == inbound {
                    return Ok(());
                }

                warn!(
                    "Replay #{}: recorded {} {} ({}), got {} {} ({})",
                    recorded.sequence,
                    recorded.request.method,
                    recorded.request.target,
                    short_hex(&expected),
                    request.method,
                    request.target,
                    short_hex(&inbound)
                );

                match self.replay_match {
                    ReplayMatch::Sequential => Ok(()),
                    ReplayMatch::Verified => Err(PlaybackError::ReplayMismatch {
                        sequence: recorded.sequence,
                        expected: format!("{} {}", recorded.request.method, recorded.request.target),
                        actual: format!("{} {}", request.method, request.target),
                    }),
                }
            })
            .await;

        match result {
            Ok(interaction) => {
                debug!(
                    "Replayed #{} {} {} -> {}",
                    interaction.sequence, request.method, request.target, interaction.response.status
                );
                Ok(interaction.response)
            }
            Err(e @ PlaybackError::ReplayExhausted { .. }) => {
                warn!(
                    "{} {}: {} (more requests than were recorded?)",
                    request.method, request.target, e
                );
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
