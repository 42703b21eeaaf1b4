//! Recording mode
//!
//! Live forwarding to the remote with every exchange appended to the active
//! cassette, plus the optional webhook relay.

mod recorder;
mod webhook;

pub use recorder::{HttpRecorder, PLAYBACK_ERROR_HEADER};
pub use webhook::{WebhookRelay, WEBHOOK_QUEUE_DEPTH};
