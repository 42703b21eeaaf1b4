//! Playback - HTTP record-replay proxy
//!
//! Sits between a client and a remote HTTP service. In recording mode every
//! exchange is forwarded and captured into a cassette; in replay mode the
//! cassette is served back in order without touching the remote. A small
//! control plane on the same listener switches modes and loads cassettes.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::field_reassign_with_default,
    clippy::multiple_crate_versions
)]

pub mod cassette;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod interaction;
pub mod network;
pub mod proxy;
pub mod recording;
pub mod replay;
pub mod storage;

pub use cassette::{Cassette, CassetteSource};
pub use config::{Config, Mode, ReplayMatch};
pub use error::{PlaybackError, Result};
pub use interaction::{Headers, Interaction, RequestSnapshot, ResponseSnapshot};
pub use proxy::{PlaybackServer, ProxyState, ShutdownHandle};
