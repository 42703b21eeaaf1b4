//! Proxy server: control plane, passthrough dispatch and shared state
//!
//! One listener serves both the reserved `/pb/*` control paths and
//! everything else, which is recorded or replayed depending on the mode.

mod control;
mod http;
mod server;
mod state;

pub use control::{
    resolve_cassette_path, ControlOp, ControlPlane, PATH_CASSETTE_EJECT, PATH_CASSETTE_LOAD,
    PATH_MODE_RECORD, PATH_MODE_REPLAY, PATH_STATUS, PATH_STOP,
};
pub use http::{error_response, status_for};
pub use server::{PlaybackServer, ShutdownHandle};
pub use state::{CassetteStatus, ProxyState, StatusReport};
