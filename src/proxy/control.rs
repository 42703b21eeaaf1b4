//! Control plane: reserved `/pb/*` paths

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use hyper::Uri;
use tokio::sync::broadcast;
use tracing::info;

use super::ProxyState;
use crate::config::Mode;
use crate::{PlaybackError, Result};

/// Switch to Recording
pub const PATH_MODE_RECORD: &str = "/pb/mode/record";
/// Switch to Replaying
pub const PATH_MODE_REPLAY: &str = "/pb/mode/replay";
/// Load a cassette, `?filepath=` relative to the cassette directory
pub const PATH_CASSETTE_LOAD: &str = "/pb/cassette/load";
/// Persist and unload the active cassette
pub const PATH_CASSETTE_EJECT: &str = "/pb/cassette/eject";
/// Stop the server
pub const PATH_STOP: &str = "/pb/stop";
/// Plain-text state report
pub const PATH_STATUS: &str = "/pb/status";

/// A control-plane request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOp {
    /// Change mode, keeping the loaded cassette
    SetMode(Mode),
    /// Load the cassette at the given (still encoded) `filepath`
    Load(String),
    /// Persist and unload the active cassette
    Eject,
    /// Begin graceful shutdown
    Stop,
    /// Report the current state
    Status,
}

impl ControlOp {
    /// Recognize a control request
    ///
    /// Returns `None` for proxy passthrough paths.
    pub fn parse(uri: &Uri) -> Option<Result<Self>> {
        let op = match uri.path() {
            PATH_MODE_RECORD => Self::SetMode(Mode::Recording),
            PATH_MODE_REPLAY => Self::SetMode(Mode::Replaying),
            PATH_CASSETTE_EJECT => Self::Eject,
            PATH_STOP => Self::Stop,
            PATH_STATUS => Self::Status,
            PATH_CASSETTE_LOAD => {
                let filepath = uri
                    .query()
                    .unwrap_or_default()
                    .split('&')
                    .filter_map(|pair| pair.split_once('='))
                    .find(|(key, _)| *key == "filepath")
                    .map(|(_, value)| value.to_string());

                return Some(filepath.map(Self::Load).ok_or_else(|| {
                    PlaybackError::BadRequest("missing 'filepath' query parameter".to_string())
                }));
            }
            _ => return None,
        };
        Some(Ok(op))
    }
}

/// Resolve an encoded `filepath` parameter inside `cassette_dir`
///
/// # Errors
///
/// Returns `InvalidCassettePath` for empty, absolute or escaping paths
pub fn resolve_cassette_path(cassette_dir: &Path, filepath: &str) -> Result<PathBuf> {
    let decoded = urlencoding::decode(&filepath.replace('+', " "))
        .map_err(|e| PlaybackError::InvalidCassettePath(format!("{filepath}: {e}")))?
        .into_owned();

    if decoded.is_empty() {
        return Err(PlaybackError::InvalidCassettePath(
            "filepath is empty".to_string(),
        ));
    }

    let relative = Path::new(&decoded);
    if relative.is_absolute() {
        return Err(PlaybackError::InvalidCassettePath(format!(
            "{decoded}: must be relative to the cassette directory"
        )));
    }

    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(PlaybackError::InvalidCassettePath(format!(
                    "{decoded}: must stay inside the cassette directory"
                )));
            }
        }
    }

    Ok(cassette_dir.join(relative))
}

/// Executes control operations against one server's state
pub struct ControlPlane {
    state: Arc<ProxyState>,
    cassette_dir: PathBuf,
    shutdown_tx: broadcast::Sender<()>,
}

impl ControlPlane {
    /// Create a control plane
    #[must_use]
    pub fn new(
        state: Arc<ProxyState>,
        cassette_dir: PathBuf,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            state,
            cassette_dir,
            shutdown_tx,
        }
    }

    /// Apply `op` and describe the outcome
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying state transition; the state is
    /// left unchanged
    pub async fn execute(&self, op: ControlOp) -> Result<String> {
        match op {
            ControlOp::SetMode(mode) => {
                self.state.set_mode(mode).await?;
                Ok(format!("mode: {mode}\n"))
            }
            ControlOp::Load(filepath) => {
                let path = resolve_cassette_path(&self.cassette_dir, &filepath)?;
                let count = self.state.load(&path).await?;
                Ok(format!(
                    "loaded {} ({} interactions)\n",
                    path.display(),
                    count
                ))
            }
            ControlOp::Eject => {
                let cassette = self.state.eject().await?;
                Ok(format!(
                    "ejected {} ({} interactions)\n",
                    cassette.source(),
                    cassette.len()
                ))
            }
            ControlOp::Stop => {
                self.state.stop().await?;
                info!("Stop requested via control plane");
                self.shutdown_tx.send(()).ok();
                Ok("stopping\n".to_string())
            }
            ControlOp::Status => Ok(self.state.status().await.to_string()),
        }
    }
}
