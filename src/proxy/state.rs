//! Shared proxy state: mode, active cassette, lifecycle
//!
//! Two locks guard the state. The transition gate is held shared by every
//! proxy request for its whole duration and exclusively by control
//! operations, so a request always completes against the state it started
//! with. The inner mutex is only held for the mode snapshot and for the
//! append/pop step, so upstream round trips run in parallel.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

use crate::cassette::{Cassette, CassetteSource};
use crate::config::{LimitsConfig, Mode};
use crate::interaction::{Interaction, RequestSnapshot, ResponseSnapshot};
use crate::{PlaybackError, Result};

#[derive(Debug, Default)]
struct StateInner {
    mode: Mode,
    cassette: Option<Cassette>,
    terminated: bool,
}

impl StateInner {
    fn ensure_running(&self) -> Result<()> {
        if self.terminated {
            return Err(PlaybackError::InvalidModeTransition(
                "server is stopped".to_string(),
            ));
        }
        Ok(())
    }

    /// Persist the active cassette if it holds unwritten interactions
    fn flush(&mut self) -> Result<()> {
        if let Some(cassette) = self.cassette.as_mut().filter(|c| c.is_dirty()) {
            cassette.persist_to_source()?;
        }
        Ok(())
    }
}

/// Mode and cassette shared by every connection of one server
#[derive(Debug)]
pub struct ProxyState {
    gate: RwLock<()>,
    inner: Mutex<StateInner>,
    lock_timeout: Duration,
}

impl ProxyState {
    /// Create an idle state with no cassette
    ///
    /// `lock_timeout` bounds how long a control operation waits for
    /// in-flight proxy requests to drain.
    #[must_use]
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            gate: RwLock::new(()),
            inner: Mutex::new(StateInner::default()),
            lock_timeout,
        }
    }

    /// Admit a proxy request
    ///
    /// The returned guard blocks control operations until dropped.
    ///
    /// # Errors
    ///
    /// Returns `ShuttingDown` once the server has been stopped
    pub async fn enter(&self) -> Result<RwLockReadGuard<'_, ()>> {
        let guard = self.gate.read().await;
        if self.inner.lock().await.terminated {
            return Err(PlaybackError::ShuttingDown);
        }
        Ok(guard)
    }

    async fn transition(&self) -> Result<RwLockWriteGuard<'_, ()>> {
        tokio::time::timeout(self.lock_timeout, self.gate.write())
            .await
            .map_err(|_| {
                warn!(
                    "Control operation timed out after {} ms waiting for in-flight requests",
                    self.lock_timeout.as_millis()
                );
                PlaybackError::LockContention {
                    waited_ms: self.lock_timeout.as_millis() as u64,
                }
            })
    }

    /// Current mode
    pub async fn mode(&self) -> Mode {
        self.inner.lock().await.mode
    }

    /// Check if a cassette is loaded
    pub async fn has_cassette(&self) -> bool {
        self.inner.lock().await.cassette.is_some()
    }

    /// Check if the server has been stopped
    pub async fn is_terminated(&self) -> bool {
        self.inner.lock().await.terminated
    }

    /// Switch to Recording or Replaying, keeping the loaded cassette
    ///
    /// # Errors
    ///
    /// Returns `InvalidModeTransition` for `Mode::Idle` or after stop,
    /// `LockContention` if in-flight requests do not drain in time
    pub async fn set_mode(&self, mode: Mode) -> Result<()> {
        if mode == Mode::Idle {
            return Err(PlaybackError::InvalidModeTransition(
                "idle is entered by ejecting the cassette".to_string(),
            ));
        }

        let _gate = self.transition().await?;
        let mut inner = self.inner.lock().await;
        inner.ensure_running()?;

        if inner.mode != mode {
            info!("Mode {} -> {}", inner.mode, mode);
            inner.mode = mode;
        }
        Ok(())
    }

    /// Load the cassette at `path`, replacing the active one
    ///
    /// A dirty active cassette is persisted first. Returns the number of
    /// interactions loaded.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModeTransition` if no mode is set, `Decode` if the file
    /// is corrupt; the active cassette is kept in both cases
    pub async fn load(&self, path: &Path) -> Result<usize> {
        let _gate = self.transition().await?;
        let mut inner = self.inner.lock().await;
        inner.ensure_running()?;

        if inner.mode == Mode::Idle {
            return Err(PlaybackError::InvalidModeTransition(
                "set a mode before loading a cassette".to_string(),
            ));
        }

        inner.flush()?;
        let cassette = Cassette::load(path)?;
        let count = cassette.len();
        inner.cassette = Some(cassette);
        Ok(count)
    }

    /// Install an in-memory cassette, replacing the active one
    ///
    /// # Errors
    ///
    /// Same conditions as [`ProxyState::load`]
    pub async fn insert_cassette(&self, cassette: Cassette) -> Result<()> {
        let _gate = self.transition().await?;
        let mut inner = self.inner.lock().await;
        inner.ensure_running()?;

        if inner.mode == Mode::Idle {
            return Err(PlaybackError::InvalidModeTransition(
                "set a mode before loading a cassette".to_string(),
            ));
        }

        inner.flush()?;
        info!(
            "Inserted cassette {} ({} interactions)",
            cassette.source(),
            cassette.len()
        );
        inner.cassette = Some(cassette);
        Ok(())
    }

    /// Persist the active cassette if needed, unload it and return to Idle
    ///
    /// # Errors
    ///
    /// Returns `InvalidModeTransition` if no cassette is loaded, or the
    /// persist error; on error the cassette stays loaded
    pub async fn eject(&self) -> Result<Cassette> {
        let _gate = self.transition().await?;
        let mut inner = self.inner.lock().await;
        inner.ensure_running()?;

        if inner.cassette.is_none() {
            return Err(PlaybackError::InvalidModeTransition(
                "no cassette is loaded".to_string(),
            ));
        }

        inner.flush()?;
        inner.mode = Mode::Idle;
        let cassette = inner.cassette.take().ok_or(PlaybackError::NoCassetteLoaded)?;
        info!("Ejected cassette {} ({} interactions)", cassette.source(), cassette.len());
        Ok(cassette)
    }

    /// Persist and mark the state terminated
    ///
    /// # Errors
    ///
    /// Returns `InvalidModeTransition` if already stopped
    pub async fn stop(&self) -> Result<()> {
        let _gate = self.transition().await?;
        let mut inner = self.inner.lock().await;
        inner.ensure_running()?;

        inner.flush()?;
        inner.terminated = true;
        info!("Proxy state terminated");
        Ok(())
    }

    /// Persist and mark terminated, tolerating an earlier stop
    ///
    /// # Errors
    ///
    /// Returns error if the gate cannot be taken or persisting fails
    pub async fn terminate(&self) -> Result<()> {
        let _gate = self.transition().await?;
        let mut inner = self.inner.lock().await;
        inner.flush()?;
        inner.terminated = true;
        Ok(())
    }

    /// Append a recorded interaction to the active cassette
    ///
    /// # Errors
    ///
    /// Returns `NoCassetteLoaded` if no cassette is loaded, or the encoder error
    pub async fn append(&self, request: RequestSnapshot, response: ResponseSnapshot) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let cassette = inner
            .cassette
            .as_mut()
            .ok_or(PlaybackError::NoCassetteLoaded)?;
        cassette.append(request, response)
    }

    /// Pop the interaction at the cursor if `accept` approves it
    ///
    /// A rejected interaction stays at the cursor.
    ///
    /// # Errors
    ///
    /// Returns `ReplayExhausted` if there is no cassette or nothing left to
    /// serve, or whatever `accept` returns
    pub async fn next_interaction<F>(&self, accept: F) -> Result<Interaction>
    where
        F: FnOnce(&Interaction) -> Result<()>,
    {
        let mut inner = self.inner.lock().await;
        let Some(cassette) = inner.cassette.as_mut() else {
            return Err(PlaybackError::ReplayExhausted { served: 0 });
        };

        let served = cassette.cursor();
        let interaction = cassette
            .peek()
            .ok_or(PlaybackError::ReplayExhausted { served })?;
        accept(interaction)?;

        cassette
            .next_interaction()
            .cloned()
            .ok_or(PlaybackError::ReplayExhausted { served })
    }

    /// Snapshot of the state for `/pb/status`
    pub async fn status(&self) -> StatusReport {
        let inner = self.inner.lock().await;
        StatusReport {
            mode: inner.mode,
            terminated: inner.terminated,
            cassette: inner.cassette.as_ref().map(|c| CassetteStatus {
                source: c.source().clone(),
                interactions: c.len(),
                cursor: c.cursor(),
                dirty: c.is_dirty(),
            }),
        }
    }
}

impl Default for ProxyState {
    fn default() -> Self {
        Self::new(Duration::from_millis(
            LimitsConfig::default().control_lock_timeout_ms,
        ))
    }
}

/// Point-in-time view of the proxy state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    /// Current mode
    pub mode: Mode,
    /// Whether the server was stopped
    pub terminated: bool,
    /// Active cassette, if any
    pub cassette: Option<CassetteStatus>,
}

/// Active cassette summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CassetteStatus {
    /// Where the cassette lives
    pub source: CassetteSource,
    /// Number of interactions
    pub interactions: usize,
    /// Replay cursor
    pub cursor: usize,
    /// Whether there are unpersisted interactions
    pub dirty: bool,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "mode: {}", self.mode)?;
        writeln!(f, "terminated: {}", self.terminated)?;
        match &self.cassette {
            Some(cassette) => {
                writeln!(f, "cassette: {}", cassette.source)?;
                writeln!(f, "interactions: {}", cassette.interactions)?;
                writeln!(f, "cursor: {}", cassette.cursor)?;
                writeln!(f, "dirty: {}", cassette.dirty)
            }
            None => writeln!(f, "cassette: none"),
        }
    }
}
