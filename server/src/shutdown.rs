//! Cooperative shutdown
//!
//! Signal handlers only flip a run flag; the event loop notices it at the top
//! of its next iteration and drains. Repeated signals are no-ops.

use log::{debug, info};
use std::io;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Draining,
}

#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing token, e.g. one shared with a test harness.
    pub fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Requests a drain. Returns true only for the call that changed the state.
    pub fn trigger(&self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn state(&self) -> RunState {
        if self.token.is_cancelled() {
            RunState::Draining
        } else {
            RunState::Running
        }
    }

    /// Token observed by the event loop.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Installs SIGINT and SIGTERM handlers
    ///
    /// Registration happens before this returns, so a signal delivered right
    /// after the call is never lost. The returned task runs until the runtime
    /// shuts down.
    pub fn listen_for_signals(&self) -> io::Result<JoinHandle<()>> {
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let coordinator = self.clone();

        Ok(tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    received = interrupt.recv() => match received {
                        Some(()) => "SIGINT",
                        None => return,
                    },
                    received = terminate.recv() => match received {
                        Some(()) => "SIGTERM",
                        None => return,
                    },
                };

                if coordinator.trigger() {
                    info!("Received {}, draining", name);
                } else {
                    debug!("Received {} while already draining", name);
                }
            }
        }))
    }
}
