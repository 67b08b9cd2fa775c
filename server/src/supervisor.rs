//! Hand-off of formed matches to isolated workers
//!
//! A [`MatchLauncher`] turns a [`Handoff`] into a running worker. Two launchers
//! exist: [`ProcessLauncher`] runs the `match-worker` executable and lets it
//! inherit the players' sockets, [`TaskLauncher`] runs the same session as a
//! task on the current runtime. [`MatchSupervisor`] wraps a launcher with the
//! retry delay and the bookkeeping the event loop needs.

use crate::connection_table::Connection;
use crate::error::SpawnError;
use crate::matchmaking::{Match, MatchId};
use crate::session::{run_session, SessionPlayer};
use log::{info, warn};
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use shared::{MatchAssignment, Seat};
use std::future::Future;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

/// A formed match together with the connections it owns.
#[derive(Debug)]
pub struct Handoff {
    pub formed: Match,
    pub players: Vec<Connection<TcpStream>>,
}

impl Handoff {
    pub fn new(formed: Match, players: Vec<Connection<TcpStream>>) -> Self {
        Self { formed, players }
    }

    pub fn match_id(&self) -> MatchId {
        self.formed.id()
    }

    pub fn seats(&self) -> usize {
        self.players.len()
    }

    /// Describes the hand-off for a worker that inherits the raw descriptors.
    pub fn assignment(&self) -> MatchAssignment {
        MatchAssignment {
            match_id: self.match_id().get(),
            seats: self
                .players
                .iter()
                .map(|connection| Seat {
                    connection_id: connection.id.get(),
                    fd: connection.stream.as_raw_fd(),
                    peer_addr: connection.addr.to_string(),
                    preamble: connection.preamble().to_vec(),
                })
                .collect(),
        }
    }
}

/// A hand-off that did not happen; the connections are returned untouched.
#[derive(Debug)]
pub struct LaunchFailure {
    pub handoff: Handoff,
    pub error: SpawnError,
}

pub trait MatchLauncher: Send {
    /// Starts a worker for the hand-off and takes ownership of its connections.
    fn launch(&mut self, handoff: Handoff) -> Result<(), LaunchFailure>;

    /// Collects workers that have finished, without blocking.
    fn reap(&mut self) -> Vec<MatchId>;

    /// Player seats held by workers that are still running.
    fn seats_in_use(&self) -> usize;

    fn live_workers(&self) -> usize;

    /// Called once at shutdown. Workers outside the process are left running.
    fn drain(&mut self, grace: Duration) -> impl Future<Output = ()> + Send;
}

struct ProcessWorker {
    match_id: MatchId,
    seats: usize,
    child: Child,
}

/// Runs each match in a separate `match-worker` process
///
/// The players' sockets are inherited by the child: close-on-exec is cleared
/// for exactly those descriptors, and only in the forked child. The match
/// assignment is written to the child's stdin. Once the child is running the
/// server's copies are dropped. Workers are placed in their own process group
/// and outlive the server.
pub struct ProcessLauncher {
    program: PathBuf,
    max_data_size: Option<usize>,
    workers: Vec<ProcessWorker>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            max_data_size: None,
            workers: Vec::new(),
        }
    }

    /// Passes the server's read size on to every worker.
    pub fn with_max_data_size(mut self, max_data_size: usize) -> Self {
        self.max_data_size = Some(max_data_size);
        self
    }

    /// `match-worker` next to the running executable.
    pub fn default_program() -> io::Result<PathBuf> {
        Ok(std::env::current_exe()?.with_file_name("match-worker"))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn spawn_worker(&self, handoff: &Handoff) -> Result<Child, SpawnError> {
        let assignment = handoff.assignment();
        let payload = assignment.encode()?;
        let inherited: Vec<RawFd> = assignment.seats.iter().map(|seat| seat.fd).collect();

        let mut command = Command::new(&self.program);
        command
            .arg("--match-id")
            .arg(assignment.match_id.to_string())
            .stdin(Stdio::piped())
            // Own process group, so a terminal interrupt aimed at the server
            // does not end matches in progress.
            .process_group(0);
        if let Some(size) = self.max_data_size {
            command.arg("--max-data-size").arg(size.to_string());
        }

        // SAFETY: the closure runs between fork and exec and only calls
        // fcntl(2), which is async-signal-safe. It does not allocate.
        unsafe {
            command.pre_exec(move || {
                for fd in &inherited {
                    fcntl(*fd, FcntlArg::F_SETFD(FdFlag::empty())).map_err(io::Error::from)?;
                }
                Ok(())
            });
        }

        let mut child = command.spawn().map_err(SpawnError::Process)?;

        let delivered = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(&payload),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "worker stdin missing")),
        };
        if let Err(e) = delivered {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SpawnError::Assignment(e));
        }

        Ok(child)
    }
}

impl MatchLauncher for ProcessLauncher {
    fn launch(&mut self, handoff: Handoff) -> Result<(), LaunchFailure> {
        match self.spawn_worker(&handoff) {
            Ok(child) => {
                info!(
                    "Match {} handed to worker process {}",
                    handoff.match_id(),
                    child.id()
                );
                self.workers.push(ProcessWorker {
                    match_id: handoff.match_id(),
                    seats: handoff.seats(),
                    child,
                });
                // Closes the server's copies of the sockets.
                drop(handoff);
                Ok(())
            }
            Err(error) => Err(LaunchFailure { handoff, error }),
        }
    }

    fn reap(&mut self) -> Vec<MatchId> {
        let mut finished = Vec::new();
        self.workers.retain_mut(|worker| match worker.child.try_wait() {
            Ok(Some(status)) => {
                info!(
                    "Match {} worker {} exited with {}",
                    worker.match_id,
                    worker.child.id(),
                    status
                );
                finished.push(worker.match_id);
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!(
                    "Could not poll match {} worker {}: {}",
                    worker.match_id,
                    worker.child.id(),
                    e
                );
                finished.push(worker.match_id);
                false
            }
        });
        finished
    }

    fn seats_in_use(&self) -> usize {
        self.workers.iter().map(|w| w.seats).sum()
    }

    fn live_workers(&self) -> usize {
        self.workers.len()
    }

    async fn drain(&mut self, _grace: Duration) {
        self.reap();
        if !self.workers.is_empty() {
            info!(
                "Leaving {} match worker process(es) running",
                self.workers.len()
            );
        }
    }
}

struct TaskWorker {
    match_id: MatchId,
    seats: usize,
    handle: JoinHandle<()>,
}

/// Runs each match as a task on the current runtime
pub struct TaskLauncher {
    max_data_size: usize,
    workers: Vec<TaskWorker>,
}

impl TaskLauncher {
    pub fn new(max_data_size: usize) -> Self {
        Self {
            max_data_size,
            workers: Vec::new(),
        }
    }
}

impl MatchLauncher for TaskLauncher {
    fn launch(&mut self, handoff: Handoff) -> Result<(), LaunchFailure> {
        let match_id = handoff.match_id();
        let seats = handoff.seats();
        let players = handoff
            .players
            .into_iter()
            .map(|mut connection| SessionPlayer {
                peer: connection.addr.to_string(),
                preamble: connection.take_preamble(),
                stream: connection.stream,
            })
            .collect();

        let max_data_size = self.max_data_size;
        let handle = tokio::spawn(async move {
            run_session(match_id.get(), players, max_data_size).await;
        });
        info!("Match {} handed to session task", match_id);

        self.workers.push(TaskWorker {
            match_id,
            seats,
            handle,
        });
        Ok(())
    }

    fn reap(&mut self) -> Vec<MatchId> {
        let mut finished = Vec::new();
        self.workers.retain(|worker| {
            if worker.handle.is_finished() {
                finished.push(worker.match_id);
                false
            } else {
                true
            }
        });
        finished
    }

    fn seats_in_use(&self) -> usize {
        self.workers.iter().map(|w| w.seats).sum()
    }

    fn live_workers(&self) -> usize {
        self.workers.len()
    }

    async fn drain(&mut self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        for mut worker in self.workers.drain(..) {
            if tokio::time::timeout_at(deadline, &mut worker.handle)
                .await
                .is_err()
            {
                warn!("Aborting match {} session after grace period", worker.match_id);
                worker.handle.abort();
            }
        }
    }
}

/// Launcher plus retry policy, as seen by the event loop
pub struct MatchSupervisor<L> {
    launcher: L,
    retry_delay: Duration,
    retry_after: Option<Instant>,
    launched: u64,
    failures: u64,
}

impl<L: MatchLauncher> MatchSupervisor<L> {
    pub fn new(launcher: L, retry_delay: Duration) -> Self {
        Self {
            launcher,
            retry_delay,
            retry_after: None,
            launched: 0,
            failures: 0,
        }
    }

    /// False while backing off after a failed launch.
    pub fn can_launch(&self) -> bool {
        self.retry_after
            .map_or(true, |after| Instant::now() >= after)
    }

    pub fn launch(&mut self, handoff: Handoff) -> Result<(), LaunchFailure> {
        match self.launcher.launch(handoff) {
            Ok(()) => {
                self.launched += 1;
                self.retry_after = None;
                Ok(())
            }
            Err(failure) => {
                self.failures += 1;
                self.retry_after = Some(Instant::now() + self.retry_delay);
                Err(failure)
            }
        }
    }

    pub fn reap(&mut self) -> Vec<MatchId> {
        self.launcher.reap()
    }

    pub fn seats_in_use(&self) -> usize {
        self.launcher.seats_in_use()
    }

    pub fn live_workers(&self) -> usize {
        self.launcher.live_workers()
    }

    pub fn launched(&self) -> u64 {
        self.launched
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub async fn drain(&mut self, grace: Duration) {
        self.launcher.drain(grace).await;
    }
}
