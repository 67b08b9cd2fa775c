//! Server event loop accepting players and turning them into matches

use crate::buffer::{ReadBuffer, ReadOutcome};
use crate::config::ServerConfig;
use crate::connection_table::{ConnectionId, ConnectionTable};
use crate::error::ServerError;
use crate::listener::bind_listener;
use crate::matchmaking::MatchmakingQueue;
use crate::supervisor::{Handoff, MatchLauncher, MatchSupervisor};
use log::{debug, error, info, warn};
use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::task::Poll;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// Counters kept by the event loop, returned when it stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub accepted: u64,
    pub rejected: u64,
    pub accept_failures: u64,
    pub peer_closed: u64,
    pub read_failures: u64,
    pub matches_formed: u64,
    pub matches_launched: u64,
    pub spawn_failures: u64,
    pub workers_reaped: u64,
}

/// What one readiness wait reported.
#[derive(Default)]
struct Readiness {
    accepted: Option<io::Result<(TcpStream, SocketAddr)>>,
    readable: Vec<ConnectionId>,
}

/// Single-threaded matchmaking server
///
/// One task owns the listener, every waiting connection and the queue. Each
/// turn of the loop waits (bounded by the poll timeout) for the listener or
/// any client to become ready, services what is ready, reaps finished
/// workers and launches whatever matches the queue can form.
pub struct Server<L: MatchLauncher> {
    config: ServerConfig,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    table: ConnectionTable<TcpStream>,
    queue: MatchmakingQueue,
    supervisor: MatchSupervisor<L>,
    shutdown: CancellationToken,
    buffer: ReadBuffer,
    stats: ServerStats,
}

impl<L: MatchLauncher> Server<L> {
    /// Wraps an already listening, non-blocking socket. Must run inside a runtime.
    pub fn new(
        config: ServerConfig,
        listener: std::net::TcpListener,
        launcher: L,
        shutdown: CancellationToken,
    ) -> io::Result<Self> {
        let listener = TcpListener::from_std(listener)?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            table: ConnectionTable::new(config.max_connections(), config.max_pending_bytes),
            queue: MatchmakingQueue::new(config.players_per_match),
            supervisor: MatchSupervisor::new(launcher, config.spawn_retry_delay),
            buffer: ReadBuffer::with_capacity(config.max_data_size),
            listener: Some(listener),
            local_addr,
            shutdown,
            stats: ServerStats::default(),
            config,
        })
    }

    /// Validates `config` and binds its address.
    pub fn bind(
        config: ServerConfig,
        launcher: L,
        shutdown: CancellationToken,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let listener = bind_listener(config.host.as_deref(), config.port, config.backlog)?;
        Ok(Self::new(config, listener, launcher, shutdown)?)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Connections currently waiting for a match, oldest first.
    pub fn waiting(&self) -> Vec<ConnectionId> {
        self.queue.iter().copied().collect()
    }

    /// Connections in the table plus seats held by running matches.
    pub fn occupied_slots(&self) -> usize {
        self.table.len() + self.supervisor.seats_in_use()
    }

    fn has_capacity(&self) -> bool {
        self.occupied_slots() < self.config.max_connections()
    }

    /// Runs until the shutdown token is cancelled, then drains.
    pub async fn run(mut self) -> ServerStats {
        info!(
            "Matchmaking on {} ({} players per match, up to {} matches)",
            self.local_addr, self.config.players_per_match, self.config.max_matches
        );

        while !self.shutdown.is_cancelled() {
            self.turn().await;
        }

        self.drain().await;
        self.stats
    }

    /// One pass of the loop: wait, accept, read, reap, launch.
    async fn turn(&mut self) {
        let ready = Self::wait_for_readiness(
            self.listener.as_ref(),
            &self.table,
            self.config.poll_timeout,
        )
        .await;

        if let Some(accepted) = ready.accepted {
            self.handle_accept(accepted);
        }

        for id in ready.readable {
            self.service(id);
        }

        for finished in self.supervisor.reap() {
            debug!("Match {} released its seats", finished);
            self.stats.workers_reaped += 1;
        }

        self.form_matches();
    }

    /// Waits until the listener or at least one client is ready, or `timeout`
    /// elapses. A ready listener yields one accepted connection.
    async fn wait_for_readiness(
        listener: Option<&TcpListener>,
        table: &ConnectionTable<TcpStream>,
        timeout: Duration,
    ) -> Readiness {
        let wait = poll_fn(|cx| {
            let accepted = match listener.map(|l| l.poll_accept(cx)) {
                Some(Poll::Ready(result)) => Some(result),
                _ => None,
            };

            // Errors count as readable; the next read reports them.
            let mut readable: Vec<ConnectionId> = table
                .iter()
                .filter(|(_, connection)| connection.stream.poll_read_ready(cx).is_ready())
                .map(|(id, _)| *id)
                .collect();

            if accepted.is_none() && readable.is_empty() {
                return Poll::Pending;
            }
            readable.sort_unstable();
            Poll::Ready(Readiness { accepted, readable })
        });

        tokio::time::timeout(timeout, wait).await.unwrap_or_default()
    }

    fn handle_accept(&mut self, accepted: io::Result<(TcpStream, SocketAddr)>) {
        let (stream, addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!("Accept failed: {}", e);
                self.stats.accept_failures += 1;
                return;
            }
        };

        if !self.has_capacity() {
            info!("Refusing connection from {}: server full", addr);
            self.stats.rejected += 1;
            return;
        }

        match self.table.admit(stream, addr) {
            Some(id) => {
                self.stats.accepted += 1;
                self.queue.enqueue(id);
                debug!("Connection {} is waiting, {} in queue", id, self.queue.len());
            }
            None => {
                info!("Refusing connection from {}: table full", addr);
                self.stats.rejected += 1;
            }
        }
    }

    /// Reads once from a ready connection and routes the result.
    fn service(&mut self, id: ConnectionId) {
        let Some(connection) = self.table.get(id) else {
            return;
        };
        let stream = &connection.stream;
        let outcome = self.buffer.read_with(|buf| stream.try_read(buf));

        match outcome {
            ReadOutcome::Data(n) => {
                if let Some(connection) = self.table.get_mut(id) {
                    connection.deliver(self.buffer.filled());
                    debug!("Connection {} sent {} bytes while waiting", id, n);
                }
            }
            ReadOutcome::Closed => {
                info!("Connection {} closed by peer", id);
                self.stats.peer_closed += 1;
                self.forget(id);
            }
            ReadOutcome::Failed(e) => {
                warn!("Read from connection {} failed: {}", id, e);
                self.stats.read_failures += 1;
                self.forget(id);
            }
            ReadOutcome::WouldBlock => {}
        }
    }

    fn forget(&mut self, id: ConnectionId) {
        self.queue.remove(id);
        self.table.close(id);
    }

    /// Launches matches until the queue runs short or a launch fails.
    fn form_matches(&mut self) {
        while self.supervisor.can_launch() {
            let formed = match self.queue.try_form_match(&mut self.table) {
                Some(formed) => formed,
                None => break,
            };
            self.stats.matches_formed += 1;

            let players = self.table.detach(formed.players());
            let handoff = Handoff::new(formed, players);

            match self.supervisor.launch(handoff) {
                Ok(()) => self.stats.matches_launched += 1,
                Err(failure) => {
                    self.stats.spawn_failures += 1;
                    error!(
                        "Match {} could not be launched: {}",
                        failure.handoff.match_id(),
                        failure.error
                    );
                    self.requeue(failure.handoff);
                    break;
                }
            }
        }
    }

    /// Returns the connections of a failed hand-off to the back of the queue.
    fn requeue(&mut self, handoff: Handoff) {
        for connection in handoff.players {
            match self.table.restore(connection) {
                Ok(id) => {
                    self.queue.enqueue(id);
                }
                Err(connection) => {
                    warn!("No room to restore connection {}, closing it", connection.id);
                }
            }
        }
    }

    async fn drain(&mut self) {
        info!("Draining: closing listener on {}", self.local_addr);
        self.listener = None;

        let waiting = self.table.close_all();
        if !waiting.is_empty() {
            info!("Closing {} waiting connection(s)", waiting.len());
        }
        drop(waiting);
        self.queue = MatchmakingQueue::new(self.config.players_per_match);

        let running = self.supervisor.live_workers();
        if running > 0 {
            debug!("{} match worker(s) still running", running);
        }
        self.supervisor.drain(self.config.drain_grace).await;
        info!(
            "Server stopped: {} accepted, {} rejected, {} matches launched",
            self.stats.accepted, self.stats.rejected, self.stats.matches_launched
        );
    }
}
