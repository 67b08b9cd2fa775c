//! # Matchmaking Server Library
//!
//! This library implements a connection server for turn-based two-player (or
//! larger) games. It accepts player connections, holds them until enough have
//! arrived to fill a match, and then hands each complete match to an isolated
//! worker that owns the players' sockets from then on.
//!
//! ## Core Responsibilities
//!
//! ### Bounded Admission
//! The server never holds more than `max_matches × players_per_match` player
//! slots. Slots are occupied by waiting connections and by seats of matches
//! that are still running. A connection that arrives while every slot is taken
//! is accepted and closed straight away, so the peer learns it was refused.
//!
//! ### Matchmaking
//! Waiting connections are grouped strictly in arrival order. There is no
//! rating, region or preference logic.
//!
//! ### Hand-off
//! A formed match is given to a worker, either a separate `match-worker`
//! process that inherits the sockets or a task on the server's runtime. If the
//! worker cannot be started the players go back to the queue.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! One task owns the listener, every waiting connection and the queue. Each
//! turn waits, with a bounded timeout, for the listener or any client to become
//! ready. Nothing is shared with workers and nothing needs a lock.
//!
//! ### Cooperative Shutdown
//! SIGINT and SIGTERM cancel a token. The loop checks it once per turn, closes
//! the listener and every waiting connection, and returns. Worker processes
//! are left to finish their matches.
//!
//! ## Module Organization
//!
//! ### Listener Module (`listener`)
//! Resolves the bind address and builds a reusable, non-blocking listening
//! socket, reporting which setup stage failed.
//!
//! ### Connection Table Module (`connection_table`)
//! Capacity-bounded registry of accepted connections and their states:
//! - Admission and id assignment
//! - Waiting, Paired and Closed transitions
//! - Buffering of bytes sent before a match forms
//!
//! ### Matchmaking Module (`matchmaking`)
//! FIFO queue of waiting connections and match formation.
//!
//! ### Supervisor Module (`supervisor`)
//! Launchers for process and task workers, retry back-off and reaping.
//!
//! ### Session Module (`session`)
//! The relay run by a worker once it owns a match's sockets.
//!
//! ### Network Module (`network`)
//! The event loop tying the other modules together.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use server::shutdown::ShutdownCoordinator;
//! use server::supervisor::TaskLauncher;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let shutdown = ShutdownCoordinator::new();
//!     shutdown.listen_for_signals()?;
//!
//!     // Sessions run as tasks on this runtime
//!     let launcher = TaskLauncher::new(config.max_data_size);
//!     let server = Server::bind(config, launcher, shutdown.token())?;
//!
//!     let stats = server.run().await;
//!     println!("{} matches played", stats.matches_launched);
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod connection_table;
pub mod error;
pub mod listener;
pub mod matchmaking;
pub mod network;
pub mod session;
pub mod shutdown;
pub mod supervisor;
