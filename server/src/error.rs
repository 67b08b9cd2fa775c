//! Error taxonomy for the matchmaking server
//!
//! Only [`BindFailure`] and [`ConfigError`] are fatal; they surface before the
//! event loop starts. Everything that can go wrong afterwards is local to one
//! connection or one match and is logged where it happens.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Step of listener setup that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStage {
    Resolve,
    Create,
    SetOptions,
    Bind,
    Listen,
}

impl fmt::Display for BindStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BindStage::Resolve => "resolve",
            BindStage::Create => "create",
            BindStage::SetOptions => "set-options",
            BindStage::Bind => "bind",
            BindStage::Listen => "listen",
        };
        f.write_str(name)
    }
}

/// No candidate address produced a listening socket.
#[derive(Debug, Error)]
#[error("{stage} error{}: {source}", location(.address))]
pub struct BindFailure {
    pub stage: BindStage,
    pub address: Option<SocketAddr>,
    #[source]
    pub source: io::Error,
}

fn location(address: &Option<SocketAddr>) -> String {
    address.map(|a| format!(" on {}", a)).unwrap_or_default()
}

impl BindFailure {
    pub fn new(stage: BindStage, address: Option<SocketAddr>, source: io::Error) -> Self {
        Self {
            stage,
            address,
            source,
        }
    }
}

/// A match worker could not be brought up.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to start match worker: {0}")]
    Process(#[source] io::Error),
    #[error("failed to encode match assignment: {0}")]
    Encode(#[from] bincode::Error),
    #[error("failed to deliver match assignment to worker: {0}")]
    Assignment(#[source] io::Error),
    #[error("match worker rejected by launcher: {0}")]
    Rejected(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("players per match must be at least 2 (got {0})")]
    PlayersPerMatch(usize),
    #[error("max matches must be at least 1")]
    MaxMatches,
    #[error("poll timeout must be non-zero")]
    PollTimeout,
    #[error("max data size must be non-zero")]
    MaxDataSize,
    #[error("listen backlog must be positive (got {0})")]
    Backlog(i32),
    #[error(
        "max matches × players per match must be at most {limit} \
         (got {max_matches} × {players_per_match})"
    )]
    TooManyConnections {
        max_matches: usize,
        players_per_match: usize,
        limit: usize,
    },
    #[error(
        "{players_per_match} seats of {max_pending_bytes} pending bytes do not fit \
         in a {limit}-byte match assignment"
    )]
    AssignmentTooLarge {
        players_per_match: usize,
        max_pending_bytes: usize,
        limit: usize,
    },
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Bind(#[from] BindFailure),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
