//! Server tuning knobs and their defaults

use crate::error::ConfigError;
use shared::{
    DEFAULT_BACKLOG, DEFAULT_DRAIN_GRACE_MS, DEFAULT_MAX_DATA_SIZE, DEFAULT_MAX_MATCHES,
    DEFAULT_MAX_PENDING_BYTES, DEFAULT_PLAYERS_PER_MATCH, DEFAULT_PORT, DEFAULT_SPAWN_RETRY_MS,
    DEFAULT_TIMEOUT_MS,
};
use std::time::Duration;

/// Ceiling on `max_matches × players_per_match`.
pub const MAX_CONNECTIONS_LIMIT: usize = 65_536;

/// Ceiling on an encoded match assignment. It is written to a fresh pipe in
/// one go, so it has to fit the smallest pipe buffer a worker may get.
pub const MAX_ASSIGNMENT_BYTES: usize = 32 * 1024;

/// Encoded size of one seat apart from its preamble, with the longest
/// possible peer address.
const SEAT_OVERHEAD_BYTES: usize = 128;
const ASSIGNMENT_HEADER_BYTES: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind; `None` binds the wildcard address.
    pub host: Option<String>,
    pub port: u16,
    pub backlog: i32,
    pub players_per_match: usize,
    pub max_matches: usize,
    /// Upper bound on a single readiness wait, and so on run-flag latency.
    pub poll_timeout: Duration,
    /// Size of the per-read buffer.
    pub max_data_size: usize,
    /// Bytes kept per waiting connection for forwarding at hand-off.
    pub max_pending_bytes: usize,
    pub spawn_retry_delay: Duration,
    pub drain_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
            players_per_match: DEFAULT_PLAYERS_PER_MATCH,
            max_matches: DEFAULT_MAX_MATCHES,
            poll_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_data_size: DEFAULT_MAX_DATA_SIZE,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
            spawn_retry_delay: Duration::from_millis(DEFAULT_SPAWN_RETRY_MS),
            drain_grace: Duration::from_millis(DEFAULT_DRAIN_GRACE_MS),
        }
    }
}

impl ServerConfig {
    /// Total player slots: waiting connections plus seats held by live matches.
    pub fn max_connections(&self) -> usize {
        self.max_matches.saturating_mul(self.players_per_match)
    }

    /// Worst-case size of the assignment handed to a worker process, or
    /// `None` if it does not even fit in a `usize`.
    pub fn assignment_bytes(&self) -> Option<usize> {
        self.max_pending_bytes
            .checked_add(SEAT_OVERHEAD_BYTES)?
            .checked_mul(self.players_per_match)?
            .checked_add(ASSIGNMENT_HEADER_BYTES)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.players_per_match < 2 {
            return Err(ConfigError::PlayersPerMatch(self.players_per_match));
        }
        if self.max_matches == 0 {
            return Err(ConfigError::MaxMatches);
        }
        if self.poll_timeout.is_zero() {
            return Err(ConfigError::PollTimeout);
        }
        if self.max_data_size == 0 {
            return Err(ConfigError::MaxDataSize);
        }
        if self.backlog <= 0 {
            return Err(ConfigError::Backlog(self.backlog));
        }

        let slots = self.max_matches.checked_mul(self.players_per_match);
        if slots.map_or(true, |n| n > MAX_CONNECTIONS_LIMIT) {
            return Err(ConfigError::TooManyConnections {
                max_matches: self.max_matches,
                players_per_match: self.players_per_match,
                limit: MAX_CONNECTIONS_LIMIT,
            });
        }
        if self
            .assignment_bytes()
            .map_or(true, |n| n > MAX_ASSIGNMENT_BYTES)
        {
            return Err(ConfigError::AssignmentTooLarge {
                players_per_match: self.players_per_match,
                max_pending_bytes: self.max_pending_bytes,
                limit: MAX_ASSIGNMENT_BYTES,
            });
        }
        Ok(())
    }
}
