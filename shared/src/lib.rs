use serde::{Deserialize, Serialize};
use std::io::Read;

pub const DEFAULT_PORT: u16 = 3490;
pub const DEFAULT_BACKLOG: i32 = 10;
pub const DEFAULT_PLAYERS_PER_MATCH: usize = 2;
pub const DEFAULT_MAX_MATCHES: usize = 8;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;
pub const DEFAULT_MAX_DATA_SIZE: usize = 1024;
pub const DEFAULT_MAX_PENDING_BYTES: usize = 4 * DEFAULT_MAX_DATA_SIZE;
pub const DEFAULT_SPAWN_RETRY_MS: u64 = 1000;
pub const DEFAULT_DRAIN_GRACE_MS: u64 = 2000;

/// Ports below this are refused by the terminal client.
pub const MIN_CLIENT_PORT: u16 = 1024;

/// Everything a match worker needs to run one session on its own.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MatchAssignment {
    pub match_id: u64,
    pub seats: Vec<Seat>,
}

/// One player's socket as seen by the worker.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Seat {
    pub connection_id: u64,
    /// Descriptor number inherited from the server process.
    pub fd: i32,
    pub peer_addr: String,
    /// Bytes the player sent before the match was formed.
    pub preamble: Vec<u8>,
}

impl MatchAssignment {
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Reads an assignment from a pipe; the writer closes its end when done.
    pub fn read_from<R: Read>(reader: R) -> Result<Self, bincode::Error> {
        bincode::deserialize_from(reader)
    }
}

/// The line a worker sends each seat once the session starts.
///
/// Seats are numbered from 1 in match order.
pub fn greeting(match_id: u64, seat: usize, seats: usize) -> String {
    format!("MATCH {} SEAT {}/{}\n", match_id, seat, seats)
}

/// Parsed form of [`greeting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchGreeting {
    pub match_id: u64,
    pub seat: usize,
    pub seats: usize,
}

pub fn parse_greeting(line: &str) -> Option<MatchGreeting> {
    let mut parts = line.trim_end().split(' ');
    if parts.next()? != "MATCH" {
        return None;
    }
    let match_id = parts.next()?.parse().ok()?;
    if parts.next()? != "SEAT" {
        return None;
    }
    let (seat, seats) = parts.next()?.split_once('/')?;
    if parts.next().is_some() {
        return None;
    }

    let seat: usize = seat.parse().ok()?;
    let seats: usize = seats.parse().ok()?;
    if seat == 0 || seat > seats {
        return None;
    }

    Some(MatchGreeting {
        match_id,
        seat,
        seats,
    })
}
