//! Connection registry for the matchmaking server
//!
//! This module owns every accepted client link that has not yet left the
//! server, including:
//! - Admission against a fixed capacity
//! - Explicit state transitions (Waiting, Paired, Closed)
//! - Buffering of bytes received before a match is formed
//! - Detaching paired connections for hand-off and restoring them on failure
//!
//! Connections are indexed by a [`ConnectionId`] drawn from the acceptance
//! sequence, so ids double as the arrival order used for matchmaking.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Process-unique handle for an accepted connection.
///
/// Ids increase with every accept and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, not yet selected into a match.
    Waiting,
    /// Selected into a match, hand-off pending.
    Paired,
    /// Terminal. No further I/O.
    Closed,
}

/// One accepted client link
///
/// The stream type is generic so the table logic can be exercised without
/// sockets; the server instantiates it with `tokio::net::TcpStream`.
#[derive(Debug)]
pub struct Connection<S> {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    pub state: ConnectionState,
    pub accepted_at: Instant,
    pub stream: S,
    preamble: Vec<u8>,
    preamble_limit: usize,
    discarded: usize,
}

impl<S> Connection<S> {
    pub fn new(id: ConnectionId, addr: SocketAddr, stream: S, preamble_limit: usize) -> Self {
        Self {
            id,
            addr,
            state: ConnectionState::Waiting,
            accepted_at: Instant::now(),
            stream,
            preamble: Vec::new(),
            preamble_limit,
            discarded: 0,
        }
    }

    /// Hands bytes read from the peer to whoever currently owns the link
    ///
    /// Before hand-off the owner is the matchmaking side, which keeps the
    /// bytes so the match worker can replay them. Anything past the preamble
    /// limit is discarded. Returns the number of bytes kept.
    pub fn deliver(&mut self, bytes: &[u8]) -> usize {
        let room = self.preamble_limit.saturating_sub(self.preamble.len());
        let kept = bytes.len().min(room);
        self.preamble.extend_from_slice(&bytes[..kept]);

        let dropped = bytes.len() - kept;
        if dropped > 0 {
            if self.discarded == 0 {
                warn!(
                    "Connection {} exceeded {} pending bytes, discarding the excess",
                    self.id, self.preamble_limit
                );
            }
            self.discarded += dropped;
        }
        kept
    }

    /// Bytes received so far and not yet forwarded.
    pub fn preamble(&self) -> &[u8] {
        &self.preamble
    }

    pub fn take_preamble(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.preamble)
    }

    /// Number of bytes dropped because the preamble was full.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    pub fn is_waiting(&self) -> bool {
        self.state == ConnectionState::Waiting
    }

    /// Time since the connection was accepted.
    pub fn waited(&self) -> Duration {
        self.accepted_at.elapsed()
    }
}

/// Bounded registry of live connections
///
/// The table never holds more than `capacity` entries. Connections leave it
/// either by closing (peer hang-up, read error, shutdown) or by being
/// detached for hand-off to a match worker.
pub struct ConnectionTable<S> {
    connections: HashMap<ConnectionId, Connection<S>>,
    next_id: u64,
    capacity: usize,
    preamble_limit: usize,
}

impl<S> ConnectionTable<S> {
    /// Creates an empty table
    ///
    /// Ids start from 1 and increment for each admitted connection.
    pub fn new(capacity: usize, preamble_limit: usize) -> Self {
        Self {
            connections: HashMap::new(),
            next_id: 1,
            capacity,
            preamble_limit,
        }
    }

    /// Registers a freshly accepted stream as Waiting
    ///
    /// Returns `None` when the table is full; the stream is dropped, which
    /// closes it, so the peer is refused rather than left idle.
    pub fn admit(&mut self, stream: S, addr: SocketAddr) -> Option<ConnectionId> {
        if self.is_full() {
            return None;
        }

        let id = ConnectionId(self.next_id);
        self.next_id += 1;

        let connection = Connection::new(id, addr, stream, self.preamble_limit);
        info!("Connection {} admitted from {}", id, addr);
        self.connections.insert(id, connection);

        Some(id)
    }

    /// Closes a connection and removes it from the table
    ///
    /// Returns the closed connection so the caller decides when its stream
    /// is dropped, or `None` if it was already gone.
    pub fn close(&mut self, id: ConnectionId) -> Option<Connection<S>> {
        let mut connection = self.connections.remove(&id)?;
        connection.state = ConnectionState::Closed;
        debug!(
            "Connection {} from {} closed after {:.1?}",
            id,
            connection.addr,
            connection.waited()
        );
        Some(connection)
    }

    /// Marks a Waiting connection as Paired. Returns false if it is not Waiting.
    pub fn pair(&mut self, id: ConnectionId) -> bool {
        match self.connections.get_mut(&id) {
            Some(connection) if connection.is_waiting() => {
                connection.state = ConnectionState::Paired;
                true
            }
            _ => false,
        }
    }

    /// Takes Paired connections out of the table for hand-off, in the given order.
    ///
    /// Ids that are missing or not Paired are skipped.
    pub fn detach(&mut self, ids: &[ConnectionId]) -> Vec<Connection<S>> {
        let mut detached = Vec::with_capacity(ids.len());
        for id in ids {
            if self.state(*id) != Some(ConnectionState::Paired) {
                continue;
            }
            if let Some(connection) = self.connections.remove(id) {
                detached.push(connection);
            }
        }
        detached
    }

    /// Puts a connection back after a failed hand-off, as Waiting.
    ///
    /// Hands the connection back if there is no room for it.
    pub fn restore(&mut self, mut connection: Connection<S>) -> Result<ConnectionId, Connection<S>> {
        if self.is_full() || self.connections.contains_key(&connection.id) {
            return Err(connection);
        }

        connection.state = ConnectionState::Waiting;
        let id = connection.id;
        self.connections.insert(id, connection);
        Ok(id)
    }

    /// Removes every connection, oldest first, marking each Closed.
    pub fn close_all(&mut self) -> Vec<Connection<S>> {
        let mut all: Vec<Connection<S>> = self.connections.drain().map(|(_, c)| c).collect();
        all.sort_by_key(|c| c.id);
        for connection in &mut all {
            connection.state = ConnectionState::Closed;
        }
        all
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection<S>> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection<S>> {
        self.connections.get_mut(&id)
    }

    pub fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.connections.get(&id).map(|c| c.state)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConnectionId, &Connection<S>)> {
        self.connections.iter()
    }

    /// Returns the number of live connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns true if no connections are registered
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.capacity
    }

    pub fn waiting_count(&self) -> usize {
        self.connections.values().filter(|c| c.is_waiting()).count()
    }
}
