//! First-in-first-out matchmaking
//!
//! The queue holds the ids of Waiting connections in acceptance order. As soon
//! as it holds `players_per_match` of them, the oldest ones form a [`Match`].
//! There is no skill or preference logic.

use crate::connection_table::{ConnectionId, ConnectionTable};
use log::{debug, info};
use std::collections::VecDeque;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatchId(u64);

impl MatchId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fixed group of connections destined for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    id: MatchId,
    players: Vec<ConnectionId>,
}

impl Match {
    pub fn id(&self) -> MatchId {
        self.id
    }

    /// Players in seat order (oldest connection first).
    pub fn players(&self) -> &[ConnectionId] {
        &self.players
    }
}

pub struct MatchmakingQueue {
    waiting: VecDeque<ConnectionId>,
    players_per_match: usize,
    next_match_id: u64,
}

impl MatchmakingQueue {
    pub fn new(players_per_match: usize) -> Self {
        Self {
            waiting: VecDeque::new(),
            players_per_match,
            next_match_id: 1,
        }
    }

    /// Appends a connection to the back of the queue.
    ///
    /// Returns false if the id is already queued.
    pub fn enqueue(&mut self, id: ConnectionId) -> bool {
        if self.waiting.contains(&id) {
            return false;
        }
        self.waiting.push_back(id);
        true
    }

    /// Drops a connection from the queue, wherever it is.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        match self.position(id) {
            Some(index) => {
                self.waiting.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn position(&self, id: ConnectionId) -> Option<usize> {
        self.waiting.iter().position(|queued| *queued == id)
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    pub fn players_per_match(&self) -> usize {
        self.players_per_match
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionId> {
        self.waiting.iter()
    }

    /// Forms a match from the oldest waiting connections, if there are enough.
    ///
    /// Ids whose table entry is gone or no longer Waiting are purged first, so
    /// a match never references a closed connection. Selected connections are
    /// marked Paired in `table`.
    pub fn try_form_match<S>(&mut self, table: &mut ConnectionTable<S>) -> Option<Match> {
        let before = self.waiting.len();
        self.waiting
            .retain(|id| table.get(*id).map_or(false, |c| c.is_waiting()));
        if self.waiting.len() != before {
            debug!(
                "Purged {} stale entries from the matchmaking queue",
                before - self.waiting.len()
            );
        }

        if self.waiting.len() < self.players_per_match {
            return None;
        }

        let players: Vec<ConnectionId> = self.waiting.drain(..self.players_per_match).collect();
        for id in &players {
            table.pair(*id);
        }

        let id = MatchId(self.next_match_id);
        self.next_match_id += 1;
        info!("Match {} formed from connections {:?}", id, players);

        Some(Match { id, players })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_table::ConnectionState;
    use std::net::SocketAddr;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn admit_many(
        table: &mut ConnectionTable<()>,
        queue: &mut MatchmakingQueue,
        count: usize,
    ) -> Vec<ConnectionId> {
        (0..count)
            .map(|_| {
                let id = table.admit((), addr()).unwrap();
                assert!(queue.enqueue(id));
                id
            })
            .collect()
    }

    #[test]
    fn test_no_match_until_enough_players() {
        let mut table = ConnectionTable::new(8, 16);
        let mut queue = MatchmakingQueue::new(2);

        admit_many(&mut table, &mut queue, 1);
        assert!(queue.try_form_match(&mut table).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_fifo_pairing() {
        let mut table = ConnectionTable::new(8, 16);
        let mut queue = MatchmakingQueue::new(2);
        let ids = admit_many(&mut table, &mut queue, 3);

        let first = queue.try_form_match(&mut table).unwrap();
        assert_eq!(first.id().get(), 1);
        assert_eq!(first.players(), &ids[..2]);
        assert_eq!(table.state(ids[0]), Some(ConnectionState::Paired));
        assert_eq!(table.state(ids[1]), Some(ConnectionState::Paired));
        assert_eq!(table.state(ids[2]), Some(ConnectionState::Waiting));

        assert!(queue.try_form_match(&mut table).is_none());
        assert_eq!(queue.iter().copied().collect::<Vec<_>>(), vec![ids[2]]);

        let later = admit_many(&mut table, &mut queue, 1);
        let second = queue.try_form_match(&mut table).unwrap();
        assert_eq!(second.id().get(), 2);
        assert_eq!(second.players(), &[ids[2], later[0]]);
    }

    #[test]
    fn test_fifo_holds_for_every_adjacent_pair() {
        let mut table = ConnectionTable::new(64, 16);
        let mut queue = MatchmakingQueue::new(2);
        let ids = admit_many(&mut table, &mut queue, 20);

        for (k, chunk) in ids.chunks(2).enumerate() {
            let formed = queue.try_form_match(&mut table).unwrap();
            assert_eq!(formed.id().get(), k as u64 + 1);
            assert_eq!(formed.players(), chunk);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_larger_matches() {
        let mut table = ConnectionTable::new(8, 16);
        let mut queue = MatchmakingQueue::new(4);
        let ids = admit_many(&mut table, &mut queue, 5);

        let formed = queue.try_form_match(&mut table).unwrap();
        assert_eq!(formed.players(), &ids[..4]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_duplicate_enqueue_rejected() {
        let mut table = ConnectionTable::new(8, 16);
        let mut queue = MatchmakingQueue::new(2);
        let ids = admit_many(&mut table, &mut queue, 1);

        assert!(!queue.enqueue(ids[0]));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_removed_connection_never_matched() {
        let mut table = ConnectionTable::new(8, 16);
        let mut queue = MatchmakingQueue::new(2);
        let ids = admit_many(&mut table, &mut queue, 2);

        table.close(ids[0]);
        assert!(queue.remove(ids[0]));
        assert!(!queue.remove(ids[0]));
        assert!(queue.try_form_match(&mut table).is_none());

        let later = admit_many(&mut table, &mut queue, 1);
        let formed = queue.try_form_match(&mut table).unwrap();
        assert_eq!(formed.players(), &[ids[1], later[0]]);
    }

    #[test]
    fn test_closed_connection_purged_even_if_still_queued() {
        let mut table = ConnectionTable::new(8, 16);
        let mut queue = MatchmakingQueue::new(2);
        let ids = admit_many(&mut table, &mut queue, 3);

        // Closed in the table but never removed from the queue.
        table.close(ids[1]);

        let formed = queue.try_form_match(&mut table).unwrap();
        assert_eq!(formed.players(), &[ids[0], ids[2]]);
        assert!(!formed.players().contains(&ids[1]));
    }

    #[test]
    fn test_position_tracks_arrival_order() {
        let mut table = ConnectionTable::new(8, 16);
        let mut queue = MatchmakingQueue::new(3);
        let ids = admit_many(&mut table, &mut queue, 3);

        assert_eq!(queue.position(ids[0]), Some(0));
        assert_eq!(queue.position(ids[2]), Some(2));

        queue.remove(ids[0]);
        assert_eq!(queue.position(ids[2]), Some(1));
        assert_eq!(queue.players_per_match(), 3);
    }
}
