//! Match session run by a worker once it owns the players' sockets
//!
//! The session greets every seat, replays what each player sent while
//! waiting to the other seats, then relays bytes between seats until one of
//! them disconnects. It does not interpret the bytes.

use log::{debug, info, warn};
use shared::greeting;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// A player's socket together with anything it sent before the match formed.
#[derive(Debug)]
pub struct SessionPlayer {
    pub peer: String,
    pub stream: TcpStream,
    pub preamble: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Seat (1-based) whose peer closed or failed first.
    SeatLeft(usize),
    /// A write to the given seat failed.
    SeatUnreachable(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub match_id: u64,
    pub relayed_bytes: u64,
    pub end: SessionEnd,
}

enum SeatEvent {
    Data { seat: usize, bytes: Vec<u8> },
    Left { seat: usize },
}

/// Runs one session to completion and closes every seat.
pub async fn run_session(
    match_id: u64,
    players: Vec<SessionPlayer>,
    max_data_size: usize,
) -> SessionSummary {
    let seats = players.len();
    let (events_tx, mut events_rx) = mpsc::channel::<SeatEvent>(seats.max(1) * 4);
    let mut readers = JoinSet::new();
    let mut writers: Vec<OwnedWriteHalf> = Vec::with_capacity(seats);
    let mut preambles = Vec::with_capacity(seats);

    for (index, player) in players.into_iter().enumerate() {
        let seat = index + 1;
        debug!("Match {} seat {} is {}", match_id, seat, player.peer);
        let (reader, writer) = player.stream.into_split();
        readers.spawn(pump_seat(seat, reader, events_tx.clone(), max_data_size));
        writers.push(writer);
        preambles.push(player.preamble);
    }
    drop(events_tx);

    info!("Match {} started with {} seats", match_id, seats);

    let mut relayed_bytes = 0u64;
    let end = 'session: {
        for (index, writer) in writers.iter_mut().enumerate() {
            let line = greeting(match_id, index + 1, seats);
            if writer.write_all(line.as_bytes()).await.is_err() {
                break 'session SessionEnd::SeatUnreachable(index + 1);
            }
        }

        for (index, preamble) in preambles.iter().enumerate() {
            if preamble.is_empty() {
                continue;
            }
            if let Err(seat) = broadcast(&mut writers, index + 1, preamble).await {
                break 'session SessionEnd::SeatUnreachable(seat);
            }
            relayed_bytes += preamble.len() as u64;
        }

        loop {
            match events_rx.recv().await {
                Some(SeatEvent::Data { seat, bytes }) => {
                    if let Err(unreachable) = broadcast(&mut writers, seat, &bytes).await {
                        break 'session SessionEnd::SeatUnreachable(unreachable);
                    }
                    relayed_bytes += bytes.len() as u64;
                }
                Some(SeatEvent::Left { seat }) => break 'session SessionEnd::SeatLeft(seat),
                // Every pump has exited without reporting, which only happens
                // if the session has no seats.
                None => break 'session SessionEnd::SeatLeft(0),
            }
        }
    };

    readers.abort_all();
    for writer in &mut writers {
        let _ = writer.shutdown().await;
    }

    info!(
        "Match {} ended ({:?}), relayed {} bytes",
        match_id, end, relayed_bytes
    );

    SessionSummary {
        match_id,
        relayed_bytes,
        end,
    }
}

/// Writes `bytes` to every seat except `from`. Returns the first seat that failed.
async fn broadcast(
    writers: &mut [OwnedWriteHalf],
    from: usize,
    bytes: &[u8],
) -> Result<(), usize> {
    for (index, writer) in writers.iter_mut().enumerate() {
        let seat = index + 1;
        if seat == from {
            continue;
        }
        if let Err(e) = writer.write_all(bytes).await {
            warn!("Write to seat {} failed: {}", seat, e);
            return Err(seat);
        }
    }
    Ok(())
}

async fn pump_seat(
    seat: usize,
    mut reader: OwnedReadHalf,
    events: mpsc::Sender<SeatEvent>,
    max_data_size: usize,
) {
    let mut buffer = vec![0u8; max_data_size.max(1)];

    loop {
        let event = match reader.read(&mut buffer).await {
            Ok(0) => SeatEvent::Left { seat },
            Ok(n) => SeatEvent::Data {
                seat,
                bytes: buffer[..n].to_vec(),
            },
            Err(e) => {
                debug!("Seat {} read failed: {}", seat, e);
                SeatEvent::Left { seat }
            }
        };

        let left = matches!(event, SeatEvent::Left { .. });
        if events.send(event).await.is_err() || left {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    async fn socket_pair(listener: &TcpListener) -> (TcpStream, TcpStream) {
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    async fn read_line(stream: &mut BufReader<TcpStream>) -> String {
        let mut line = String::new();
        stream.read_line(&mut line).await.unwrap();
        line
    }

    #[tokio::test]
    async fn test_session_greets_replays_and_relays() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (alice, alice_server) = socket_pair(&listener).await;
        let (bob, bob_server) = socket_pair(&listener).await;

        let players = vec![
            SessionPlayer {
                peer: "alice".into(),
                stream: alice_server,
                preamble: b"early\n".to_vec(),
            },
            SessionPlayer {
                peer: "bob".into(),
                stream: bob_server,
                preamble: Vec::new(),
            },
        ];
        let session = tokio::spawn(run_session(5, players, 64));

        let mut alice = BufReader::new(alice);
        let mut bob = BufReader::new(bob);

        assert_eq!(read_line(&mut alice).await, "MATCH 5 SEAT 1/2\n");
        assert_eq!(read_line(&mut bob).await, "MATCH 5 SEAT 2/2\n");
        assert_eq!(read_line(&mut bob).await, "early\n");

        bob.get_mut().write_all(b"e2e4\n").await.unwrap();
        assert_eq!(read_line(&mut alice).await, "e2e4\n");

        drop(bob);

        let summary = session.await.unwrap();
        assert_eq!(summary.match_id, 5);
        assert_eq!(summary.end, SessionEnd::SeatLeft(2));
        assert_eq!(summary.relayed_bytes, 11);

        // The remaining seat is closed by the session.
        let mut rest = Vec::new();
        alice.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
