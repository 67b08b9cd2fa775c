//! Stand-alone match executable started by the server's process launcher.
//!
//! Reads a bincode `MatchAssignment` from stdin, adopts the inherited player
//! sockets and runs the relay session until a player leaves.

use clap::Parser;
use log::info;
use server::session::{run_session, SessionPlayer};
use shared::{MatchAssignment, DEFAULT_MAX_DATA_SIZE};
use std::io::Write;
use std::os::fd::FromRawFd;
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Match id, also given in the assignment; used for log lines
    #[arg(long)]
    match_id: u64,

    /// Bytes read from a player at a time
    #[arg(long, default_value_t = DEFAULT_MAX_DATA_SIZE)]
    max_data_size: usize,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let match_id = args.match_id;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(move |buf, record| {
            writeln!(buf, "[match {} {}] {}", match_id, record.level(), record.args())
        })
        .init();

    let assignment = MatchAssignment::read_from(std::io::stdin().lock())?;
    if assignment.match_id != args.match_id {
        return Err(format!(
            "assignment is for match {}, started as match {}",
            assignment.match_id, args.match_id
        )
        .into());
    }

    let mut players = Vec::with_capacity(assignment.seats.len());
    for seat in assignment.seats {
        // SAFETY: the server cleared close-on-exec on exactly these
        // descriptors for this process and closed its own copies; nothing
        // else here owns them.
        let stream = unsafe { std::net::TcpStream::from_raw_fd(seat.fd) };
        stream.set_nonblocking(true)?;
        players.push(SessionPlayer {
            peer: seat.peer_addr,
            stream: TcpStream::from_std(stream)?,
            preamble: seat.preamble,
        });
    }

    info!("Worker {} running with {} seats", std::process::id(), players.len());
    let summary = run_session(assignment.match_id, players, args.max_data_size).await;
    info!("Session finished: {:?}", summary);

    Ok(())
}
