//! # Matchmaking Client Library
//!
//! A terminal client for the matchmaking server. It connects, waits for the
//! line announcing its match and seat, and then behaves like a plain pipe:
//! whatever is typed goes to the other players, whatever they send is
//! printed.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! - Connecting to the server
//! - Waiting for and parsing the match greeting
//! - Relaying between local input/output and the match
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::connect("127.0.0.1", 3490).await?;
//!     let greeting = client.wait_for_match().await?;
//!     println!("Seat {} of {}", greeting.seat, greeting.seats);
//!
//!     client.run(tokio::io::stdin(), tokio::io::stdout()).await?;
//!     Ok(())
//! }
//! ```

pub mod network;
