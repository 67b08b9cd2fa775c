use clap::Parser;
use client::network::Client;
use log::info;
use shared::{DEFAULT_PORT, MIN_CLIENT_PORT};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(
        short,
        long,
        default_value_t = DEFAULT_PORT,
        value_parser = clap::value_parser!(u16).range(MIN_CLIENT_PORT as i64..)
    )]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Connecting to {}:{}", args.host, args.port);
    let mut client = Client::connect(&args.host, args.port).await?;

    eprintln!("Waiting for an opponent...");
    let greeting = client.wait_for_match().await?;
    eprintln!(
        "Match {} started, you are seat {} of {}",
        greeting.match_id, greeting.seat, greeting.seats
    );

    client.run(tokio::io::stdin(), tokio::io::stdout()).await?;

    // The stdin reader may still be parked on a blocking read.
    std::process::exit(0);
}
