use clap::{Parser, ValueEnum};
use log::{error, info, warn};
use server::config::ServerConfig;
use server::listener::bind_listener;
use server::network::Server;
use server::shutdown::ShutdownCoordinator;
use server::supervisor::{MatchLauncher, ProcessLauncher, TaskLauncher};
use shared::{
    DEFAULT_BACKLOG, DEFAULT_DRAIN_GRACE_MS, DEFAULT_MAX_DATA_SIZE, DEFAULT_MAX_MATCHES,
    DEFAULT_MAX_PENDING_BYTES, DEFAULT_PLAYERS_PER_MATCH, DEFAULT_PORT, DEFAULT_SPAWN_RETRY_MS,
    DEFAULT_TIMEOUT_MS,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Isolation {
    /// Run each match in a separate match-worker process
    Process,
    /// Run each match as a task inside the server
    Task,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind (all interfaces when omitted)
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(long, default_value_t = DEFAULT_PLAYERS_PER_MATCH)]
    players_per_match: usize,

    /// Matches allowed to run at once
    #[arg(long, default_value_t = DEFAULT_MAX_MATCHES)]
    max_matches: usize,

    /// Longest single wait of the event loop, in milliseconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Bytes read from a client at a time
    #[arg(long, default_value_t = DEFAULT_MAX_DATA_SIZE)]
    max_data_size: usize,

    /// Bytes kept per waiting client until its match starts
    #[arg(long, default_value_t = DEFAULT_MAX_PENDING_BYTES)]
    max_pending_bytes: usize,

    #[arg(long, default_value_t = DEFAULT_BACKLOG)]
    backlog: i32,

    /// Pause after a worker fails to start, in milliseconds
    #[arg(long, default_value_t = DEFAULT_SPAWN_RETRY_MS)]
    spawn_retry_ms: u64,

    /// Time in-process sessions get to finish at shutdown, in milliseconds
    #[arg(long, default_value_t = DEFAULT_DRAIN_GRACE_MS)]
    drain_grace_ms: u64,

    #[arg(long, value_enum, default_value_t = Isolation::Process)]
    isolation: Isolation,

    /// Match worker executable (defaults to match-worker next to this binary)
    #[arg(long)]
    worker: Option<PathBuf>,
}

impl Args {
    fn config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            backlog: self.backlog,
            players_per_match: self.players_per_match,
            max_matches: self.max_matches,
            poll_timeout: Duration::from_millis(self.timeout_ms),
            max_data_size: self.max_data_size,
            max_pending_bytes: self.max_pending_bytes,
            spawn_retry_delay: Duration::from_millis(self.spawn_retry_ms),
            drain_grace: Duration::from_millis(self.drain_grace_ms),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.config();

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        eprintln!("server: {}", e);
        return ExitCode::from(2);
    }

    // Handlers go in before the socket exists so no signal is missed.
    let shutdown = ShutdownCoordinator::new();
    if let Err(e) = shutdown.listen_for_signals() {
        error!("Could not install signal handlers: {}", e);
        return ExitCode::FAILURE;
    }

    let listener = match bind_listener(config.host.as_deref(), config.port, config.backlog) {
        Ok(listener) => listener,
        Err(failure) => {
            eprintln!("server: {}", failure);
            return ExitCode::from(1);
        }
    };

    let result = match args.isolation {
        Isolation::Process => {
            let program = match args.worker.clone() {
                Some(program) => program,
                None => match ProcessLauncher::default_program() {
                    Ok(program) => program,
                    Err(e) => {
                        error!("Could not locate match-worker: {}", e);
                        return ExitCode::FAILURE;
                    }
                },
            };
            if !program.exists() {
                warn!("Match worker {} does not exist yet", program.display());
            }
            info!("Matches run in worker processes ({})", program.display());
            let launcher = ProcessLauncher::new(program).with_max_data_size(config.max_data_size);
            serve(config, listener, launcher, shutdown.token()).await
        }
        Isolation::Task => {
            info!("Matches run as in-process tasks");
            let launcher = TaskLauncher::new(config.max_data_size);
            serve(config, listener, launcher, shutdown.token()).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Server failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn serve<L: MatchLauncher>(
    config: ServerConfig,
    listener: std::net::TcpListener,
    launcher: L,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let server = Server::new(config, listener, launcher, shutdown)?;
    let stats = server.run().await;
    info!("Final stats: {:?}", stats);
    Ok(())
}
