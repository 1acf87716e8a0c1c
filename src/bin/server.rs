use clap::Parser;
use respkv::config::{self, Config};
use respkv::db::Db;
use respkv::persistence::Snapshot;
use respkv::server::Server;
use respkv::store::Store;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_TICK_MS: u64 = config::DEFAULT_TICK.as_millis() as u64;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// The port to listen on
    #[arg(short, long, env = "RESPKV_PORT", default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// The address to bind to
    #[arg(short, long, env = "RESPKV_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Maximum number of keys held at once
    #[arg(short, long, env = "RESPKV_CAPACITY", default_value_t = config::DEFAULT_CAPACITY)]
    capacity: usize,

    /// File loaded at startup and appended to by SAVE
    #[arg(short, long, env = "RESPKV_SNAPSHOT", default_value = config::DEFAULT_SNAPSHOT_PATH)]
    snapshot: PathBuf,

    /// Longest wait for socket readiness, in milliseconds; expired keys are swept at least this often
    #[arg(long, env = "RESPKV_TICK_MS", default_value_t = DEFAULT_TICK_MS)]
    tick_ms: u64,
}

impl From<Args> for Config {
    fn from(args: Args) -> Config {
        Config {
            bind: args.bind,
            port: args.port,
            capacity: args.capacity,
            snapshot_path: args.snapshot,
            tick: Duration::from_millis(args.tick_ms),
            ..Config::default()
        }
    }
}

fn main() {
    let config = Config::from(Args::parse());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = run(&config) {
        error!("{}", err);
        process::exit(1);
    }
}

fn run(config: &Config) -> respkv::Result<()> {
    let mut store = Store::new(config.capacity);
    let snapshot = Snapshot::new(&config.snapshot_path);

    if let Err(err) = snapshot.restore(&mut store) {
        warn!(
            "Failed to load {}, starting empty: {}",
            config.snapshot_path.display(),
            err
        );
    }

    let mut server = Server::bind(config, Db::new(store, snapshot))
        .map_err(|err| format!("Failed to listen on {}: {}", config.addr(), err))?;

    server.run()?;

    Ok(())
}
