use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 6379;

/// How many keys the store holds before refusing new ones.
pub const DEFAULT_CAPACITY: usize = 4096;

pub const DEFAULT_SNAPSHOT_PATH: &str = "state.rdb";

/// Upper bound on how long the server loop blocks waiting for socket readiness. Expired keys are
/// swept at least this often.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// A message must arrive within a single read of at most this many bytes.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Starting size of the connection table, which doubles whenever it fills.
pub const DEFAULT_INITIAL_CONNECTIONS: usize = 5;

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub bind: IpAddr,
    pub port: u16,
    pub capacity: usize,
    pub snapshot_path: PathBuf,
    pub tick: Duration,
    pub read_buffer_size: usize,
    pub initial_connections: usize,
}

impl Config {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            capacity: DEFAULT_CAPACITY,
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
            tick: DEFAULT_TICK,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            initial_connections: DEFAULT_INITIAL_CONNECTIONS,
        }
    }
}
