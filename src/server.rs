use bytes::Bytes;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn};

use crate::command;
use crate::config::Config;
use crate::connection::Connection;
use crate::frame::Frame;

const LISTENER: Token = Token(0);

/// Reply sent for requests that are not well-formed RESP commands.
const GENERIC_ERROR: &str = "Error";

const EVENTS_CAPACITY: usize = 1024;

/// Consecutive accept errors tolerated in one readiness event before waiting for the next one.
const MAX_ACCEPT_FAILURES: usize = 64;

/// Runs decoded commands. Implementations must always produce a reply: failures are reported as
/// RESP errors rather than returned.
pub trait Executor {
    fn execute(&mut self, name: &[u8], args: &[Bytes]) -> Frame;

    /// Called once per loop iteration, whether or not any request arrived.
    fn remove_expired(&mut self) {}
}

/// Sockets tracked by the server, keyed by their poll token.
///
/// Entries live in a dense vector; removal swaps the last entry into the freed slot and
/// repoints its token. The vector doubles in size whenever it is full.
pub struct ConnectionTable<T> {
    entries: Vec<(Token, T)>,
    index: HashMap<Token, usize>,
}

impl<T> ConnectionTable<T> {
    pub fn with_capacity(capacity: usize) -> ConnectionTable<T> {
        ConnectionTable {
            entries: Vec::with_capacity(capacity.max(1)),
            index: HashMap::with_capacity(capacity.max(1)),
        }
    }

    /// Tracks `value` under `token`, replacing any entry already using that token.
    pub fn insert(&mut self, token: Token, value: T) {
        if let Some(&slot) = self.index.get(&token) {
            self.entries[slot].1 = value;
            return;
        }

        if self.entries.len() == self.entries.capacity() {
            let additional = self.entries.capacity();
            self.entries.reserve_exact(additional);
        }

        self.index.insert(token, self.entries.len());
        self.entries.push((token, value));
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut T> {
        let slot = *self.index.get(&token)?;
        self.entries.get_mut(slot).map(|(_, value)| value)
    }

    pub fn remove(&mut self, token: Token) -> Option<T> {
        let slot = self.index.remove(&token)?;
        let (_, value) = self.entries.swap_remove(slot);

        if let Some((moved, _)) = self.entries.get(slot) {
            self.index.insert(*moved, slot);
        }

        Some(value)
    }

    pub fn contains(&self, token: Token) -> bool {
        self.index.contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// Tokens in slot order.
    pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.entries.iter().map(|(token, _)| *token)
    }
}

pub enum Socket {
    Listening(TcpListener),
    Connected(Connection),
}

/// Single-threaded server: one readiness poll drives the listener and every client.
///
/// Commands run to completion on the polling thread, in the order their sockets are reported
/// ready, so the executor never needs locking.
pub struct Server<E> {
    poll: Poll,
    events: Events,
    sockets: ConnectionTable<Socket>,
    executor: E,
    local_addr: SocketAddr,
    next_token: usize,
    tick: Duration,
    // Reused for every read. A request must fit in one read.
    read_buffer: Vec<u8>,
}

impl<E: Executor> Server<E> {
    pub fn bind(config: &Config, executor: E) -> io::Result<Server<E>> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(config.addr())?;
        let local_addr = listener.local_addr()?;

        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        let mut sockets = ConnectionTable::with_capacity(config.initial_connections);
        sockets.insert(LISTENER, Socket::Listening(listener));

        info!("Server listening on {}", local_addr);

        Ok(Server {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            sockets,
            executor,
            local_addr,
            next_token: LISTENER.0 + 1,
            tick: config.tick,
            read_buffer: vec![0; config.read_buffer_size.max(1)],
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connected clients.
    pub fn connection_count(&self) -> usize {
        self.sockets.len().saturating_sub(1)
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Serves clients until polling itself fails.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            self.poll_once()?;
        }
    }

    /// Waits up to one tick for readiness, services every ready socket, then lets the executor
    /// drop expired keys.
    pub fn poll_once(&mut self) -> io::Result<()> {
        match self.poll.poll(&mut self.events, Some(self.tick)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }

        let ready: Vec<(Token, bool, bool)> = self
            .events
            .iter()
            .map(|event| {
                let readable = event.is_readable() || event.is_read_closed() || event.is_error();
                (event.token(), readable, event.is_writable())
            })
            .collect();

        for (token, readable, writable) in ready {
            if token == LISTENER {
                self.accept();
                continue;
            }
            if writable {
                self.flush(token);
            }
            if readable {
                self.service(token);
            }
        }

        self.executor.remove_expired();

        Ok(())
    }

    fn accept(&mut self) {
        let mut failures = 0;
        loop {
            let Some(Socket::Listening(listener)) = self.sockets.get_mut(LISTENER) else {
                return;
            };

            let (stream, peer) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                // Keep draining: the listener only reports readiness again for new arrivals.
                Err(err) => {
                    error!("Failed to accept connection: {}", err);
                    failures += 1;
                    if failures >= MAX_ACCEPT_FAILURES {
                        return;
                    }
                    continue;
                }
            };

            let token = Token(self.next_token);
            self.next_token += 1;

            let mut connection = Connection::new(token, stream, peer);
            if let Err(err) = connection.register(self.poll.registry()) {
                error!("Failed to register connection from {}: {}", peer, err);
                continue;
            }

            info!(id = %connection.id, "Accepted connection from {}", peer);
            self.sockets.insert(token, Socket::Connected(connection));
        }
    }

    /// Reads until the socket is drained, answering each read as one request.
    fn service(&mut self, token: Token) {
        let Some(Socket::Connected(connection)) = self.sockets.get_mut(token) else {
            return;
        };

        let span = info_span!("connection", id = %connection.id, peer = %connection.peer);
        let entered = span.enter();

        let open = loop {
            let n = match connection.read(&mut self.read_buffer) {
                Ok(0) => {
                    info!("Connection closed by peer");
                    break false;
                }
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break true,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("Failed to read from socket: {}", err);
                    break false;
                }
            };

            let reply = respond(&mut self.executor, &self.read_buffer[..n]);

            if let Err(err) = connection.send_all(&reply) {
                error!("Failed to write to socket: {}", err);
                break false;
            }
        };

        let open = open
            && match connection.update_interest(self.poll.registry()) {
                Ok(()) => true,
                Err(err) => {
                    error!("Failed to update socket interest: {}", err);
                    false
                }
            };

        if !open {
            drop(entered);
            self.close(token);
        }
    }

    fn flush(&mut self, token: Token) {
        let Some(Socket::Connected(connection)) = self.sockets.get_mut(token) else {
            return;
        };

        let result = connection
            .flush()
            .and_then(|()| connection.update_interest(self.poll.registry()));

        if let Err(err) = result {
            error!(id = %connection.id, "Failed to write to socket: {}", err);
            self.close(token);
        }
    }

    fn close(&mut self, token: Token) {
        if let Some(Socket::Connected(mut connection)) = self.sockets.remove(token) {
            if let Err(err) = connection.deregister(self.poll.registry()) {
                debug!(id = %connection.id, "Failed to deregister socket: {}", err);
            }
            info!(id = %connection.id, "Connection from {} removed", connection.peer);
        }
    }
}

/// Frames one raw read, runs it and encodes the reply.
fn respond<E: Executor>(executor: &mut E, raw: &[u8]) -> Vec<u8> {
    debug!("Received \"{}\"", raw.escape_ascii());

    let reply = match command::frame(raw) {
        Ok(command) => executor.execute(command.name(), command.args()),
        Err(err) => {
            warn!("{}", err);
            Frame::Error(GENERIC_ERROR.to_string())
        }
    };

    match reply.serialize() {
        Ok(bytes) => {
            debug!("Sending \"{}\"", bytes.escape_ascii());
            bytes
        }
        Err(err) => {
            error!("Failed to encode reply {}: {}", reply, err);
            format!("-{}\r\n", GENERIC_ERROR).into_bytes()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{IpAddr, Ipv4Addr};

    /// Replies with the command name, and counts expiry sweeps.
    #[derive(Default)]
    struct Echo {
        sweeps: usize,
    }

    impl Executor for Echo {
        fn execute(&mut self, name: &[u8], args: &[Bytes]) -> Frame {
            match name {
                b"BIG" => Frame::Bulk(Bytes::from(vec![b'x'; 2 * 1024 * 1024])),
                b"BAD" => Frame::Simple("line\r\nbreak".to_string()),
                _ => Frame::Array(
                    std::iter::once(Frame::Bulk(Bytes::copy_from_slice(name)))
                        .chain(args.iter().cloned().map(Frame::Bulk))
                        .collect(),
                ),
            }
        }

        fn remove_expired(&mut self) {
            self.sweeps += 1;
        }
    }

    fn server() -> Server<Echo> {
        let config = Config {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            tick: Duration::from_millis(10),
            ..Config::default()
        };
        Server::bind(&config, Echo::default()).unwrap()
    }

    fn poll_until(server: &mut Server<Echo>, done: impl Fn(&Server<Echo>) -> bool) {
        for _ in 0..500 {
            if done(server) {
                return;
            }
            server.poll_once().unwrap();
        }
        panic!("condition not reached");
    }

    fn request(
        server: &mut Server<Echo>,
        client: &mut std::net::TcpStream,
        raw: &[u8],
    ) -> Vec<u8> {
        client.write_all(raw).unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();

        let mut reply = Vec::new();
        let mut buf = [0u8; 1024];
        for _ in 0..500 {
            server.poll_once().unwrap();
            match client.read(&mut buf) {
                Ok(n) if n > 0 => {
                    reply.extend_from_slice(&buf[..n]);
                    if reply.ends_with(b"\r\n") {
                        return reply;
                    }
                }
                _ => {}
            }
        }
        panic!("no reply to {:?}", raw);
    }

    #[test]
    fn table_swap_remove_keeps_index_consistent() {
        let mut table = ConnectionTable::with_capacity(2);
        table.insert(Token(0), "listener");
        table.insert(Token(1), "a");
        table.insert(Token(2), "b");
        table.insert(Token(3), "c");

        assert!(table.capacity() >= 4);
        assert_eq!(table.remove(Token(1)), Some("a"));
        assert_eq!(table.remove(Token(1)), None);

        assert_eq!(table.tokens().collect::<Vec<_>>(), vec![Token(0), Token(3), Token(2)]);
        assert_eq!(table.get_mut(Token(3)), Some(&mut "c"));
        assert_eq!(table.get_mut(Token(2)), Some(&mut "b"));

        assert_eq!(table.remove(Token(2)), Some("b"));
        assert_eq!(table.remove(Token(0)), Some("listener"));
        assert_eq!(table.get_mut(Token(3)), Some(&mut "c"));
        assert_eq!(table.len(), 1);
        assert!(!table.contains(Token(0)));
    }

    #[test]
    fn table_doubles_when_full() {
        let mut table = ConnectionTable::with_capacity(5);
        for n in 0..6 {
            table.insert(Token(n), n);
        }

        assert_eq!(table.len(), 6);
        assert!(table.capacity() >= 10);
    }

    #[test]
    fn table_never_aliases_a_token() {
        let mut table = ConnectionTable::with_capacity(5);
        table.insert(Token(7), "old");
        table.insert(Token(7), "new");

        assert_eq!(table.len(), 1);
        assert_eq!(table.remove(Token(7)), Some("new"));
        assert!(table.is_empty());
    }

    #[test]
    fn replies_to_requests() {
        let mut server = server();
        let mut client = std::net::TcpStream::connect(server.local_addr()).unwrap();

        let reply = request(&mut server, &mut client, b"*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n");

        assert_eq!(reply, b"*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n".to_vec());
        assert_eq!(server.connection_count(), 1);
    }

    #[test]
    fn protocol_error_keeps_connection_open() {
        let mut server = server();
        let mut client = std::net::TcpStream::connect(server.local_addr()).unwrap();

        assert_eq!(request(&mut server, &mut client, b"hello\r\n"), b"-Error\r\n".to_vec());
        assert_eq!(
            request(&mut server, &mut client, b"*1\r\n$3\r\nGET\r\n$3\r\nfoo\r\n"),
            b"*1\r\n$3\r\nGET\r\n".to_vec()
        );
        assert_eq!(server.connection_count(), 1);
    }

    #[test]
    fn unencodable_reply_becomes_generic_error() {
        let mut server = server();
        let mut client = std::net::TcpStream::connect(server.local_addr()).unwrap();

        assert_eq!(
            request(&mut server, &mut client, b"*1\r\n$3\r\nBAD\r\n"),
            b"-Error\r\n".to_vec()
        );
    }

    #[test]
    fn large_reply_is_delivered_whole() {
        let mut server = server();
        let mut client = std::net::TcpStream::connect(server.local_addr()).unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();

        client.write_all(b"*1\r\n$3\r\nBIG\r\n").unwrap();

        let expected = b"$2097152\r\n".len() + 2 * 1024 * 1024 + 2;
        let mut reply = Vec::new();
        let mut buf = vec![0u8; 64 * 1024];
        for _ in 0..10_000 {
            if reply.len() == expected {
                break;
            }
            server.poll_once().unwrap();
            while let Ok(n) = client.read(&mut buf) {
                if n == 0 {
                    break;
                }
                reply.extend_from_slice(&buf[..n]);
            }
        }

        assert_eq!(reply.len(), expected);
        assert!(reply.starts_with(b"$2097152\r\n"));
        assert!(reply.ends_with(b"x\r\n"));
    }

    #[test]
    fn queued_connections_are_accepted_in_one_pass() {
        let mut server = server();
        let clients: Vec<_> = (0..4)
            .map(|_| std::net::TcpStream::connect(server.local_addr()).unwrap())
            .collect();

        server.poll_once().unwrap();

        assert_eq!(server.connection_count(), clients.len());
    }

    #[test]
    fn closed_connection_is_removed() {
        let mut server = server();
        let client = std::net::TcpStream::connect(server.local_addr()).unwrap();

        poll_until(&mut server, |server| server.connection_count() == 1);

        drop(client);
        poll_until(&mut server, |server| server.connection_count() == 0);

        assert_eq!(server.sockets.tokens().collect::<Vec<_>>(), vec![LISTENER]);
    }

    #[test]
    fn sweeps_without_traffic() {
        let mut server = server();

        server.poll_once().unwrap();
        server.poll_once().unwrap();

        assert_eq!(server.executor().sweeps, 2);
    }
}
