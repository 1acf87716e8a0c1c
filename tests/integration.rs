use respkv::config::Config;
use respkv::db::Db;
use respkv::persistence::Snapshot;
use respkv::server::Server;
use respkv::store::Store;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};

/// Starts a server on its own thread, bound to an ephemeral port.
fn start(capacity: usize, snapshot: &Path) -> SocketAddr {
    let config = Config {
        bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        capacity,
        snapshot_path: snapshot.to_path_buf(),
        tick: Duration::from_millis(20),
        ..Config::default()
    };
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let mut store = Store::new(config.capacity);
        let snapshot = Snapshot::new(&config.snapshot_path);
        snapshot.restore(&mut store).unwrap();

        let mut server = Server::bind(&config, Db::new(store, snapshot)).unwrap();
        tx.send(server.local_addr()).unwrap();
        server.run().unwrap();
    });

    rx.recv().unwrap()
}

fn encode(parts: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", parts.len()).into_bytes();
    for part in parts {
        out.extend_from_slice(format!("${}\r\n{}\r\n", part.len(), part).as_bytes());
    }
    out
}

/// Sends one request and reads one reply. Every reply the server sends fits in a single read
/// here.
async fn send(stream: &mut TcpStream, raw: &[u8]) -> String {
    stream.write_all(raw).await.unwrap();

    let mut buf = vec![0u8; 4096];
    let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("timed out waiting for reply")
        .unwrap();

    String::from_utf8(buf[..n].to_vec()).unwrap()
}

async fn cmd(stream: &mut TcpStream, parts: &[&str]) -> String {
    send(stream, &encode(parts)).await
}

#[tokio::test]
async fn set_and_get() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start(16, &dir.path().join("state.rdb"));
    let mut stream = TcpStream::connect(addr).await.unwrap();

    assert_eq!(
        send(&mut stream, b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n").await,
        "+OK\r\n"
    );
    assert_eq!(
        send(&mut stream, b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").await,
        "$3\r\nbar\r\n"
    );

    let missing = send(&mut stream, b"*2\r\n$3\r\nGET\r\n$4\r\nnope\r\n").await;
    assert!(missing.starts_with("-Failed"), "{}", missing);
}

#[tokio::test]
async fn commands() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start(16, &dir.path().join("state.rdb"));
    let mut stream = TcpStream::connect(addr).await.unwrap();

    assert_eq!(cmd(&mut stream, &["PING"]).await, "+PONG\r\n");
    assert_eq!(cmd(&mut stream, &["PING", "hey"]).await, "$3\r\nhey\r\n");
    assert_eq!(cmd(&mut stream, &["SET", "n", "10"]).await, "+OK\r\n");
    assert_eq!(cmd(&mut stream, &["INCR", "n"]).await, ":11\r\n");
    assert_eq!(cmd(&mut stream, &["DECR", "n"]).await, ":10\r\n");
    assert_eq!(cmd(&mut stream, &["RPUSH", "l", "a", "b"]).await, ":2\r\n");
    assert_eq!(cmd(&mut stream, &["LPUSH", "l", "c"]).await, ":3\r\n");
    assert_eq!(cmd(&mut stream, &["EXISTS", "n", "l", "x", "n"]).await, ":3\r\n");
    assert_eq!(
        cmd(&mut stream, &["GET", "l"]).await,
        "-Failed: Value of key is a list\r\n"
    );
    assert_eq!(cmd(&mut stream, &["DEL", "n", "l", "x"]).await, ":2\r\n");
    assert_eq!(cmd(&mut stream, &["EXISTS", "n"]).await, ":0\r\n");
    assert_eq!(cmd(&mut stream, &["FLUSHALL"]).await, "-Unknown Command\r\n");
    assert_eq!(cmd(&mut stream, &["get", "n"]).await, "-Unknown Command\r\n");
}

#[tokio::test]
async fn expiry() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start(16, &dir.path().join("state.rdb"));
    let mut stream = TcpStream::connect(addr).await.unwrap();

    assert_eq!(
        cmd(&mut stream, &["SET", "short", "v", "PX", "100"]).await,
        "+OK\r\n"
    );
    assert_eq!(cmd(&mut stream, &["SET", "long", "v", "EX", "60"]).await, "+OK\r\n");
    assert_eq!(
        cmd(&mut stream, &["SET", "k", "v", "EX", "-1"]).await,
        "-Failed: Expiration value less than zero\r\n"
    );

    sleep(Duration::from_millis(300)).await;

    assert_eq!(cmd(&mut stream, &["EXISTS", "short", "long"]).await, ":1\r\n");
}

#[tokio::test]
async fn capacity() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start(3, &dir.path().join("state.rdb"));
    let mut stream = TcpStream::connect(addr).await.unwrap();

    for key in ["a", "b", "c"] {
        assert_eq!(cmd(&mut stream, &["SET", key, "1"]).await, "+OK\r\n");
    }

    assert_eq!(
        cmd(&mut stream, &["SET", "d", "1"]).await,
        "-Failed: Max data size reached\r\n"
    );
    assert_eq!(
        cmd(&mut stream, &["GET", "d"]).await,
        "-Failed: Key does not exist\r\n"
    );
    assert_eq!(cmd(&mut stream, &["SET", "a", "2"]).await, "+OK\r\n");
}

#[tokio::test]
async fn protocol_error_keeps_connection_open() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start(16, &dir.path().join("state.rdb"));
    let mut stream = TcpStream::connect(addr).await.unwrap();

    assert_eq!(send(&mut stream, b"PING\r\n").await, "-Error\r\n");
    assert_eq!(
        send(&mut stream, b"*3\r\n$3\r\nSET\r\n$9\r\nfoo\r\n$3\r\nbar\r\n").await,
        "-Error\r\n"
    );
    assert_eq!(
        cmd(&mut stream, &["GET", "foo"]).await,
        "-Failed: Key does not exist\r\n"
    );
    assert_eq!(cmd(&mut stream, &["PING"]).await, "+PONG\r\n");
}

#[tokio::test]
async fn many_clients() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start(64, &dir.path().join("state.rdb"));

    let mut streams = vec![];
    for _ in 0..12 {
        streams.push(TcpStream::connect(addr).await.unwrap());
    }

    for (n, stream) in streams.iter_mut().enumerate() {
        let key = format!("key{}", n);
        assert_eq!(cmd(stream, &["SET", &key, "v"]).await, "+OK\r\n");
    }

    drop(streams.remove(0));

    let last = streams.last_mut().unwrap();
    assert_eq!(cmd(last, &["DEL", "key0", "key11"]).await, ":2\r\n");
}

#[tokio::test]
async fn save_and_restore() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.rdb");

    {
        let addr = start(16, &path);
        let mut stream = TcpStream::connect(addr).await.unwrap();

        assert_eq!(cmd(&mut stream, &["SET", "greeting", "hello world"]).await, "+OK\r\n");
        assert_eq!(cmd(&mut stream, &["RPUSH", "list", "a", "b"]).await, ":2\r\n");
        assert_eq!(cmd(&mut stream, &["SET", "gone", "v", "PX", "50"]).await, "+OK\r\n");
        sleep(Duration::from_millis(100)).await;
        assert_eq!(cmd(&mut stream, &["SAVE"]).await, "+OK\r\n");
    }

    let addr = start(16, &path);
    let mut stream = TcpStream::connect(addr).await.unwrap();

    assert_eq!(
        cmd(&mut stream, &["GET", "greeting"]).await,
        "$11\r\nhello world\r\n"
    );
    assert_eq!(cmd(&mut stream, &["RPUSH", "list", "c"]).await, ":3\r\n");
    assert_eq!(cmd(&mut stream, &["EXISTS", "gone"]).await, ":0\r\n");
}
