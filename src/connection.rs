use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use uuid::Uuid;

/// A connected client.
///
/// Replies are queued in `outgoing` and written out as far as the socket accepts. Whatever is
/// left over is flushed once the socket reports it is writable again, so a reply is never cut
/// short by a partial write.
pub struct Connection {
    pub id: Uuid,
    pub token: Token,
    pub peer: SocketAddr,
    stream: TcpStream,
    outgoing: BytesMut,
    interest: Interest,
}

impl Connection {
    pub fn new(token: Token, stream: TcpStream, peer: SocketAddr) -> Connection {
        Connection {
            id: Uuid::new_v4(),
            token,
            peer,
            stream,
            outgoing: BytesMut::new(),
            interest: Interest::READABLE,
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    /// Queues `bytes` and writes as much of the queue as possible.
    pub fn send_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.outgoing.extend_from_slice(bytes);
        self.flush()
    }

    /// Writes queued bytes until the queue is empty or the socket would block.
    pub fn flush(&mut self) -> io::Result<()> {
        while self.outgoing.has_remaining() {
            match self.stream.write(&self.outgoing) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.outgoing.advance(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Bytes waiting for the socket to become writable.
    pub fn pending(&self) -> usize {
        self.outgoing.len()
    }

    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.stream, self.token, self.interest)
    }

    /// Asks for writable events only while replies are pending.
    pub fn update_interest(&mut self, registry: &Registry) -> io::Result<()> {
        let interest = if self.outgoing.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };

        if interest != self.interest {
            registry.reregister(&mut self.stream, self.token, interest)?;
            self.interest = interest;
        }
        Ok(())
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }
}
