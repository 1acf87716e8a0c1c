use bytes::{Buf, Bytes};
use std::io::Cursor;
use thiserror::Error as ThisError;
use tracing::debug;

use crate::frame::{self, Frame};

#[derive(Debug, ThisError, PartialEq)]
pub enum ProtocolError {
    #[error("protocol error; expected an array, got data type {0:?}")]
    NotAnArray(char),
    #[error("protocol error; invalid array header: {0}")]
    InvalidHeader(frame::Error),
    #[error("protocol error; empty command")]
    Empty,
    #[error("protocol error; array declared {declared} elements, decoded {decoded}")]
    Truncated { declared: usize, decoded: usize },
    #[error("protocol error; expected simple or bulk string, got {0}")]
    UnexpectedElement(Frame),
}

/// A client request: the command verb followed by its arguments, in wire order.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedCommand {
    parts: Vec<Bytes>,
}

impl DecodedCommand {
    /// The first element of a decoded command is always present.
    pub fn name(&self) -> &[u8] {
        &self.parts[0]
    }

    pub fn args(&self) -> &[Bytes] {
        &self.parts[1..]
    }

    pub fn into_parts(self) -> Vec<Bytes> {
        self.parts
    }
}

/// Extracts one command from a raw read.
///
/// Clients send commands to the server as RESP arrays of bulk (or simple) strings. Either every
/// declared element decodes or the whole message is rejected, so a partially garbled command
/// never reaches the executor.
pub fn frame(raw: &[u8]) -> Result<DecodedCommand, ProtocolError> {
    let mut cursor = Cursor::new(raw);

    let declared = match frame::decode_array_len(&mut cursor) {
        Ok(Some(declared)) => declared,
        Ok(None) => return Err(ProtocolError::Empty),
        Err(frame::Error::InvalidDataType(byte)) => {
            return Err(ProtocolError::NotAnArray(byte as char))
        }
        Err(err) => return Err(ProtocolError::InvalidHeader(err)),
    };

    if declared == 0 {
        return Err(ProtocolError::Empty);
    }

    let (frames, decoded) = frame::decode_array(&mut cursor, declared);
    if decoded != declared {
        return Err(ProtocolError::Truncated { declared, decoded });
    }

    if cursor.has_remaining() {
        debug!("Ignoring {} trailing bytes after command", cursor.remaining());
    }

    let parts = frames
        .into_iter()
        .map(|frame| match frame {
            Frame::Bulk(bytes) => Ok(bytes),
            Frame::Simple(s) => Ok(Bytes::from(s)),
            frame => Err(ProtocolError::UnexpectedElement(frame)),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DecodedCommand { parts })
}
