// https://redis.io/docs/reference/protocol-spec

use std::fmt;

use bytes::Buf;
use bytes::Bytes;
use std::io::Cursor;
use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

/// Largest payload accepted for simple strings and simple errors.
pub const MAX_SIMPLE_LEN: usize = 128;

/// Largest payload accepted for bulk strings (2 MiB).
pub const MAX_BULK_LEN: usize = 2_097_152;

// Sign plus the 19 digits of `i64::MAX`.
const MAX_INTEGER_LEN: usize = 20;

// Length prefixes of bulk strings and arrays.
const MAX_LENGTH_LEN: usize = 20;

#[derive(Debug, ThisError, PartialEq)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("invalid frame data type: {0}")]
    InvalidDataType(u8),
    #[error("protocol error; {0}")]
    Malformed(String),
    #[error("payload of {len} bytes exceeds the limit of {max} bytes")]
    TooLong { len: usize, max: usize },
    #[error("simple string payload contains a line break")]
    ContainsLineBreak,
}

impl Error {
    fn malformed(msg: impl Into<String>) -> Error {
        Error::Malformed(msg.into())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Integer(i64),
    Simple(String),
    Error(String),
    Bulk(Bytes),
    /// The RESP2 null bulk string, `$-1\r\n`.
    Null,
    Array(Vec<Frame>),
}

impl Frame {
    /// Decodes one complete value starting at the cursor position.
    ///
    /// Arrays are decoded flat: an array element that is itself an array is rejected.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        // The first byte in an RESP-serialized payload always identifies its type.
        let data_type = DataType::try_from(peek_byte(src)?)?;

        match data_type {
            DataType::Integer => decode_integer(src).map(Frame::Integer),
            DataType::SimpleString => decode_simple(src, false).map(Frame::Simple),
            DataType::SimpleError => decode_simple(src, true).map(Frame::Error),
            DataType::BulkString => Ok(decode_bulk(src)?.map_or(Frame::Null, Frame::Bulk)),
            DataType::Array => {
                let Some(declared) = decode_array_len(src)? else {
                    return Ok(Frame::Null);
                };

                let (frames, decoded) = decode_array(src, declared);
                if decoded != declared {
                    return Err(Error::malformed(format!(
                        "array declared {} elements, decoded {}",
                        declared, decoded
                    )));
                }

                Ok(Frame::Array(frames))
            }
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        match self {
            Frame::Integer(i) => Ok(encode_integer(*i)),
            Frame::Simple(s) => encode_simple(s, false),
            Frame::Error(s) => encode_simple(s, true),
            Frame::Bulk(bytes) => encode_bulk(bytes),
            Frame::Null => Ok(encode_null()),
            Frame::Array(arr) => encode_array(arr),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::Error(s) => write!(f, "-{}", s),
            Frame::Bulk(bytes) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Frame::Null => write!(f, "$-1"),
            Frame::Array(arr) => {
                write!(f, "*{}", arr.len())?;
                for frame in arr {
                    write!(f, " {}", frame)?;
                }
                Ok(())
            }
        }
    }
}

/// `:<decimal>\r\n`
pub fn encode_integer(value: i64) -> Vec<u8> {
    let digits = value.to_string();
    let mut bytes = Vec::with_capacity(1 + digits.len() + CRLF.len());
    bytes.push(u8::from(DataType::Integer));
    bytes.extend_from_slice(digits.as_bytes());
    bytes.extend_from_slice(CRLF);
    bytes
}

/// `+<text>\r\n`, or `-<text>\r\n` when `is_error` is set.
///
/// Fails when the text is longer than [`MAX_SIMPLE_LEN`] or holds a CR or LF byte anywhere.
pub fn encode_simple(text: &str, is_error: bool) -> Result<Vec<u8>, Error> {
    if text.len() > MAX_SIMPLE_LEN {
        return Err(Error::TooLong {
            len: text.len(),
            max: MAX_SIMPLE_LEN,
        });
    }
    if text.bytes().any(|b| b == b'\r' || b == b'\n') {
        return Err(Error::ContainsLineBreak);
    }

    let data_type = if is_error {
        DataType::SimpleError
    } else {
        DataType::SimpleString
    };

    let mut bytes = Vec::with_capacity(1 + text.len() + CRLF.len());
    bytes.push(u8::from(data_type));
    bytes.extend_from_slice(text.as_bytes());
    bytes.extend_from_slice(CRLF);
    Ok(bytes)
}

/// `$<len>\r\n<payload>\r\n`
pub fn encode_bulk(payload: &[u8]) -> Result<Vec<u8>, Error> {
    if payload.len() > MAX_BULK_LEN {
        return Err(Error::TooLong {
            len: payload.len(),
            max: MAX_BULK_LEN,
        });
    }

    let length_str = payload.len().to_string();
    let mut bytes =
        Vec::with_capacity(1 + length_str.len() + CRLF.len() + payload.len() + CRLF.len());
    bytes.push(u8::from(DataType::BulkString));
    bytes.extend_from_slice(length_str.as_bytes());
    bytes.extend_from_slice(CRLF);
    bytes.extend_from_slice(payload);
    bytes.extend_from_slice(CRLF);
    Ok(bytes)
}

/// `$-1\r\n`
pub fn encode_null() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

/// `*<count>\r\n` followed by every element. The first element that fails to encode aborts
/// the whole array.
pub fn encode_array(frames: &[Frame]) -> Result<Vec<u8>, Error> {
    let length_str = frames.len().to_string();
    let mut bytes = Vec::with_capacity(1 + length_str.len() + CRLF.len());
    bytes.push(u8::from(DataType::Array));
    bytes.extend_from_slice(length_str.as_bytes());
    bytes.extend_from_slice(CRLF);
    for frame in frames {
        bytes.extend(frame.serialize()?);
    }
    Ok(bytes)
}

/// Decodes `:<decimal>\r\n`. The decimal may carry a leading `-`.
pub fn decode_integer(src: &mut Cursor<&[u8]>) -> Result<i64, Error> {
    expect_data_type(src, DataType::Integer)?;
    let digits = get_line(src, MAX_INTEGER_LEN)?;
    parse_integer(digits)
}

/// Decodes `+<text>\r\n`, or `-<text>\r\n` when `is_error` is set.
pub fn decode_simple(src: &mut Cursor<&[u8]>, is_error: bool) -> Result<String, Error> {
    let data_type = if is_error {
        DataType::SimpleError
    } else {
        DataType::SimpleString
    };
    expect_data_type(src, data_type)?;

    let text = get_line(src, MAX_SIMPLE_LEN)?;
    if text.contains(&b'\n') {
        return Err(Error::ContainsLineBreak);
    }

    String::from_utf8(text.to_vec()).map_err(|_| Error::malformed("simple string is not UTF-8"))
}

/// Decodes `$<len>\r\n<payload>\r\n`. Returns `None` for the null bulk string `$-1\r\n`.
///
/// The declared length is checked against [`MAX_BULK_LEN`] before the payload is looked at, and
/// the payload must be followed by CRLF.
pub fn decode_bulk(src: &mut Cursor<&[u8]>) -> Result<Option<Bytes>, Error> {
    expect_data_type(src, DataType::BulkString)?;

    let length = get_line(src, MAX_LENGTH_LEN)?;
    if length == b"-1" {
        return Ok(None);
    }

    let len = parse_length(length)?;
    if len > MAX_BULK_LEN {
        return Err(Error::TooLong {
            len,
            max: MAX_BULK_LEN,
        });
    }

    let buf: &[u8] = *src.get_ref();
    let start = src.position() as usize;
    let end = start + len;
    if buf.len() < end + CRLF.len() {
        return Err(Error::Incomplete);
    }
    if &buf[end..end + CRLF.len()] != CRLF {
        return Err(Error::malformed("bulk string payload is not terminated by CRLF"));
    }

    let data = Bytes::copy_from_slice(&buf[start..end]);
    src.set_position((end + CRLF.len()) as u64);

    Ok(Some(data))
}

/// Decodes an array header `*<count>\r\n`. Returns `None` for the null array `*-1\r\n`.
pub fn decode_array_len(src: &mut Cursor<&[u8]>) -> Result<Option<usize>, Error> {
    expect_data_type(src, DataType::Array)?;

    let length = get_line(src, MAX_LENGTH_LEN)?;
    if length == b"-1" {
        return Ok(None);
    }

    parse_length(length).map(Some)
}

/// Decodes up to `declared` array elements following an array header.
///
/// Returns the elements that decoded together with how many did. An element that fails to
/// decode is skipped up to its next CRLF and scanning continues, so the caller detects
/// corruption or truncation by comparing the count against `declared`. Nested arrays are not
/// supported and count as failures.
pub fn decode_array(src: &mut Cursor<&[u8]>, declared: usize) -> (Vec<Frame>, usize) {
    let mut frames = Vec::with_capacity(declared.min(src.remaining()));
    let mut decoded = 0;

    for _ in 0..declared {
        // Every element left would fail the same way.
        if !src.has_remaining() {
            break;
        }

        let start = src.position();
        match decode_element(src) {
            Ok(frame) => {
                frames.push(frame);
                decoded += 1;
            }
            Err(_) => {
                src.set_position(start);
                skip_line(src);
            }
        }
    }

    (frames, decoded)
}

fn decode_element(src: &mut Cursor<&[u8]>) -> Result<Frame, Error> {
    match DataType::try_from(peek_byte(src)?)? {
        DataType::Integer => decode_integer(src).map(Frame::Integer),
        DataType::SimpleString => decode_simple(src, false).map(Frame::Simple),
        DataType::SimpleError => decode_simple(src, true).map(Frame::Error),
        DataType::BulkString => Ok(decode_bulk(src)?.map_or(Frame::Null, Frame::Bulk)),
        DataType::Array => Err(Error::malformed("nested arrays are not supported")),
    }
}

/// Returns the bytes between the cursor and the next CRLF and moves the cursor past it. At most
/// `limit` bytes are scanned before the CR must show up.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>, limit: usize) -> Result<&'a [u8], Error> {
    let buf: &'a [u8] = *src.get_ref();
    let start = (src.position() as usize).min(buf.len());
    let window_end = buf.len().min(start + limit + 1);

    let Some(offset) = buf[start..window_end].iter().position(|&b| b == b'\r') else {
        if window_end == buf.len() {
            return Err(Error::Incomplete);
        }
        return Err(Error::malformed(format!(
            "no CRLF found within {} bytes",
            limit
        )));
    };

    let cr = start + offset;
    match buf.get(cr + 1) {
        None => Err(Error::Incomplete),
        Some(b'\n') => {
            src.set_position((cr + CRLF.len()) as u64);
            Ok(&buf[start..cr])
        }
        Some(_) => Err(Error::malformed("CR is not followed by LF")),
    }
}

// Moves the cursor past the next CRLF after the current byte, or to the end of the buffer.
fn skip_line(src: &mut Cursor<&[u8]>) {
    let buf: &[u8] = *src.get_ref();
    let from = (src.position() as usize + 1).min(buf.len());

    let next = buf[from..]
        .windows(CRLF.len())
        .position(|window| window == CRLF)
        .map(|index| from + index + CRLF.len())
        .unwrap_or(buf.len());

    src.set_position(next as u64);
}

fn parse_integer(digits: &[u8]) -> Result<i64, Error> {
    let unsigned = digits.strip_prefix(b"-").unwrap_or(digits);
    if unsigned.is_empty() || !unsigned.iter().all(u8::is_ascii_digit) {
        return Err(Error::malformed("invalid integer"));
    }

    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| Error::malformed("integer out of range"))
}

fn parse_length(digits: &[u8]) -> Result<usize, Error> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(Error::malformed("invalid length"));
    }

    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| Error::malformed("length out of range"))
}

fn expect_data_type(src: &mut Cursor<&[u8]>, expected: DataType) -> Result<(), Error> {
    let byte = get_byte(src)?;
    if byte != u8::from(expected) {
        return Err(Error::InvalidDataType(byte));
    }
    Ok(())
}

fn peek_byte(src: &Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.chunk()[0])
}

fn get_byte(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u8())
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DataType {
    Integer,      // ':'
    SimpleString, // '+'
    SimpleError,  // '-'
    BulkString,   // '$'
    Array,        // '*'
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b':' => Ok(Self::Integer),
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b'$' => Ok(Self::BulkString),
            b'*' => Ok(Self::Array),
            _ => Err(Error::InvalidDataType(byte)),
        }
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        match value {
            DataType::Integer => b':',
            DataType::SimpleString => b'+',
            DataType::SimpleError => b'-',
            DataType::BulkString => b'$',
            DataType::Array => b'*',
        }
    }
}
