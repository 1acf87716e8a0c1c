use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandError, CommandParser, CommandParserError};
use crate::db::Db;
use crate::frame::Frame;
use crate::store::Timestamp;

/// Set `key` to hold the string `value`, replacing any value and expiry it held before.
#[derive(Debug, PartialEq)]
pub struct Set {
    pub key: Bytes,
    pub value: Bytes,
    pub expire: Option<Expire>,
}

#[derive(Debug, PartialEq)]
pub enum Expire {
    /// Seconds from now.
    Ex(u64),
    /// Milliseconds from now.
    Px(u64),
    /// Unix time in seconds.
    ExAt(i64),
    /// Unix time in milliseconds.
    PxAt(i64),
}

impl Expire {
    /// Absolute expiry in unix milliseconds, given the current time.
    pub fn expires_at(&self, now: Timestamp) -> Result<Timestamp, CommandError> {
        match *self {
            Expire::Ex(seconds) => seconds
                .checked_mul(1000)
                .and_then(|millis| now.checked_add(millis))
                .ok_or(CommandError::ExpireOutOfRange),
            Expire::Px(millis) => now
                .checked_add(millis)
                .ok_or(CommandError::ExpireOutOfRange),
            Expire::ExAt(seconds) => {
                let millis = seconds
                    .checked_mul(1000)
                    .ok_or(CommandError::ExpireOutOfRange)?;
                match Timestamp::try_from(millis) {
                    Ok(at) if at >= now => Ok(at),
                    _ => Err(CommandError::ExpireAtSecondsInPast),
                }
            }
            Expire::PxAt(millis) => match Timestamp::try_from(millis) {
                Ok(at) if at >= now => Ok(at),
                _ => Err(CommandError::ExpireAtMillisInPast),
            },
        }
    }
}

impl Executable for Set {
    fn exec(self, db: &mut Db) -> Result<Frame, CommandError> {
        let expires_at = match &self.expire {
            Some(expire) => Some(expire.expires_at(db.store.now())?),
            None => None,
        };

        db.store.set(self.key, self.value, expires_at)?;

        Ok(Frame::Simple("OK".to_string()))
    }
}

impl TryFrom<&mut CommandParser<'_>> for Set {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let value = parser.next_bytes()?;

        let option = match parser.next_bytes() {
            Ok(option) => option,
            Err(CommandParserError::EndOfStream) => {
                return Ok(Self {
                    key,
                    value,
                    expire: None,
                })
            }
            Err(err) => return Err(err.into()),
        };

        let unit: fn(i64) -> Result<Expire, CommandError> = match &option[..] {
            b"EX" => |amount| relative(amount).map(Expire::Ex),
            b"PX" => |amount| relative(amount).map(Expire::Px),
            b"EXAT" => |amount| Ok(Expire::ExAt(amount)),
            b"PXAT" => |amount| Ok(Expire::PxAt(amount)),
            _ => return Err(CommandError::Syntax),
        };

        let amount = match parser.next_integer() {
            Ok(amount) => amount,
            Err(CommandParserError::InvalidInteger(_)) => {
                return Err(CommandError::ExpireNotInteger)
            }
            Err(err) => return Err(err.into()),
        };
        let expire = unit(amount)?;

        Ok(Self {
            key,
            value,
            expire: Some(expire),
        })
    }
}

fn relative(amount: i64) -> Result<u64, CommandError> {
    u64::try_from(amount).map_err(|_| CommandError::NegativeExpire)
}
