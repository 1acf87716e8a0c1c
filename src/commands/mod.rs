pub mod decr;
pub mod del;
pub mod executable;
pub mod exists;
pub mod get;
pub mod incr;
pub mod lpush;
pub mod ping;
pub mod rpush;
pub mod save;
pub mod set;

use bytes::Bytes;
use std::str::{self, FromStr};
use std::slice;
use strum_macros::{EnumString, IntoStaticStr};
use thiserror::Error as ThisError;

use crate::commands::executable::Executable;
use crate::db::Db;
use crate::frame::Frame;
use crate::store::StoreError;

use decr::Decr;
use del::Del;
use exists::Exists;
use get::Get;
use incr::Incr;
use lpush::Lpush;
use ping::Ping;
use rpush::Rpush;
use save::Save;
use set::Set;

#[derive(Debug, PartialEq)]
pub enum Command {
    Decr(Decr),
    Del(Del),
    Exists(Exists),
    Get(Get),
    Incr(Incr),
    Lpush(Lpush),
    Ping(Ping),
    Rpush(Rpush),
    Save(Save),
    Set(Set),
}

/// Command verbs, matched case-sensitively.
#[derive(Clone, Copy, Debug, PartialEq, EnumString, IntoStaticStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Verb {
    Decr,
    Del,
    Exists,
    Get,
    Incr,
    Lpush,
    Ping,
    Rpush,
    Save,
    Set,
}

impl Command {
    /// Resolves the verb and checks the arguments of a decoded request.
    pub fn parse(name: &[u8], args: &[Bytes]) -> Result<Command, CommandError> {
        let verb = str::from_utf8(name)
            .ok()
            .and_then(|name| Verb::from_str(name).ok())
            .ok_or(CommandError::UnknownCommand)?;

        let parser = &mut CommandParser { parts: args.iter() };

        let command = match verb {
            Verb::Decr => Decr::try_from(&mut *parser).map(Command::Decr),
            Verb::Del => Del::try_from(&mut *parser).map(Command::Del),
            Verb::Exists => Exists::try_from(&mut *parser).map(Command::Exists),
            Verb::Get => Get::try_from(&mut *parser).map(Command::Get),
            Verb::Incr => Incr::try_from(&mut *parser).map(Command::Incr),
            Verb::Lpush => Lpush::try_from(&mut *parser).map(Command::Lpush),
            Verb::Ping => Ping::try_from(&mut *parser).map(Command::Ping),
            Verb::Rpush => Rpush::try_from(&mut *parser).map(Command::Rpush),
            Verb::Save => Save::try_from(&mut *parser).map(Command::Save),
            Verb::Set => Set::try_from(&mut *parser).map(Command::Set),
        }?;

        parser.finish()?;
        Ok(command)
    }
}

impl Executable for Command {
    fn exec(self, db: &mut Db) -> Result<Frame, CommandError> {
        match self {
            Command::Decr(cmd) => cmd.exec(db),
            Command::Del(cmd) => cmd.exec(db),
            Command::Exists(cmd) => cmd.exec(db),
            Command::Get(cmd) => cmd.exec(db),
            Command::Incr(cmd) => cmd.exec(db),
            Command::Lpush(cmd) => cmd.exec(db),
            Command::Ping(cmd) => cmd.exec(db),
            Command::Rpush(cmd) => cmd.exec(db),
            Command::Save(cmd) => cmd.exec(db),
            Command::Set(cmd) => cmd.exec(db),
        }
    }
}

pub struct CommandParser<'a> {
    parts: slice::Iter<'a, Bytes>,
}

impl<'a> CommandParser<'a> {
    fn next_bytes(&mut self) -> Result<Bytes, CommandParserError> {
        self.parts
            .next()
            .cloned()
            .ok_or(CommandParserError::EndOfStream)
    }

    fn next_integer(&mut self) -> Result<i64, CommandParserError> {
        let bytes = self.next_bytes()?;

        str::from_utf8(&bytes)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(CommandParserError::InvalidInteger(bytes))
    }

    /// Takes every remaining argument, requiring at least one.
    fn remaining_bytes(&mut self) -> Result<Vec<Bytes>, CommandParserError> {
        let parts: Vec<Bytes> = self.parts.by_ref().cloned().collect();
        if parts.is_empty() {
            return Err(CommandParserError::EndOfStream);
        }
        Ok(parts)
    }

    fn has_remaining(&self) -> bool {
        !self.parts.as_slice().is_empty()
    }

    fn finish(&mut self) -> Result<(), CommandParserError> {
        if self.has_remaining() {
            return Err(CommandParserError::TrailingArguments);
        }
        Ok(())
    }
}

#[derive(Debug, ThisError, PartialEq)]
pub(crate) enum CommandParserError {
    #[error("attempting to extract a value failed due to the arguments being fully consumed")]
    EndOfStream,
    #[error("argument is not an integer: {0:?}")]
    InvalidInteger(Bytes),
    #[error("unexpected trailing arguments")]
    TrailingArguments,
}

/// Failures reported back to the client. The `Display` output is the error text sent over the
/// wire.
#[derive(Debug, ThisError, PartialEq)]
pub enum CommandError {
    #[error("Unknown Command")]
    UnknownCommand,
    #[error("Failed: Incomplete argument list")]
    IncompleteArguments,
    #[error("Failed: Too many arguments")]
    TooManyArguments,
    #[error("Failed: Syntax error")]
    Syntax,
    #[error("Failed: Expiration value is not an integer")]
    ExpireNotInteger,
    #[error("Failed: Expiration value less than zero")]
    NegativeExpire,
    #[error("Failed: Expiration value out of range")]
    ExpireOutOfRange,
    #[error("Failed: Expiration timestamp (in seconds) before current time")]
    ExpireAtSecondsInPast,
    #[error("Failed: Expiration timestamp (in milliseconds) before current time")]
    ExpireAtMillisInPast,
    #[error("Failed: Max data size reached")]
    Capacity,
    #[error("Failed: Key does not exist")]
    NotFound,
    #[error("Failed: Value of key is a list")]
    ListValue,
    #[error("Failed: Value of key not a list")]
    NotAList,
    #[error("Failed: Value is not an integer")]
    NotAnInteger,
    #[error("Failed: Overflow")]
    Overflow,
    #[error("Failed: Underflow")]
    Underflow,
    #[error("Failed: Error saving to file")]
    Save,
}

impl From<CommandParserError> for CommandError {
    fn from(err: CommandParserError) -> CommandError {
        match err {
            CommandParserError::EndOfStream => CommandError::IncompleteArguments,
            CommandParserError::InvalidInteger(_) => CommandError::NotAnInteger,
            CommandParserError::TrailingArguments => CommandError::TooManyArguments,
        }
    }
}

impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> CommandError {
        match err {
            StoreError::Capacity => CommandError::Capacity,
            StoreError::WrongType => CommandError::NotAList,
            StoreError::NotFound => CommandError::NotFound,
            StoreError::NotAnInteger => CommandError::NotAnInteger,
            StoreError::Overflow => CommandError::Overflow,
            StoreError::Underflow => CommandError::Underflow,
        }
    }
}

impl From<CommandError> for Frame {
    fn from(err: CommandError) -> Frame {
        Frame::Error(err.to_string())
    }
}
