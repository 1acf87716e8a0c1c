use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::incr::incr_by;
use crate::commands::{CommandError, CommandParser};
use crate::db::Db;
use crate::frame::Frame;

/// Decrements the number stored at `key` by one. The key must already exist.
#[derive(Debug, PartialEq)]
pub struct Decr {
    pub key: Bytes,
}

impl Executable for Decr {
    fn exec(self, db: &mut Db) -> Result<Frame, CommandError> {
        incr_by(db, &self.key, -1)
    }
}

impl TryFrom<&mut CommandParser<'_>> for Decr {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;

        Ok(Self { key })
    }
}
