use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandError, CommandParser};
use crate::db::Db;
use crate::frame::Frame;
use crate::store::End;

/// Inserts the values at the head of the list stored at `key`, one after the other, so the last
/// value ends up first. The list is created when the key does not exist.
#[derive(Debug, PartialEq)]
pub struct Lpush {
    pub key: Bytes,
    pub values: Vec<Bytes>,
}

impl Executable for Lpush {
    fn exec(self, db: &mut Db) -> Result<Frame, CommandError> {
        let len = db.store.push(self.key, self.values, End::Front)?;

        Ok(Frame::Integer(len as i64))
    }
}

impl TryFrom<&mut CommandParser<'_>> for Lpush {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let values = parser.remaining_bytes()?;

        Ok(Self { key, values })
    }
}
