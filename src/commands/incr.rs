use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandError, CommandParser};
use crate::db::Db;
use crate::frame::Frame;
use crate::store::StoreError;

/// Increments the number stored at `key` by one. The key must already exist.
#[derive(Debug, PartialEq)]
pub struct Incr {
    pub key: Bytes,
}

impl Executable for Incr {
    fn exec(self, db: &mut Db) -> Result<Frame, CommandError> {
        incr_by(db, &self.key, 1)
    }
}

/// Shared by INCR and DECR. A list value is reported as not holding an integer.
pub(crate) fn incr_by(db: &mut Db, key: &[u8], increment: i64) -> Result<Frame, CommandError> {
    match db.store.incr_by(key, increment) {
        Ok(value) => Ok(Frame::Integer(value)),
        Err(StoreError::WrongType) => Err(CommandError::NotAnInteger),
        Err(err) => Err(err.into()),
    }
}

impl TryFrom<&mut CommandParser<'_>> for Incr {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;

        Ok(Self { key })
    }
}
