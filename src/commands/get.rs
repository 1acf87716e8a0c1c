use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandError, CommandParser};
use crate::db::Db;
use crate::frame::Frame;
use crate::store::Data;

/// Get the value of `key`. A missing or expired key is reported as an error.
#[derive(Debug, PartialEq)]
pub struct Get {
    pub key: Bytes,
}

impl Executable for Get {
    fn exec(self, db: &mut Db) -> Result<Frame, CommandError> {
        let value = db.store.get(&self.key).ok_or(CommandError::NotFound)?;

        match &value.data {
            Data::String(data) => Ok(Frame::Bulk(data.clone())),
            Data::List(_) => Err(CommandError::ListValue),
        }
    }
}

impl TryFrom<&mut CommandParser<'_>> for Get {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        Ok(Self { key })
    }
}
