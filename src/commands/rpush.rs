use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandError, CommandParser};
use crate::db::Db;
use crate::frame::Frame;
use crate::store::End;

/// Appends the values to the tail of the list stored at `key`, creating it when missing.
#[derive(Debug, PartialEq)]
pub struct Rpush {
    pub key: Bytes,
    pub values: Vec<Bytes>,
}

impl Executable for Rpush {
    fn exec(self, db: &mut Db) -> Result<Frame, CommandError> {
        let len = db.store.push(self.key, self.values, End::Back)?;

        Ok(Frame::Integer(len as i64))
    }
}

impl TryFrom<&mut CommandParser<'_>> for Rpush {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let values = parser.remaining_bytes()?;

        Ok(Self { key, values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{db, run};
    use crate::persistence::Snapshot;
    use crate::store::{Data, Store};
    use std::collections::VecDeque;

    #[test]
    fn appends_in_order() {
        let mut db = db();

        assert_eq!(run(&mut db, "RPUSH", &["list", "a", "b"]), Frame::Integer(2));
        assert_eq!(run(&mut db, "RPUSH", &["list", "c"]), Frame::Integer(3));

        let expected: VecDeque<Bytes> = ["a", "b", "c"].into_iter().map(Bytes::from).collect();
        assert_eq!(
            db.store.get(b"list").map(|value| value.data.clone()),
            Some(Data::List(expected))
        );
    }

    #[test]
    fn capacity() {
        let snapshot = Snapshot::new(std::env::temp_dir().join("respkv-unused.rdb"));
        let mut db = Db::new(Store::new(1), snapshot);
        run(&mut db, "SET", &["a", "1"]);

        assert_eq!(
            run(&mut db, "RPUSH", &["list", "x"]),
            Frame::Error("Failed: Max data size reached".to_string())
        );
        assert!(!db.store.exists(b"list"));
    }
}
