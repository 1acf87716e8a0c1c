use bytes::Bytes;
use tracing::debug;

use crate::commands::executable::Executable;
use crate::commands::Command;
use crate::frame::Frame;
use crate::persistence::Snapshot;
use crate::server::Executor;
use crate::store::Store;

/// Everything a command can touch: the key space and the file it is saved to.
pub struct Db {
    pub store: Store,
    pub snapshot: Snapshot,
}

impl Db {
    pub fn new(store: Store, snapshot: Snapshot) -> Db {
        Db { store, snapshot }
    }
}

impl Executor for Db {
    fn execute(&mut self, name: &[u8], args: &[Bytes]) -> Frame {
        let result = Command::parse(name, args).and_then(|command| {
            debug!(?command, "Executing");
            command.exec(self)
        });

        match result {
            Ok(frame) => frame,
            Err(err) => {
                debug!("Command failed: {}", err);
                Frame::from(err)
            }
        }
    }

    fn remove_expired(&mut self) {
        self.store.remove_expired_keys();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Db {
        Db::new(
            Store::new(4),
            Snapshot::new(std::env::temp_dir().join("respkv-unused.rdb")),
        )
    }

    #[test]
    fn execute_is_total() {
        let mut db = db();

        assert_eq!(
            db.execute(b"NOPE", &[]),
            Frame::Error("Unknown Command".to_string())
        );
        assert_eq!(
            db.execute(b"GET", &[]),
            Frame::Error("Failed: Incomplete argument list".to_string())
        );
        assert_eq!(
            db.execute(b"SET", &[Bytes::from("k"), Bytes::from("v")]),
            Frame::Simple("OK".to_string())
        );
        assert_eq!(
            db.execute(b"GET", &[Bytes::from("k")]),
            Frame::Bulk(Bytes::from("v"))
        );
    }

    #[test]
    fn remove_expired() {
        let mut db = db();
        let past = db.store.now() - 1;
        db.store
            .set(Bytes::from("old"), Bytes::from("v"), Some(past))
            .unwrap();

        assert_eq!(db.store.len(), 1);
        db.remove_expired();
        assert!(db.store.is_empty());
    }
}
