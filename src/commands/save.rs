use tracing::error;

use crate::commands::executable::Executable;
use crate::commands::{CommandError, CommandParser};
use crate::db::Db;
use crate::frame::Frame;

/// Appends every live key to the snapshot file.
#[derive(Debug, PartialEq)]
pub struct Save;

impl Executable for Save {
    fn exec(self, db: &mut Db) -> Result<Frame, CommandError> {
        match db.snapshot.save(&db.store) {
            Ok(_) => Ok(Frame::Simple("OK".to_string())),
            Err(err) => {
                error!(
                    "Failed to save snapshot to {}: {}",
                    db.snapshot.path().display(),
                    err
                );
                Err(CommandError::Save)
            }
        }
    }
}

impl TryFrom<&mut CommandParser<'_>> for Save {
    type Error = CommandError;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}
