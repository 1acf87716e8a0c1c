use crate::commands::CommandError;
use crate::db::Db;
use crate::frame::Frame;

pub trait Executable {
    fn exec(self, db: &mut Db) -> Result<Frame, CommandError>;
}
