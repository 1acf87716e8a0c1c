pub mod command;
pub mod commands;
pub mod config;
pub mod connection;
pub mod db;
pub mod frame;
pub mod persistence;
pub mod server;
pub mod store;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
