//! `SQLite` archive of finished processes.

mod db;
mod models;
mod queries;

pub use db::{Database, DatabaseError};
pub use models::HistoryRow;
