//! Database connection and initialization.

pub use conductor_core::db::DatabaseError;

conductor_core::define_database!(Database, "History database migrations complete");
