pub mod duckdb;
pub mod sql;
pub mod sqlite;
pub mod traits;

pub use self::duckdb::DuckDbStorage;
pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError};
