pub mod manager;
pub mod memory;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod repo;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use manager::{KvStore, StorageBackend};
pub use repo::Repo;
