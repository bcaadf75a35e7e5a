// src/db/mod.rs
// Persistent store layered on rusqlite + deadpool-sqlite

pub mod content;
pub mod gc;
pub mod pool;
pub mod schema;
pub mod sources;
pub mod store;
pub mod translations;

#[cfg(test)]
mod store_tests;

pub use pool::DatabasePool;
pub use store::{PendingRequest, Store, StoredTranslation};
pub use translations::TranslationUpdate;
