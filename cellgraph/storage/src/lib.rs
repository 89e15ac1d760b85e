pub mod error;
pub mod history;
pub mod memory;
pub mod merge;
pub mod model;
pub mod mutation;
pub mod wal;

pub use error::{NotFoundError, StorageError, StorageResult};
pub use memory::{AppliedMutation, MemoryStore, StoreConfig};
