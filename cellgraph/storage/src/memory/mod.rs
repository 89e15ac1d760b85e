pub mod adjacency;
pub mod store;

pub use store::{AppliedMutation, MemoryStore, StoreConfig};
