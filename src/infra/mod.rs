//! Infrastructure adapters for persisted stores.

pub mod blocklist;
pub mod credstore;

pub use blocklist::{BlockEntry, BlockListStore, DEFAULT_BLOCK_TTL};
pub use credstore::CredentialStore;
