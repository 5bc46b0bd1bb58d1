//! Append-only ledger of hash-linked blocks kept in a key-value store.
//!
//! Each block is stored under its height and carries the SHA-256 digest of
//! its own canonical JSON serialization plus the digest of its predecessor.

pub mod block;
pub mod chain;
pub mod error;
pub mod store;
pub mod validate;

pub use block::{Block, BlockHash};
pub use chain::{Blockchain, GENESIS_BODY};
pub use error::{ChainError, Result};
pub use store::{FileStore, KvStore, MemoryStore};
pub use validate::{BlockCheck, ChainReport};
