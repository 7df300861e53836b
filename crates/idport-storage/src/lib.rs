//! # idport-storage
//!
//! Key-value storage abstraction for the idport identity broker.
//!
//! This crate defines the storage contract the broker core is written
//! against. The contract is deliberately small: get-by-key, conditional
//! create (fails if the key exists) and compare-and-swap update/delete.
//! Conditional create is the only concurrency-control primitive the broker
//! relies on; there are no locks and no multi-key transactions.
//!
//! ## Modules
//!
//! - [`traits`] - The [`KeyValueStorage`] backend contract
//! - [`types`] - The [`StoredRecord`] envelope
//! - [`error`] - [`StorageError`] and error categories
//!
//! ## Implementations
//!
//! Storage backends live in separate crates:
//!
//! - `idport-db-memory` - in-memory backend for tests and embedding

pub mod error;
pub mod traits;
pub mod types;

pub use error::{ErrorCategory, StorageError};
pub use traits::KeyValueStorage;
pub use types::StoredRecord;

/// Type alias for a shareable storage instance.
pub type DynStorage = std::sync::Arc<dyn KeyValueStorage>;
