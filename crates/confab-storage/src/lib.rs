//! # Confab Storage
//!
//! Per-user object storage for the Confab gateway.
//!
//! Objects are keyed
//! `users/{user}/{uploads|generated}/{epoch_seconds}_{8-hex-uid}_{safe_filename}`;
//! the key format is compatibility-sensitive because tools hand back
//! `/api/files/download/{key}` URLs built from it. Access control is
//! prefix-based: an operation must be performed by the user named in the
//! key (capability-token downloads are enforced separately at the download
//! edge).
//!
//! Two backends implement the same `ObjectStore` surface: `HttpObjectStore`
//! against the remote file service, and `InMemoryObjectStore` for
//! development and tests.

pub mod error;
pub mod http;
pub mod key;
pub mod memory;
pub mod store;

pub use error::StorageError;
pub use http::HttpObjectStore;
pub use memory::InMemoryObjectStore;
pub use store::{ListFilter, ObjectMetadata, ObjectStore, StorageStats, StoredObject};
