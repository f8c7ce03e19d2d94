//! # ConfineDB Storage
//!
//! Snapshot storage engine for ConfineDB.
//!
//! This crate is the lowest layer of ConfineDB. It knows nothing about
//! threads, configurations, or notifications; it only provides
//! connections to a shared store with snapshot isolation.
//!
//! ## Design Principles
//!
//! - One shared store per canonical path per process
//! - Each connection reads an immutable snapshot until it advances
//! - A single writer per store at a time; readers never block
//! - Values are opaque byte strings; record encoding lives above this crate
//!
//! ## Example
//!
//! ```rust
//! use confinedb_storage::{Connection, Durability, SnapshotEngine, StorageEngine};
//! use std::path::Path;
//!
//! let engine = SnapshotEngine::new();
//! let mut conn = engine
//!     .open_connection(Path::new("/mem/doc-example"), None, Durability::InMemory)
//!     .unwrap();
//!
//! conn.promote_to_write().unwrap();
//! conn.put(b"greeting", b"hello").unwrap();
//! conn.commit_and_continue_as_read().unwrap();
//!
//! assert_eq!(conn.get(b"greeting").unwrap(), Some(b"hello".to_vec()));
//! assert_eq!(conn.version(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod crypto;
mod engine;
mod error;
mod image;
mod snapshot;
mod store;

pub use config::EngineConfig;
pub use crypto::{EncryptionKey, KEY_SIZE};
pub use engine::{Connection, Durability, SnapshotConnection, SnapshotEngine, StorageEngine};
pub use error::{EngineError, EngineResult};
pub use image::{inspect_file, StoreInfo, FORMAT_VERSION};
pub use snapshot::Snapshot;
