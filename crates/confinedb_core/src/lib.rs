//! # ConfineDB Core
//!
//! Thread-confined access to shared snapshot stores.
//!
//! This crate provides:
//! - A process-wide registry that keeps incompatible configurations off a path
//! - Per-thread, reference-counted store handles
//! - Write transactions that don't nest
//! - Change notification across threads, coalesced per receiver
//!
//! ## Threads
//!
//! Each thread opens its own [`Database`] for a store. Every entry point
//! takes the caller's [`ThreadToken`] and rejects calls from any other
//! thread. Opening the same configuration again on one thread shares the
//! handle; it is released when the matching number of closes arrive.
//!
//! ## Notifications
//!
//! A thread that wants its snapshot kept current attaches a
//! [`MessageQueue`] with [`Runtime::attach_queue`]. After any commit on the
//! same path, the runtime posts a [`ChangeNotice`] to that queue (at most one
//! pending per path) and the thread hands it back through
//! [`Runtime::deliver`] or [`Runtime::pump`].
//!
//! ```rust
//! use confinedb_core::{queue, Configuration, Runtime, ThreadToken};
//! use confinedb_storage::SnapshotEngine;
//! use std::thread;
//!
//! let runtime = Runtime::new(SnapshotEngine::new());
//! let config = Configuration::builder("/mem/lib-doc").in_memory().build().unwrap();
//!
//! let me = ThreadToken::current();
//! let (queue, receiver) = queue::channel();
//! runtime.attach_queue(me, queue);
//! let db = runtime.open(me, &config).unwrap();
//!
//! let writer = {
//!     let runtime = runtime.clone();
//!     let config = config.clone();
//!     thread::spawn(move || {
//!         let me = ThreadToken::current();
//!         let db = runtime.open(me, &config).unwrap();
//!         db.write(me, |db| db.put(me, b"k", b"v")).unwrap();
//!         db.close(me).unwrap();
//!     })
//! };
//! writer.join().unwrap();
//!
//! assert_eq!(runtime.pump(me, &receiver).unwrap(), 1);
//! assert_eq!(db.get(me, b"k").unwrap(), Some(b"v".to_vec()));
//! db.close(me).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod database;
mod error;
mod handle;
mod hook;
mod listener;
mod notify;
pub mod queue;
mod refcount;
mod registry;
mod runtime;
mod thread;
mod transaction;

pub use config::{canonical_path, ConfigField, Configuration, ConfigurationBuilder, SchemaIdentity};
pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use hook::LifecycleHook;
pub use listener::{ChangeListener, ListenerToken};
pub use notify::BroadcastReport;
pub use queue::{ChangeNotice, ChannelQueue, MessageQueue, QueueId, QueueReceiver};
pub use registry::ConfigurationRegistry;
pub use runtime::{CloseOutcome, Runtime};
pub use thread::ThreadToken;
pub use transaction::TransactionState;

pub use confinedb_storage::{Durability, EncryptionKey, KEY_SIZE};
