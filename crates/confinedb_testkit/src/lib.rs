//! # ConfineDB Testkit
//!
//! Test utilities for ConfineDB.
//!
//! This crate provides:
//! - Store fixtures over temporary directories and in-memory paths
//! - Simulated threads with their own message queues
//! - Recording change listeners
//! - Property-based test generators using proptest
//! - Cross-thread integration checks
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust
//! use confinedb_testkit::prelude::*;
//!
//! with_temp_store(|db, me| {
//!     db.write(me, |db| db.put(me, b"k", b"v")).unwrap();
//!     assert_eq!(db.get(me, b"k").unwrap(), Some(b"v".to_vec()));
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
