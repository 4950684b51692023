//! # chunkdb Testkit
//!
//! Test utilities for chunkdb.
//!
//! This crate provides:
//! - Fixtures that build populated databases and shared backends
//! - Property-based mutation generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use chunkdb_testkit::prelude::*;
//!
//! let db = populated_database("app", &[("users", 250)]);
//! assert_eq!(db.collection("users").unwrap().len().unwrap(), 250);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
