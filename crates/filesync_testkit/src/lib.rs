//! # Filesync Testkit
//!
//! Test utilities for filesync.
//!
//! This crate provides:
//! - Fixtures for temporary target directories and in-memory worlds
//! - Fault-injecting collaborators (flaky fetchers, unreliable sources)
//! - Property-based test generators using proptest
//! - A controller harness running real workers over in-memory collaborators
//! - Crash simulation for interrupted downloads
//! - Stress testing utilities for the work queue and dispatcher
//!
//! ## Usage
//!
//! ```rust,ignore
//! use filesync_testkit::prelude::*;
//!
//! #[test]
//! fn converges() {
//!     let world = MemoryWorld::new();
//!     world.publish("ns/files", &[("a.jar", b"alpha")]);
//!     world.reconciler().reconcile("ns/files").unwrap();
//!     assert_eq!(world.listing(), vec!["a.jar"]);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
