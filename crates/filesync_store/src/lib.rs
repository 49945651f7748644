//! # Filesync Store
//!
//! The target-directory abstraction for the filesync reconciler.
//!
//! A store knows three things about a directory: which final names are
//! present, how to write a new file so that its final name only appears
//! once the content is complete, and how to remove a name.
//!
//! ## Design Principles
//!
//! - Writes go to `<name>.part` and become visible only on commit (rename)
//! - Listings never report temporary names or the directory lock file
//! - Deleting a name that is already gone succeeds
//! - Stores must be `Send + Sync` so workers can share them
//!
//! ## Available Stores
//!
//! - [`DirectoryStore`] - Real directories through OS file APIs
//! - [`InMemoryStore`] - For tests, with mutation counting and fault injection
//!
//! ## Example
//!
//! ```rust
//! use filesync_store::{FileStore, InMemoryStore};
//! use std::io::Write;
//! use std::path::Path;
//!
//! let dir = Path::new("/downloads");
//! let store = InMemoryStore::with_dir(dir);
//! let mut file = store.create_atomic(dir, "a.txt").unwrap();
//! file.write_all(b"hello").unwrap();
//! assert!(store.list(dir).unwrap().is_empty());
//! file.commit().unwrap();
//! assert_eq!(store.list(dir).unwrap(), vec!["a.txt".to_string()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod directory;
mod error;
mod lock;
mod memory;
mod store;

pub use directory::DirectoryStore;
pub use error::{StoreError, StoreResult};
pub use lock::{DirLock, LOCK_FILE_NAME};
pub use memory::{InMemoryStore, StoreFault};
pub use store::{is_reserved_name, temporary_name, validate_name, AtomicFile, FileStore, TEMP_SUFFIX};
