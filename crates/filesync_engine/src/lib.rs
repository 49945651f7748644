//! # Filesync Engine
//!
//! Reconciliation engine that keeps a target directory holding exactly the
//! files named by a desired-state mapping.
//!
//! This crate provides:
//! - Desired-state sources (in-memory and manifest files) with change notification
//! - Fetchers for `file://` and `http://` locations
//! - Plan computation (downloads and deletions)
//! - A per-key reconciler with atomic, temp-then-rename writes
//! - A deduplicating, rate-limited work queue with per-key backoff
//! - A dispatcher running reconciliation workers
//!
//! ## Architecture
//!
//! A change to the desired state enqueues its key. Workers take keys off
//! the queue and reconcile them:
//! 1. Read the desired mapping for the key (absent means empty)
//! 2. List the target directory and compute the plan
//! 3. Delete extraneous files, then download missing ones
//!
//! A failed key is re-enqueued after an exponentially growing delay; a
//! successful key has its failure history cleared.
//!
//! ## Key Invariants
//!
//! - A key is never reconciled by two workers at once
//! - A key is queued at most once, however often it changes
//! - A file appears under its final name only once fully written
//! - Files present in the target directory are never re-downloaded
//! - One failing file does not prevent others from converging

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod diff;
mod dispatcher;
mod error;
mod fetch;
mod http;
mod manifest;
mod queue;
mod reconciler;
mod source;

pub use config::{EngineConfig, RateLimit, RetryConfig};
pub use diff::Plan;
pub use dispatcher::{DispatchStats, Dispatcher, DispatcherState};
pub use error::{
    DownloadError, EngineError, EngineResult, FetchError, FetchResult, ReconcileError,
    ReconcileResult, SourceError, SourceResult,
};
pub use fetch::{scheme_of, ByteStream, FileFetcher, Fetcher, MockFetcher, SchemeFetcher};
pub use http::{BlockingHttpClient, HttpClient, HttpFetcher};
pub use manifest::{ManifestSource, ManifestWatcher};
pub use queue::WorkQueue;
pub use reconciler::{Reconcile, ReconcileOutcome, Reconciler};
pub use source::{ChangeSink, DesiredState, DesiredStateSource, MemorySource};
